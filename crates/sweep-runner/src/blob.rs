use crate::assignment::{render_value, Assignment};
use regex::{Captures, Regex};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::warn;

pub type DeriveFn = dyn Fn(&Assignment) -> Value + Send + Sync;

/// A templated value: either a literal or a function of the run's arguments.
#[derive(Clone)]
pub enum Blob {
    Literal(Value),
    Derived(Arc<DeriveFn>),
}

impl Blob {
    pub fn literal(value: impl Into<Value>) -> Self {
        Blob::Literal(value.into())
    }

    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&Assignment) -> Value + Send + Sync + 'static,
    {
        Blob::Derived(Arc::new(f))
    }

    pub fn evaluate(&self, args: &Assignment) -> Value {
        match self {
            Blob::Literal(value) => value.clone(),
            Blob::Derived(f) => f(args),
        }
    }

    pub fn resolve(&self, args: &Assignment) -> String {
        substitute(&render_value(&self.evaluate(args)), args)
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, Blob::Derived(_))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blob::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Blob::Derived(_) => f.write_str("Derived(<fn>)"),
        }
    }
}

impl From<Value> for Blob {
    fn from(value: Value) -> Self {
        Blob::Literal(value)
    }
}

impl From<&str> for Blob {
    fn from(value: &str) -> Self {
        Blob::Literal(Value::from(value))
    }
}

impl From<String> for Blob {
    fn from(value: String) -> Self {
        Blob::Literal(Value::from(value))
    }
}

impl From<i32> for Blob {
    fn from(value: i32) -> Self {
        Blob::Literal(Value::from(value))
    }
}

impl From<i64> for Blob {
    fn from(value: i64) -> Self {
        Blob::Literal(Value::from(value))
    }
}

impl From<u32> for Blob {
    fn from(value: u32) -> Self {
        Blob::Literal(Value::from(value))
    }
}

impl From<u64> for Blob {
    fn from(value: u64) -> Self {
        Blob::Literal(Value::from(value))
    }
}

impl From<f64> for Blob {
    fn from(value: f64) -> Self {
        Blob::Literal(Value::from(value))
    }
}

impl From<bool> for Blob {
    fn from(value: bool) -> Self {
        Blob::Literal(Value::from(value))
    }
}

pub fn resolve_opt(blob: Option<&Blob>, args: &Assignment) -> Option<String> {
    blob.map(|b| b.resolve(args))
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[\[([^\[\]]*)\]\]").expect("valid placeholder pattern"))
}

/// Single pass over `text`: inserted values are never rescanned. Unknown
/// keys are left as-is and reported.
pub fn substitute(text: &str, args: &Assignment) -> String {
    placeholder_pattern()
        .replace_all(text, |caps: &Captures| {
            let key = &caps[1];
            match args.text(key) {
                Some(value) => value,
                None => {
                    warn!("No value for [[{}]] found to replace in {}", key, text);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
