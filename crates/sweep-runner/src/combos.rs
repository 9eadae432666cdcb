use crate::assignment::Assignment;
use crate::blob::Blob;
use serde_json::Value;
use std::sync::Arc;

pub type FilterFn = dyn Fn(&Assignment) -> bool + Send + Sync;

#[derive(Debug, Clone, Default)]
pub struct ArgSpec {
    entries: Vec<(String, Vec<Blob>)>,
}

impl ArgSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(mut self, name: impl Into<String>, value: impl Into<Blob>) -> Self {
        self.push(name.into(), vec![value.into()]);
        self
    }

    pub fn list<I, B>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Blob>,
    {
        self.push(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn push(&mut self, name: String, values: Vec<Blob>) {
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = values,
            None => self.entries.push((name, values)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn combination_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).product()
    }
}

/// Cartesian product of the declared lists (last argument varies fastest),
/// filtered on the raw values and then resolved key by key.
pub fn expand(spec: &ArgSpec, filter: Option<&Arc<FilterFn>>) -> Vec<Assignment> {
    let mut out = Vec::new();
    for tuple in cartesian_indices(spec) {
        let picked: Vec<(&str, &Blob)> = spec
            .entries
            .iter()
            .zip(tuple.iter())
            .map(|((name, values), idx)| (name.as_str(), &values[*idx]))
            .collect();

        let mut args: Assignment = picked
            .iter()
            .map(|(name, blob)| (*name, raw_value(blob)))
            .collect();
        if let Some(filter) = filter {
            if !filter(&args) {
                continue;
            }
        }

        for (name, blob) in picked {
            let resolved = blob.resolve(&args);
            args.set(name, Value::String(resolved));
        }
        out.push(args);
    }
    out
}

fn raw_value(blob: &Blob) -> Value {
    match blob {
        Blob::Literal(value) => value.clone(),
        Blob::Derived(_) => Value::Null,
    }
}

fn cartesian_indices(spec: &ArgSpec) -> Vec<Vec<usize>> {
    let lengths: Vec<usize> = spec.entries.iter().map(|(_, v)| v.len()).collect();
    if lengths.iter().any(|len| *len == 0) {
        return Vec::new();
    }
    let total: usize = lengths.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut current = vec![0usize; lengths.len()];
    for _ in 0..total {
        out.push(current.clone());
        for pos in (0..lengths.len()).rev() {
            current[pos] += 1;
            if current[pos] < lengths[pos] {
                break;
            }
            current[pos] = 0;
        }
    }
    out
}
