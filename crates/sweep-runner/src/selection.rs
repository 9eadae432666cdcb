use glob::Pattern;
use std::ffi::OsString;

pub const DRY_RUN_TOKEN: &str = "dry_run";

#[derive(Debug, Clone, Default)]
pub struct Selection {
    tokens: Vec<String>,
    patterns: Vec<Option<Pattern>>,
}

impl Selection {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let patterns = tokens.iter().map(|t| Pattern::new(t).ok()).collect();
        Self { tokens, patterns }
    }

    pub fn from_env() -> Self {
        Self::from_os_args(std::env::args_os().skip(1))
    }

    pub fn from_os_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = OsString>,
    {
        Self::new(args.into_iter().map(|a| a.to_string_lossy().into_owned()))
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn is_dry_run(&self) -> bool {
        self.tokens.iter().any(|t| t == DRY_RUN_TOKEN)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.tokens
            .iter()
            .zip(self.patterns.iter())
            .any(|(token, pattern)| match pattern {
                Some(p) => p.matches(name),
                None => token == name,
            })
    }
}
