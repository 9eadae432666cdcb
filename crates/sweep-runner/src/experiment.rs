use crate::assignment::Assignment;
use crate::blob::Blob;
use crate::combos::{ArgSpec, FilterFn};
use crate::process::ExecutionResult;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub type TextTransformFn = dyn Fn(&str) -> Blob + Send + Sync;
pub type ResultTransformFn = dyn Fn(&str, &ExecutionResult) -> Blob + Send + Sync;
pub type HeaderTransformFn = dyn Fn(&str) -> String + Send + Sync;

/// How trimmed stdout becomes the text that is written.
///
/// Non-identity transforms return a blob, which is resolved against the
/// run's arguments plus a `stdout` entry holding the trimmed output.
#[derive(Clone, Default)]
pub enum OutputTransform {
    #[default]
    Identity,
    Text(Arc<TextTransformFn>),
    Result(Arc<ResultTransformFn>),
}

impl OutputTransform {
    pub fn text<F>(f: F) -> Self
    where
        F: Fn(&str) -> Blob + Send + Sync + 'static,
    {
        OutputTransform::Text(Arc::new(f))
    }

    pub fn result<F>(f: F) -> Self
    where
        F: Fn(&str, &ExecutionResult) -> Blob + Send + Sync + 'static,
    {
        OutputTransform::Result(Arc::new(f))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, OutputTransform::Identity)
    }

    pub fn apply(&self, stdout: &str, result: &ExecutionResult, args: &Assignment) -> String {
        let blob = match self {
            OutputTransform::Identity => return stdout.to_string(),
            OutputTransform::Text(f) => f(stdout),
            OutputTransform::Result(f) => f(stdout, result),
        };
        blob.resolve(&args.with("stdout", stdout))
    }
}

impl fmt::Debug for OutputTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTransform::Identity => f.write_str("Identity"),
            OutputTransform::Text(_) => f.write_str("Text(<fn>)"),
            OutputTransform::Result(_) => f.write_str("Result(<fn>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderSource {
    Literal(String),
    Command(String),
}

#[derive(Clone)]
pub struct Experiment {
    pub name: Blob,
    pub command: Blob,
    pub args: ArgSpec,
    pub creates_file: Option<Blob>,
    pub stdout_file: Option<Blob>,
    pub stdout_transform: OutputTransform,
    pub stdout_res: Option<Blob>,
    pub header_string: Option<Blob>,
    pub header_command: Option<Blob>,
    pub header_transform: Option<Arc<HeaderTransformFn>>,
    pub return_string: Option<Blob>,
    pub allowed_return_codes: Vec<i32>,
    pub filter: Option<Arc<FilterFn>>,
}

impl Experiment {
    pub fn new(name: impl Into<Blob>, command: impl Into<Blob>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: ArgSpec::new(),
            creates_file: None,
            stdout_file: None,
            stdout_transform: OutputTransform::Identity,
            stdout_res: None,
            header_string: None,
            header_command: None,
            header_transform: None,
            return_string: None,
            allowed_return_codes: vec![0],
            filter: None,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Blob>) -> Self {
        self.args = self.args.single(name, value);
        self
    }

    pub fn arg_list<I, B>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Blob>,
    {
        self.args = self.args.list(name, values);
        self
    }

    pub fn args(mut self, args: ArgSpec) -> Self {
        self.args = args;
        self
    }

    pub fn creates_file(mut self, path: impl Into<Blob>) -> Self {
        self.creates_file = Some(path.into());
        self
    }

    pub fn stdout_file(mut self, path: impl Into<Blob>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    pub fn stdout_transform(mut self, transform: OutputTransform) -> Self {
        self.stdout_transform = transform;
        self
    }

    pub fn stdout_res(mut self, template: impl Into<Blob>) -> Self {
        self.stdout_res = Some(template.into());
        self
    }

    pub fn header_string(mut self, header: impl Into<Blob>) -> Self {
        self.header_string = Some(header.into());
        self
    }

    pub fn header_command(mut self, command: impl Into<Blob>) -> Self {
        self.header_command = Some(command.into());
        self
    }

    pub fn header_transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.header_transform = Some(Arc::new(f));
        self
    }

    pub fn return_string(mut self, template: impl Into<Blob>) -> Self {
        self.return_string = Some(template.into());
        self
    }

    pub fn allowed_return_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.allowed_return_codes = codes.into_iter().collect();
        self
    }

    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Assignment) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn config_warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        let no_output = self.stdout_file.is_none();
        if !self.stdout_transform.is_identity() && no_output {
            out.push("stdout_mod has no effect if stdout_file is not specified".to_string());
        }
        if self.stdout_res.is_some() && no_output {
            out.push("stdout_res has no effect if stdout_file is not specified".to_string());
        }
        if self.header_string.is_some() && no_output {
            out.push("header_string has no effect if stdout_file is not specified".to_string());
        }
        if self.header_command.is_some() && no_output {
            out.push("header_command has no effect if stdout_file is not specified".to_string());
        }
        if self.header_string.is_some() && self.header_command.is_some() {
            out.push(
                "header_string and header_command specified - Which one should I use?"
                    .to_string(),
            );
        }
        if self.header_transform.is_some()
            && self.header_string.is_none()
            && self.header_command.is_none()
        {
            out.push(
                "header_mod has no effect if not one of header_string or header_command are specified"
                    .to_string(),
            );
        }
        out
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("stdout_file", &self.stdout_file)
            .field("allowed_return_codes", &self.allowed_return_codes)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct RunDescriptor {
    pub name: String,
    pub group: String,
    pub command: String,
    pub args: Assignment,
    pub creates_file: Option<PathBuf>,
    pub stdout_file: Option<PathBuf>,
    pub stdout_transform: OutputTransform,
    pub stdout_res: Option<Blob>,
    pub header: Option<HeaderSource>,
    pub header_transform: Option<Arc<HeaderTransformFn>>,
    pub allowed_return_codes: Vec<i32>,
    pub selected: bool,
    pub skipped: bool,
}

impl RunDescriptor {
    pub fn header_text(&self, raw: &str) -> String {
        match &self.header_transform {
            Some(f) => f(raw),
            None => raw.to_string(),
        }
    }
}

impl fmt::Debug for RunDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunDescriptor")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("command", &self.command)
            .field("stdout_file", &self.stdout_file)
            .field("creates_file", &self.creates_file)
            .field("selected", &self.selected)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(code: i32) -> ExecutionResult {
        ExecutionResult {
            command: "true".to_string(),
            code: Some(code),
            stdout: "42\n".to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn defaults_allow_only_zero() {
        let exp = Experiment::new("e", "true");
        assert_eq!(exp.allowed_return_codes, vec![0]);
        assert!(exp.config_warnings().is_empty());
    }

    #[test]
    fn warns_about_options_without_stdout_file() {
        let exp = Experiment::new("e", "true")
            .stdout_transform(OutputTransform::text(|s| Blob::from(s.to_string())))
            .stdout_res("[[stdout]]")
            .header_transform(|h| h.to_uppercase());
        let warnings = exp.config_warnings();
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
        assert!(warnings[0].starts_with("stdout_mod"));
        assert!(warnings[1].starts_with("stdout_res"));
        assert!(warnings[2].starts_with("header_mod"));
    }

    #[test]
    fn warns_about_headers_without_stdout_file() {
        let literal = Experiment::new("e", "true").header_string("a,b");
        let warnings = literal.config_warnings();
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].starts_with("header_string has no effect"));

        let command = Experiment::new("e", "true").header_command("echo a,b");
        let warnings = command.config_warnings();
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].starts_with("header_command has no effect"));

        let both = Experiment::new("e", "true")
            .header_string("a,b")
            .header_command("echo a,b");
        assert_eq!(both.config_warnings().len(), 3);
    }

    #[test]
    fn warns_about_conflicting_headers() {
        let exp = Experiment::new("e", "true")
            .stdout_file("out.txt")
            .header_string("a,b")
            .header_command("echo a,b");
        let warnings = exp.config_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Which one should I use?"));
    }

    #[test]
    fn identity_transform_passes_text_through() {
        let args = Assignment::new();
        assert_eq!(
            OutputTransform::Identity.apply("42", &result(0), &args),
            "42"
        );
    }

    #[test]
    fn text_transform_result_is_resolved_with_stdout() {
        let args: Assignment = vec![("n", json!("3"))].into_iter().collect();
        let transform = OutputTransform::text(|_| Blob::from("n=[[n]] out=[[stdout]]"));
        assert_eq!(transform.apply("42", &result(0), &args), "n=3 out=42");
    }

    #[test]
    fn result_transform_can_inspect_return_code() {
        let args: Assignment = vec![("time", json!("4"))].into_iter().collect();
        let transform = OutputTransform::result(|_, res| {
            if res.code == Some(0) {
                Blob::from("sleeping [[time]]s -> [[stdout]]")
            } else {
                Blob::from("sleeping [[time]]s -> timeout")
            }
        });
        assert_eq!(
            transform.apply("", &result(124), &args),
            "sleeping 4s -> timeout"
        );
        assert_eq!(
            transform.apply("up", &result(0), &args),
            "sleeping 4s -> up"
        );
    }
}
