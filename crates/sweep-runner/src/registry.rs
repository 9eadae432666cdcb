use crate::blob::resolve_opt;
use crate::combos::expand;
use crate::experiment::{Experiment, HeaderSource, RunDescriptor};
use crate::selection::Selection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_GROUP: &str = "ungrouped";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub todo: usize,
    pub skipped: usize,
}

impl RunCounts {
    pub fn total(&self) -> usize {
        self.todo + self.skipped
    }
}

#[derive(Debug, Clone, Default)]
pub struct Declared {
    pub names: Vec<String>,
    pub warnings: Vec<String>,
    // One per surviving combination when a `return_string` is configured.
    pub return_strings: Vec<String>,
    pub runs: usize,
    pub skipped: usize,
    pub queued: usize,
}

#[derive(Debug)]
struct NameBucket {
    name: String,
    runs: Vec<RunDescriptor>,
    counts: RunCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSummary {
    pub name: String,
    pub todo: usize,
    pub skipped: usize,
    pub total: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub name: String,
    pub selected: bool,
    pub experiments: Vec<ExperimentSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub groups: Vec<GroupSummary>,
}

impl Summary {
    pub fn total_runs(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.experiments.iter())
            .map(|e| e.total)
            .sum()
    }

    pub fn max_name_len(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| {
                std::iter::once(g.name.len()).chain(g.experiments.iter().map(|e| e.name.len()))
            })
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct Registry {
    current_group: String,
    groups: Vec<(String, Vec<String>)>,
    buckets: Vec<NameBucket>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            current_group: DEFAULT_GROUP.to_string(),
            groups: vec![(DEFAULT_GROUP.to_string(), Vec::new())],
            buckets: Vec::new(),
        }
    }

    pub fn current_group(&self) -> &str {
        &self.current_group
    }

    pub fn set_group(&mut self, label: &str) {
        self.current_group = label.to_string();
        if !self.groups.iter().any(|(g, _)| g == label) {
            self.groups.push((label.to_string(), Vec::new()));
        }
    }

    pub fn declare(&mut self, exp: &Experiment, selection: &Selection) -> Declared {
        let mut declared = Declared {
            warnings: exp.config_warnings(),
            ..Declared::default()
        };
        for w in &declared.warnings {
            warn!("{}", w);
        }

        for args in expand(&exp.args, exp.filter.as_ref()) {
            let name = exp.name.resolve(&args);
            self.add_to_current_group(&name);
            if !declared.names.contains(&name) {
                declared.names.push(name.clone());
            }

            let header_string = resolve_opt(exp.header_string.as_ref(), &args);
            let header_command = resolve_opt(exp.header_command.as_ref(), &args);
            let header = match (header_command, header_string) {
                (Some(cmd), _) => Some(HeaderSource::Command(cmd)),
                (None, Some(text)) => Some(HeaderSource::Literal(text)),
                (None, None) => None,
            };
            let creates_file = resolve_opt(exp.creates_file.as_ref(), &args).map(PathBuf::from);
            let stdout_file = resolve_opt(exp.stdout_file.as_ref(), &args).map(PathBuf::from);
            let skipped = is_present(creates_file.as_deref()) || is_present(stdout_file.as_deref());
            let selected = self.is_selected(&name, selection);

            if let Some(template) = &exp.return_string {
                declared.return_strings.push(template.resolve(&args));
            }

            let run = RunDescriptor {
                name,
                group: self.current_group.clone(),
                command: exp.command.resolve(&args),
                args,
                creates_file,
                stdout_file,
                stdout_transform: exp.stdout_transform.clone(),
                stdout_res: exp.stdout_res.clone(),
                header,
                header_transform: exp.header_transform.clone(),
                allowed_return_codes: exp.allowed_return_codes.clone(),
                selected,
                skipped,
            };
            declared.runs += 1;
            if run.skipped {
                declared.skipped += 1;
            } else if run.selected {
                declared.queued += 1;
            }
            self.add_run(run);
        }
        debug!(
            names = ?declared.names,
            runs = declared.runs,
            skipped = declared.skipped,
            queued = declared.queued,
            "declared"
        );
        declared
    }

    fn add_to_current_group(&mut self, name: &str) {
        let idx = match self
            .groups
            .iter()
            .position(|(g, _)| *g == self.current_group)
        {
            Some(idx) => idx,
            None => {
                self.groups.push((self.current_group.clone(), Vec::new()));
                self.groups.len() - 1
            }
        };
        let members = &mut self.groups[idx].1;
        if !members.iter().any(|n| n == name) {
            members.push(name.to_string());
        }
    }

    fn add_run(&mut self, run: RunDescriptor) {
        let idx = match self.buckets.iter().position(|b| b.name == run.name) {
            Some(idx) => idx,
            None => {
                self.buckets.push(NameBucket {
                    name: run.name.clone(),
                    runs: Vec::new(),
                    counts: RunCounts::default(),
                });
                self.buckets.len() - 1
            }
        };
        let bucket = &mut self.buckets[idx];
        if run.skipped {
            bucket.counts.skipped += 1;
        } else {
            bucket.counts.todo += 1;
        }
        if run.selected && !run.skipped {
            bucket.runs.push(run);
        }
    }

    /// Requested directly, or through any group the name belongs to.
    pub fn is_selected(&self, name: &str, selection: &Selection) -> bool {
        if selection.matches(name) {
            return true;
        }
        self.groups
            .iter()
            .any(|(group, members)| selection.matches(group) && members.iter().any(|m| m == name))
    }

    pub fn any_selected(&self, selection: &Selection) -> bool {
        self.buckets
            .iter()
            .any(|b| self.is_selected(&b.name, selection))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.name.as_str())
    }

    pub fn counts(&self, name: &str) -> Option<RunCounts> {
        self.buckets
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.counts)
    }

    pub fn queued(&self, name: &str) -> &[RunDescriptor] {
        self.buckets
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.runs.as_slice())
            .unwrap_or(&[])
    }

    pub fn group_members(&self, group: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(g, _)| g == group)
            .map(|(_, members)| members.as_slice())
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(g, _)| g.as_str())
    }

    pub fn total_runs(&self) -> usize {
        self.buckets.iter().map(|b| b.counts.total()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn summary(&self, selection: &Selection) -> Summary {
        let groups = self
            .groups
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(group, members)| GroupSummary {
                name: group.clone(),
                selected: selection.matches(group),
                experiments: members
                    .iter()
                    .map(|name| {
                        let counts = self.counts(name).unwrap_or_default();
                        ExperimentSummary {
                            name: name.clone(),
                            todo: counts.todo,
                            skipped: counts.skipped,
                            total: counts.total(),
                            selected: self.is_selected(name, selection),
                        }
                    })
                    .collect(),
            })
            .collect();
        Summary { groups }
    }

    pub fn drain(&mut self) -> Vec<(String, Vec<RunDescriptor>)> {
        let buckets = std::mem::take(&mut self.buckets);
        *self = Registry::new();
        buckets.into_iter().map(|b| (b.name, b.runs)).collect()
    }
}

fn is_present(path: Option<&Path>) -> bool {
    path.map(Path::is_file).unwrap_or(false)
}
