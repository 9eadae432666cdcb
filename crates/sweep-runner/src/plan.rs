use crate::blob::Blob;
use crate::combos::ArgSpec;
use crate::experiment::Experiment;
use crate::registry::{Declared, DEFAULT_GROUP};
use crate::session::Session;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub experiments: Vec<ExperimentDef>,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDef {
    pub name: String,
    #[serde(default)]
    pub experiments: Vec<ExperimentDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentDef {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: serde_yaml::Mapping,
    #[serde(default)]
    pub creates_file: Option<String>,
    #[serde(default)]
    pub stdout_file: Option<String>,
    #[serde(default)]
    pub stdout_res: Option<String>,
    #[serde(default)]
    pub header_string: Option<String>,
    #[serde(default)]
    pub header_command: Option<String>,
    #[serde(default)]
    pub return_string: Option<String>,
    #[serde(default = "default_return_codes")]
    pub allowed_return_codes: Vec<i32>,
}

fn default_return_codes() -> Vec<i32> {
    vec![0]
}

impl ExperimentDef {
    pub fn to_experiment(&self) -> Result<Experiment> {
        let mut args = ArgSpec::new();
        for (key, value) in self.args.iter() {
            let key = key.as_str().ok_or_else(|| {
                anyhow!(
                    "experiment '{}': argument names must be strings (got {:?})",
                    self.name,
                    key
                )
            })?;
            let values = match value {
                serde_yaml::Value::Sequence(items) => items
                    .iter()
                    .map(yaml_to_blob)
                    .collect::<Result<Vec<_>>>()?,
                other => vec![yaml_to_blob(other)?],
            };
            args.push(key.to_string(), values);
        }

        let mut exp = Experiment::new(self.name.as_str(), self.command.as_str())
            .args(args)
            .allowed_return_codes(self.allowed_return_codes.iter().copied());
        exp.creates_file = self.creates_file.as_deref().map(Blob::from);
        exp.stdout_file = self.stdout_file.as_deref().map(Blob::from);
        exp.stdout_res = self.stdout_res.as_deref().map(Blob::from);
        exp.header_string = self.header_string.as_deref().map(Blob::from);
        exp.header_command = self.header_command.as_deref().map(Blob::from);
        exp.return_string = self.return_string.as_deref().map(Blob::from);
        Ok(exp)
    }
}

fn yaml_to_blob(value: &serde_yaml::Value) -> Result<Blob> {
    let json = serde_json::to_value(value).context("argument value is not representable")?;
    Ok(Blob::Literal(json))
}

#[derive(Debug)]
pub struct Plan {
    pub path: PathBuf,
    pub file: PlanFile,
}

pub fn parse_plan(text: &str) -> Result<PlanFile> {
    let file: PlanFile = serde_yaml::from_str(text)?;
    for (idx, group) in file.groups.iter().enumerate() {
        if group.name.trim().is_empty() {
            return Err(anyhow!("groups[{}]: name cannot be empty", idx));
        }
    }
    Ok(file)
}

pub fn load_plan(path: &Path) -> Result<Plan> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let file = parse_plan(&raw).with_context(|| format!("invalid plan {}", path.display()))?;
    Ok(Plan {
        path: path.to_path_buf(),
        file,
    })
}

impl Plan {
    pub fn jobs(&self) -> Option<usize> {
        self.file.jobs
    }

    pub fn experiment_count(&self) -> usize {
        self.file.experiments.len()
            + self
                .file
                .groups
                .iter()
                .map(|g| g.experiments.len())
                .sum::<usize>()
    }

    pub fn declare_into(&self, session: &mut Session) -> Result<Vec<Declared>> {
        let mut out = Vec::with_capacity(self.experiment_count());
        if !self.file.experiments.is_empty() {
            session.group(DEFAULT_GROUP);
            for def in &self.file.experiments {
                out.push(session.declare(&def.to_experiment()?));
            }
        }
        for group in &self.file.groups {
            session.group(&group.name);
            for def in &group.experiments {
                let exp = def
                    .to_experiment()
                    .with_context(|| format!("group '{}'", group.name))?;
                out.push(session.declare(&exp));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::Selection;
    use crate::session::SessionConfig;

    const SAMPLE: &str = r#"
jobs: 2
experiments:
  - name: sum
    command: "echo $(( [[a]] + [[b]] ))"
    args:
      b: [1, 2, 3]
      a: [1, 2]
    stdout_file: "out/sums_[[a]]_[[b]].txt"
groups:
  - name: error_handling
    experiments:
      - name: timeouts
        command: "timeout 2 sleep [[time]] && echo waking up"
        args:
          time: [0, 3]
        stdout_file: out/timeouts.txt
        stdout_res: "sleeping [[time]]s -> [[stdout]]"
        allowed_return_codes: [0, 124]
      - name: point
        command: "echo [[p]]"
        args:
          p: { x: 1, y: 2 }
        return_string: "[[p]]"
"#;

    #[test]
    fn parses_sample_plan() {
        let file = parse_plan(SAMPLE).expect("plan");
        assert_eq!(file.jobs, Some(2));
        assert_eq!(file.experiments.len(), 1);
        assert_eq!(file.groups[0].experiments.len(), 2);
        assert_eq!(file.groups[0].experiments[0].allowed_return_codes, vec![0, 124]);
        assert_eq!(file.experiments[0].allowed_return_codes, vec![0]);
    }

    #[test]
    fn argument_order_follows_the_file() {
        let file = parse_plan(SAMPLE).expect("plan");
        let exp = file.experiments[0].to_experiment().expect("experiment");
        assert_eq!(exp.args.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(exp.args.combination_count(), 6);
    }

    #[test]
    fn declares_into_groups() {
        let plan = Plan {
            path: PathBuf::from("plan.yaml"),
            file: parse_plan(SAMPLE).expect("plan"),
        };
        let mut session = Session::new(
            SessionConfig::default().with_selection(Selection::new(["error_handling"])),
        );
        let declared = plan.declare_into(&mut session).expect("declare");
        assert_eq!(declared.len(), 3);
        assert_eq!(declared[0].runs, 6);
        assert_eq!(declared[0].queued, 0);
        assert_eq!(declared[1].queued, 2);
        assert_eq!(declared[2].return_strings, vec![r#"{"x":1,"y":2}"#]);
        assert_eq!(
            session.registry().group_members("error_handling"),
            Some(&["timeouts".to_string(), "point".to_string()][..])
        );
        assert_eq!(
            session.registry().queued("timeouts")[1].command,
            "timeout 2 sleep 3 && echo waking up"
        );
    }

    #[test]
    fn plan_and_builder_declare_the_same_runs() {
        let plan = Plan {
            path: PathBuf::from("plan.yaml"),
            file: parse_plan(SAMPLE).expect("plan"),
        };
        let selection = Selection::new(["sum", "timeouts"]);
        let mut from_plan =
            Session::new(SessionConfig::default().with_selection(selection.clone()));
        plan.declare_into(&mut from_plan).expect("declare");

        let mut built = Session::new(SessionConfig::default().with_selection(selection));
        built.declare(
            &Experiment::new("sum", "echo $(( [[a]] + [[b]] ))")
                .arg_list("b", [1, 2, 3])
                .arg_list("a", [1, 2])
                .stdout_file("out/sums_[[a]]_[[b]].txt"),
        );
        built.group("error_handling");
        built.declare(
            &Experiment::new("timeouts", "timeout 2 sleep [[time]] && echo waking up")
                .arg_list("time", [0, 3])
                .stdout_file("out/timeouts.txt")
                .stdout_res("sleeping [[time]]s -> [[stdout]]")
                .allowed_return_codes([0, 124]),
        );

        for name in ["sum", "timeouts"] {
            let a: Vec<_> = from_plan
                .registry()
                .queued(name)
                .iter()
                .map(|r| (r.command.clone(), r.stdout_file.clone(), r.group.clone()))
                .collect();
            let b: Vec<_> = built
                .registry()
                .queued(name)
                .iter()
                .map(|r| (r.command.clone(), r.stdout_file.clone(), r.group.clone()))
                .collect();
            assert_eq!(a, b, "{}", name);
            assert!(!a.is_empty());
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_plan("experiments:\n  - name: a\n    command: b\n    stdout: c\n")
            .expect_err("unknown key must fail");
        assert!(err.to_string().contains("stdout"), "{}", err);
    }

    #[test]
    fn empty_group_name_is_rejected() {
        let err = parse_plan("groups:\n  - name: ''\n").expect_err("empty group");
        assert!(err.to_string().contains("groups[0]"), "{}", err);
    }

    #[test]
    fn non_string_argument_names_are_rejected() {
        let file = parse_plan("experiments:\n  - name: a\n    command: b\n    args:\n      1: [2]\n")
            .expect("plan");
        assert!(file.experiments[0].to_experiment().is_err());
    }
}
