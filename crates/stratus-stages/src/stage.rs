//! Stage definitions and the runner line each one contributes.

use std::path::{Path, PathBuf};

use stratus_core::StageSpec;

/// What a stage does on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// A shell command written into its own script.
    Inline { command: String },
    /// A local script copied as-is.
    Script { path: PathBuf, args: Vec<String> },
    /// A local directory with a `setup.sh` entry point.
    Directory { path: PathBuf, args: Vec<String> },
    /// A local tarball with a `setup.sh` entry point inside.
    Tar { path: PathBuf, args: Vec<String> },
}

/// One provisioning step. `number` fixes execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub number: u32,
    pub kind: StageKind,
}

impl Stage {
    pub fn new(number: u32, kind: StageKind) -> Self {
        Self { number, kind }
    }

    /// Build stages from config; entries without an explicit number take
    /// their list position.
    pub fn from_specs(specs: &[StageSpec]) -> Vec<Stage> {
        specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let number = spec.number().unwrap_or(index as u32);
                let kind = match spec.clone() {
                    StageSpec::Inline { command, .. } => StageKind::Inline { command },
                    StageSpec::Script { path, args, .. } => StageKind::Script { path, args },
                    StageSpec::Directory { path, args, .. } => StageKind::Directory { path, args },
                    StageSpec::Tar { path, args, .. } => StageKind::Tar { path, args },
                };
                Stage { number, kind }
            })
            .collect()
    }

    /// Local source this stage reads, if any.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.kind {
            StageKind::Inline { .. } => None,
            StageKind::Script { path, .. }
            | StageKind::Directory { path, .. }
            | StageKind::Tar { path, .. } => Some(path),
        }
    }

    /// Name of the generated entry inside the bundle.
    pub fn file_name(&self) -> String {
        let n = self.number;
        match self.kind {
            StageKind::Inline { .. } | StageKind::Script { .. } => format!("stage-{n}.sh"),
            StageKind::Directory { .. } => format!("stage-{n}"),
            StageKind::Tar { .. } => format!("stage-{n}.tar"),
        }
    }

    /// The line this stage contributes to `runner.sh`.
    pub fn runner_command(&self) -> String {
        let n = self.number;
        match &self.kind {
            StageKind::Inline { .. } => format!("bash ./stage-{n}.sh"),
            StageKind::Script { args, .. } => {
                with_args(format!("bash ./stage-{n}.sh"), args)
            }
            StageKind::Directory { args, .. } => format!(
                "pushd stage-{n}; {}; popd",
                with_args("bash ./setup.sh".to_string(), args)
            ),
            StageKind::Tar { args, .. } => format!(
                "rm -rf stage-{n}; mkdir stage-{n}; tar -xf stage-{n}.tar -C stage-{n}; \
                 pushd stage-{n}; {}; popd",
                with_args("bash ./setup.sh".to_string(), args)
            ),
        }
    }
}

fn with_args(mut command: String, args: &[String]) -> String {
    for arg in args {
        command.push(' ');
        command.push_str(&shell_quote(arg));
    }
    command
}

/// Quote a word for a POSIX shell. Plain words pass through unchanged.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_fill_missing_numbers() {
        let specs = vec![
            StageSpec::Inline { number: None, command: "true".into() },
            StageSpec::Tar { number: Some(9), path: "a.tar".into(), args: vec![] },
            StageSpec::Script { number: None, path: "s.sh".into(), args: vec![] },
        ];
        let numbers: Vec<u32> = Stage::from_specs(&specs).iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![0, 9, 2]);
    }

    #[test]
    fn runner_lines_per_kind() {
        let script = Stage::new(1, StageKind::Script {
            path: "x.sh".into(),
            args: vec!["--name".into(), "db one".into()],
        });
        assert_eq!(script.runner_command(), "bash ./stage-1.sh --name 'db one'");

        let dir = Stage::new(2, StageKind::Directory { path: "d".into(), args: vec![] });
        assert_eq!(dir.file_name(), "stage-2");
        assert_eq!(dir.runner_command(), "pushd stage-2; bash ./setup.sh; popd");

        let tar = Stage::new(3, StageKind::Tar { path: "t.tar".into(), args: vec!["a".into()] });
        assert_eq!(tar.file_name(), "stage-3.tar");
        assert!(tar.runner_command().starts_with("rm -rf stage-3; mkdir stage-3; tar -xf stage-3.tar -C stage-3;"));
        assert!(tar.runner_command().ends_with("pushd stage-3; bash ./setup.sh a; popd"));
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("plain-word_1.sh"), "plain-word_1.sh");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }
}
