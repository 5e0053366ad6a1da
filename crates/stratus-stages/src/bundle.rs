//! Stage bundle compilation.
//!
//! A bundle is a directory holding one entry per stage and a generated
//! `runner.sh` that invokes them in ascending stage-number order. It is
//! wiped and regenerated on every compile.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StageError, StageResult};
use crate::stage::{Stage, StageKind};

/// Name of the generated runner script.
pub const RUNNER_SCRIPT: &str = "runner.sh";

/// Directory a worker compiles its bundles into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleScope {
    dir: PathBuf,
}

impl BundleScope {
    /// `{root}/stages/{pid}-{worker}`. Unique per process and worker.
    pub fn for_worker(root: &Path, worker: usize) -> Self {
        let pid = std::process::id();
        Self {
            dir: root.join("stages").join(format!("{pid}-{worker}")),
        }
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// A compiled, on-disk stage bundle.
#[derive(Debug, Clone)]
pub struct StageBundle {
    dir: PathBuf,
    stages: Vec<Stage>,
}

impl StageBundle {
    /// Validate `stages` and materialize them under `scope`.
    ///
    /// Rejects duplicate stage numbers and stages whose local source is
    /// missing. An empty stage list yields an empty bundle.
    pub fn compile(stages: &[Stage], scope: &BundleScope) -> StageResult<Self> {
        validate(stages)?;

        let dir = scope.dir().to_path_buf();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let mut ordered = stages.to_vec();
        ordered.sort_by_key(|s| s.number);

        if ordered.is_empty() {
            return Ok(Self { dir, stages: ordered });
        }

        for stage in &ordered {
            materialize(stage, &dir)?;
        }
        fs::write(dir.join(RUNNER_SCRIPT), runner_script(&ordered))?;
        debug!(dir = %dir.display(), stages = ordered.len(), "compiled stage bundle");

        Ok(Self { dir, stages: ordered })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Top-level entries to transfer, sorted by name.
    pub fn entries(&self) -> StageResult<Vec<PathBuf>> {
        let mut entries = Vec::new();
        if self.dir.is_dir() {
            for entry in fs::read_dir(&self.dir)? {
                entries.push(entry?.path());
            }
        }
        entries.sort();
        Ok(entries)
    }

    pub fn runner(&self) -> PathBuf {
        self.dir.join(RUNNER_SCRIPT)
    }
}

/// `runner.sh` content for stages already sorted by number.
fn runner_script(stages: &[Stage]) -> String {
    let mut script = String::from("#!/bin/bash\nset -e\n");
    for stage in stages {
        script.push_str(&stage.runner_command());
        script.push('\n');
    }
    script
}

/// Reject duplicate stage numbers and missing local sources without
/// writing anything.
pub fn validate(stages: &[Stage]) -> StageResult<()> {
    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.number) {
            return Err(StageError::InvalidStageDefinition(format!(
                "duplicate stage number {}",
                stage.number
            )));
        }
        if let Some(path) = stage.local_path() {
            if !path.exists() {
                return Err(StageError::InvalidStageDefinition(format!(
                    "stage {} references missing path {}",
                    stage.number,
                    path.display()
                )));
            }
        }
        if let StageKind::Directory { path, .. } = &stage.kind {
            if !path.is_dir() {
                return Err(StageError::InvalidStageDefinition(format!(
                    "stage {} expects a directory at {}",
                    stage.number,
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

// ── Internal helpers ───────────────────────────────────────────────

fn materialize(stage: &Stage, dir: &Path) -> StageResult<()> {
    let target = dir.join(stage.file_name());
    match &stage.kind {
        StageKind::Inline { command } => {
            let done = format!("stage-{}-done", stage.number);
            fs::write(&target, format!("#!/bin/bash\nset -e\n{command}\ntouch {done}\n"))?;
        }
        StageKind::Script { path, .. } | StageKind::Tar { path, .. } => {
            fs::copy(path, &target)?;
        }
        StageKind::Directory { path, .. } => copy_tree(path, &target)?,
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> StageResult<()> {
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            StageError::InvalidStageDefinition(format!("cannot read {}: {e}", src.display()))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StageError::InvalidStageDefinition(e.to_string()))?;
        let out = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&out)?;
        } else {
            fs::copy(entry.path(), &out)?;
        }
    }
    Ok(())
}
