//! Filesystem checkpoint source.
//!
//! A directory is listed through its `checkpoint` index file when one exists
//! (`model_checkpoint_path: "..."` / `all_model_checkpoint_paths: "..."`),
//! otherwise by scanning for files ending in `-<step>`. A path that points at
//! a file is treated as the only checkpoint.
//!
//! The index is only rewritten once a checkpoint is complete. A scan has no
//! such signal, so it lists a file only after it has gone unmodified for the
//! settle window; files younger than that may still be mid-write.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::common::error::{EvalError, EvalResult};

use super::domain::{parse_global_step, Checkpoint, CheckpointSource, CheckpointState};

/// Name of the index file maintained next to the checkpoints.
pub const INDEX_FILE: &str = "checkpoint";

/// Checkpoint source rooted at a directory or a single checkpoint file.
pub struct FsCheckpointRepo {
    root: PathBuf,
    settle: Duration,
}

impl FsCheckpointRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            settle: Duration::ZERO,
        }
    }

    /// Scanned files must be at least `settle` old before they are listed.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn resolve(&self, listed: &str) -> PathBuf {
        let path = Path::new(listed);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn read_index(&self, index: &Path) -> EvalResult<CheckpointState> {
        let raw = fs::read_to_string(index)?;
        let mut latest = None;
        let mut all = Vec::new();

        for line in raw.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = unquote(value.trim());
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "model_checkpoint_path" => {
                    latest = Some(Checkpoint::from_path(self.resolve(&value)))
                }
                "all_model_checkpoint_paths" => {
                    all.push(Checkpoint::from_path(self.resolve(&value)))
                }
                other => debug!(key = other, "ignoring unknown checkpoint index key"),
            }
        }

        if all.is_empty() {
            all.extend(latest.clone());
        }
        Ok(CheckpointState { latest, all })
    }

    fn scan_dir(&self) -> EvalResult<CheckpointState> {
        let mut all = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if parse_global_step(name).is_none() {
                continue;
            }
            if !self.is_settled(&entry.metadata()?) {
                debug!(file = name, "checkpoint still being written, deferring");
                continue;
            }
            all.push(Checkpoint::from_path(entry.path()));
        }
        all.sort_by(|a, b| a.global_step.cmp(&b.global_step).then(a.path.cmp(&b.path)));
        Ok(CheckpointState {
            latest: all.last().cloned(),
            all,
        })
    }

    fn is_settled(&self, meta: &fs::Metadata) -> bool {
        if self.settle.is_zero() {
            return true;
        }
        meta.modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= self.settle)
    }
}

impl CheckpointSource for FsCheckpointRepo {
    fn checkpoint_state(&self) -> EvalResult<CheckpointState> {
        if self.root.is_file() {
            let only = Checkpoint::from_path(&self.root);
            return Ok(CheckpointState {
                latest: Some(only.clone()),
                all: vec![only],
            });
        }
        if !self.root.is_dir() {
            return Err(EvalError::checkpoint(&self.root, "no such checkpoint directory"));
        }

        let index = self.index_path();
        if index.is_file() {
            self.read_index(&index)
        } else {
            self.scan_dir()
        }
    }

    fn location(&self) -> &Path {
        &self.root
    }
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    inner.replace("\\\"", "\"").replace("\\\\", "\\")
}

#[cfg(test)]
impl FsCheckpointRepo {
    /// Write a snapshot as `<root>/<name>` and register it in the index.
    pub(crate) fn put_checkpoint(
        &self,
        name: &str,
        file: &super::domain::CheckpointFile,
    ) -> EvalResult<Checkpoint> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(name);
        fs::write(&path, serde_json::to_vec(file)?)?;

        let mut listed: Vec<String> = match self.read_index(&self.index_path()) {
            Ok(state) => state
                .all
                .iter()
                .map(|ckpt| ckpt.path.to_string_lossy().into_owned())
                .collect(),
            Err(EvalError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        let current = path.to_string_lossy().into_owned();
        listed.retain(|existing| existing != &current);
        listed.push(current.clone());

        let mut index = format!("model_checkpoint_path: \"{current}\"\n");
        for entry in &listed {
            index.push_str(&format!("all_model_checkpoint_paths: \"{entry}\"\n"));
        }
        let staged = self.root.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&staged, index)?;
        fs::rename(&staged, self.index_path())?;

        Ok(Checkpoint::from_path(path))
    }
}
