//! Set of checkpoints already evaluated, optionally backed by an append-only log.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::info;

use crate::checkpoint::domain::CheckpointId;
use crate::common::error::EvalResult;

#[derive(Debug, Default)]
pub struct SeenLog {
    ids: HashSet<CheckpointId>,
    log: Option<PathBuf>,
}

impl SeenLog {
    /// Forget everything when the process exits.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load ids recorded by earlier runs from `path`, one per line.
    pub fn open(path: impl Into<PathBuf>) -> EvalResult<Self> {
        let path = path.into();
        let mut ids = HashSet::new();
        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                let line = line.trim();
                if !line.is_empty() {
                    ids.insert(CheckpointId::new(line));
                }
            }
            info!(path = %path.display(), count = ids.len(), "loaded evaluated checkpoints");
        }
        Ok(Self {
            ids,
            log: Some(path),
        })
    }

    pub fn contains(&self, id: &CheckpointId) -> bool {
        self.ids.contains(id)
    }

    /// Record `id`. It is kept in memory even if appending to the log fails.
    pub fn insert(&mut self, id: CheckpointId) -> EvalResult<bool> {
        if self.ids.contains(&id) {
            return Ok(false);
        }
        let line = format!("{id}\n");
        self.ids.insert(id);
        if let Some(path) = &self.log {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            file.write_all(line.as_bytes())?;
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_novelty() {
        let mut seen = SeenLog::in_memory();
        assert!(seen.insert(CheckpointId::new("a")).unwrap());
        assert!(!seen.insert(CheckpointId::new("a")).unwrap());
        assert_eq!(seen.len(), 1);
        assert!(seen.log.is_none());
    }

    #[test]
    fn log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval/evaluated.log");
        {
            let mut seen = SeenLog::open(&path).unwrap();
            assert!(seen.is_empty());
            seen.insert(CheckpointId::new("/ckpt/model.ckpt-1")).unwrap();
            seen.insert(CheckpointId::new("/ckpt/model.ckpt-2")).unwrap();
        }
        let reopened = SeenLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains(&CheckpointId::new("/ckpt/model.ckpt-2")));
    }

    #[test]
    fn failed_append_still_remembers_id() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the log file should be makes the append fail
        let path = dir.path().join("evaluated.log");
        fs::create_dir(&path).unwrap();
        let mut seen = SeenLog {
            ids: HashSet::new(),
            log: Some(path),
        };
        assert!(seen.insert(CheckpointId::new("x")).is_err());
        assert!(seen.contains(&CheckpointId::new("x")));
    }
}
