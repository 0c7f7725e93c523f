//! Checkpoint identities, listings and the persisted parameter snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::error::EvalResult;

/// Suffix the trainer appends to moving-average shadow variables.
pub const MOVING_AVERAGE_SUFFIX: &str = "ExponentialMovingAverage";

/// Identifier for a checkpoint: the path as listed by the source.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A checkpoint listed by a [`CheckpointSource`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub path: PathBuf,
    /// Step parsed from the `-<digits>` file name suffix, when present.
    pub global_step: Option<u64>,
}

impl Checkpoint {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let global_step = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(parse_global_step);
        Self {
            id: CheckpointId::new(path.to_string_lossy()),
            path,
            global_step,
        }
    }
}

/// Parse the training step out of names like `model.ckpt-1200` or `ckpt-7.json`.
pub fn parse_global_step(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    let (_, digits) = stem.rsplit_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Snapshot of what a checkpoint directory currently lists.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CheckpointState {
    /// Most recent checkpoint, if any.
    pub latest: Option<Checkpoint>,
    /// Every listed checkpoint, oldest first.
    pub all: Vec<Checkpoint>,
}

impl CheckpointState {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

/// Where the poller discovers checkpoints.
pub trait CheckpointSource: Send + Sync {
    fn checkpoint_state(&self) -> EvalResult<CheckpointState>;

    /// Location being watched, for log lines.
    fn location(&self) -> &Path;
}

/// A single named tensor stored in a checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Variable {
    #[cfg(test)]
    pub(crate) fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// On-disk parameter snapshot written by the trainer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub global_step: u64,
    pub variables: BTreeMap<String, Variable>,
}

impl CheckpointFile {
    /// Name of the moving-average shadow for a model variable.
    pub fn average_name(name: &str) -> String {
        format!("{name}/{MOVING_AVERAGE_SUFFIX}")
    }
}
