//! Domain primitives for evaluation passes and their summaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checkpoint::domain::{Checkpoint, CheckpointId};
use crate::common::error::EvalResult;

/// Metric name to scalar value for one pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricResult {
    values: BTreeMap<String, f64>,
}

impl MetricResult {
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    #[cfg(test)]
    pub(crate) fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }
}

/// One scalar summary written per metric per checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub checkpoint: CheckpointId,
    pub global_step: u64,
    /// `eval/<metric>`.
    pub tag: String,
    pub value: f64,
    pub wall_time_ms: u64,
}

/// Outcome of a completed evaluation pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PassReport {
    pub checkpoint: CheckpointId,
    pub global_step: u64,
    pub batches: usize,
    pub samples: usize,
    pub metrics: MetricResult,
}

/// Sink for summary records.
pub trait SummaryRepo: Send + Sync {
    fn put_records(&self, records: &[SummaryRecord]) -> EvalResult<()>;
}

/// Runs one evaluation pass against a checkpoint.
pub trait PassRunner: Send + Sync {
    fn run_pass(&self, checkpoint: &Checkpoint) -> EvalResult<PassReport>;
}
