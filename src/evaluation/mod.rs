//! Evaluation: streaming metrics, per-checkpoint passes and the polling service.

pub mod domain;
pub mod metrics;
pub mod poller;
pub mod repo_fs;
pub mod seen;
pub mod service;

pub use domain::{MetricResult, PassReport, PassRunner, SummaryRecord, SummaryRepo};
pub use poller::{PollReport, Poller};
pub use service::{build_poller, EvalPass};
