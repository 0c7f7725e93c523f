//! Checkpoint discovery and parameter snapshot loading.

pub mod domain;
pub mod repo_fs;
pub mod service;

pub use domain::{Checkpoint, CheckpointFile, CheckpointId, CheckpointSource, CheckpointState, Variable};
pub use repo_fs::FsCheckpointRepo;
