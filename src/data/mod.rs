//! Data domain: validation datasets, preprocessing and batching.

pub mod batch;
pub mod domain;
pub mod preprocess;
pub mod repo_fs;
pub mod service;
pub mod workers;

pub use batch::{Batch, BatchLoader};
pub use domain::{Dataset, InMemoryDataset, Preprocessor, RawImage};
