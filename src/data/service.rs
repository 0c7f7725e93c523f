//! Name-based factories for datasets and preprocessing pipelines.

use std::path::Path;
use std::sync::Arc;

use crate::common::error::{EvalError, EvalResult};

use super::domain::{Dataset, Preprocessor};
use super::preprocess::RangeScale;
use super::repo_fs::ImageFolderDataset;

/// Class count a named dataset must have, `None` when any count is accepted.
pub fn expected_classes(name: &str) -> EvalResult<Option<usize>> {
    match name {
        "image_folder" => Ok(None),
        "jaffe" | "fer2013" => Ok(Some(7)),
        other => Err(EvalError::UnknownDataset(other.to_string())),
    }
}

/// Open the split of a named dataset stored under `dir`.
pub fn get_dataset(name: &str, split: &str, dir: &Path) -> EvalResult<Arc<dyn Dataset>> {
    let expected = expected_classes(name)?;
    let dataset = ImageFolderDataset::open(name, dir, split)?;
    if let Some(expected) = expected {
        if dataset.num_classes() != expected {
            return Err(EvalError::Dataset(format!(
                "dataset '{name}' expects {expected} classes, found {} under {}",
                dataset.num_classes(),
                dataset.root().display()
            )));
        }
    }
    Ok(Arc::new(dataset))
}

/// Select an evaluation-time preprocessing pipeline by name.
pub fn get_preprocessing(name: &str) -> EvalResult<Arc<dyn Preprocessor>> {
    match name {
        "mobilenet_v1" | "inception" => Ok(Arc::new(RangeScale::signed(name))),
        "linear" | "mlp" | "plain" => Ok(Arc::new(RangeScale::unit(name))),
        other => Err(EvalError::UnknownPreprocessing(other.to_string())),
    }
}
