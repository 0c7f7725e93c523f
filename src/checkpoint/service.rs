//! Loading parameter snapshots and choosing which variables to restore.

use std::collections::BTreeMap;
use std::fs;

use tracing::debug;

use crate::common::error::{EvalError, EvalResult};

use super::domain::{Checkpoint, CheckpointFile, Variable};

/// Read and decode the snapshot behind a listed checkpoint.
pub fn load_checkpoint(checkpoint: &Checkpoint) -> EvalResult<CheckpointFile> {
    let raw = fs::read(&checkpoint.path)
        .map_err(|err| EvalError::checkpoint(&checkpoint.path, err.to_string()))?;
    let file: CheckpointFile = serde_json::from_slice(&raw)
        .map_err(|err| EvalError::checkpoint(&checkpoint.path, err.to_string()))?;

    for (name, var) in &file.variables {
        if var.element_count() != var.data.len() {
            return Err(EvalError::checkpoint(
                &checkpoint.path,
                format!(
                    "variable '{name}' declares {} elements but stores {}",
                    var.element_count(),
                    var.data.len()
                ),
            ));
        }
    }
    debug!(
        checkpoint = %checkpoint.id,
        variables = file.variables.len(),
        global_step = file.global_step,
        "loaded checkpoint"
    );
    Ok(file)
}

/// Pick the stored tensor for each model variable.
///
/// With `use_moving_averages` the `/ExponentialMovingAverage` shadow is
/// restored in place of the raw variable; a missing shadow is an error.
pub fn variables_to_restore(
    file: &CheckpointFile,
    model_variables: &[String],
    use_moving_averages: bool,
) -> EvalResult<BTreeMap<String, Variable>> {
    model_variables
        .iter()
        .map(|name| {
            let stored = if use_moving_averages {
                CheckpointFile::average_name(name)
            } else {
                name.clone()
            };
            file.variables
                .get(&stored)
                .cloned()
                .map(|var| (name.clone(), var))
                .ok_or(EvalError::MissingVariable(stored))
        })
        .collect()
}
