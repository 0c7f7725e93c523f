//! Network selection and parameter restore.

use tracing::debug;

use crate::checkpoint::domain::CheckpointFile;
use crate::checkpoint::service::variables_to_restore;
use crate::common::error::{EvalError, EvalResult};

use super::domain::{Model, NetworkFn};
use super::networks::{LinearNet, MlpNet};

/// Select an architecture by name for `num_classes` outputs.
pub fn get_network_fn(name: &str, num_classes: usize) -> EvalResult<Box<dyn NetworkFn>> {
    if num_classes == 0 {
        return Err(EvalError::config(format!(
            "network '{name}' needs at least one class"
        )));
    }
    match name {
        "linear" => Ok(Box::new(LinearNet::new(num_classes))),
        "mlp" => Ok(Box::new(MlpNet::new(num_classes))),
        other => Err(EvalError::UnknownNetwork(other.to_string())),
    }
}

/// Restore `network` from a snapshot, optionally from its moving averages.
pub fn restore(
    network: &dyn NetworkFn,
    file: &CheckpointFile,
    input_len: usize,
    use_moving_averages: bool,
) -> EvalResult<Box<dyn Model>> {
    let names = network.variable_names();
    let variables = variables_to_restore(file, &names, use_moving_averages)?;
    debug!(
        network = network.name(),
        variables = variables.len(),
        moving_averages = use_moving_averages,
        "restoring parameters"
    );
    network.build(input_len, &variables)
}
