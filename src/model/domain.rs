//! Model contracts: an architecture (`NetworkFn`) and its restored instance (`Model`).

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::checkpoint::domain::Variable;
use crate::common::error::EvalResult;

/// A network with parameters loaded, ready to score batches.
pub trait Model: Send {
    fn num_classes(&self) -> usize;

    /// Flattened input length the first layer expects.
    fn input_len(&self) -> usize;

    /// `[batch, input_len]` inputs to `[batch, num_classes]` class scores.
    fn logits(&self, images: &Array2<f32>) -> EvalResult<Array2<f32>>;
}

/// Architecture selected by name, before any parameters are restored.
pub trait NetworkFn: Send + Sync {
    fn name(&self) -> &str;
    fn num_classes(&self) -> usize;
    fn default_image_size(&self) -> u32;

    /// Names of the trainable variables the checkpoint must provide.
    fn variable_names(&self) -> Vec<String>;

    /// Build a model from restored variables keyed by [`Self::variable_names`].
    fn build(
        &self,
        input_len: usize,
        variables: &BTreeMap<String, Variable>,
    ) -> EvalResult<Box<dyn Model>>;
}
