//! Built-in classifiers over flattened pixels.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};

use crate::checkpoint::domain::Variable;
use crate::common::error::{EvalError, EvalResult};

use super::domain::{Model, NetworkFn};

fn take_matrix(
    vars: &BTreeMap<String, Variable>,
    name: &str,
    rows: Option<usize>,
    cols: Option<usize>,
) -> EvalResult<Array2<f32>> {
    let var = vars
        .get(name)
        .ok_or_else(|| EvalError::MissingVariable(name.to_string()))?;
    let shape_ok = var.shape.len() == 2
        && rows.map_or(true, |r| var.shape[0] == r)
        && cols.map_or(true, |c| var.shape[1] == c);
    if !shape_ok {
        return Err(EvalError::Shape {
            name: name.to_string(),
            expected: vec![rows.unwrap_or(0), cols.unwrap_or(0)],
            found: var.shape.clone(),
        });
    }
    Array2::from_shape_vec((var.shape[0], var.shape[1]), var.data.clone())
        .map_err(|err| EvalError::internal(format!("{name}: {err}")))
}

fn take_vector(vars: &BTreeMap<String, Variable>, name: &str, len: usize) -> EvalResult<Array1<f32>> {
    let var = vars
        .get(name)
        .ok_or_else(|| EvalError::MissingVariable(name.to_string()))?;
    if var.shape != [len] {
        return Err(EvalError::Shape {
            name: name.to_string(),
            expected: vec![len],
            found: var.shape.clone(),
        });
    }
    Ok(Array1::from_vec(var.data.clone()))
}

fn check_input(images: &Array2<f32>, input_len: usize) -> EvalResult<()> {
    if images.ncols() != input_len {
        return Err(EvalError::Shape {
            name: "input".to_string(),
            expected: vec![images.nrows(), input_len],
            found: vec![images.nrows(), images.ncols()],
        });
    }
    Ok(())
}

/// Softmax-regression style classifier: `logits = x W + b`.
pub struct LinearNet {
    num_classes: usize,
}

impl LinearNet {
    pub const WEIGHTS: &'static str = "linear/weights";
    pub const BIASES: &'static str = "linear/biases";

    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl NetworkFn for LinearNet {
    fn name(&self) -> &str {
        "linear"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn default_image_size(&self) -> u32 {
        48
    }

    fn variable_names(&self) -> Vec<String> {
        vec![Self::WEIGHTS.to_string(), Self::BIASES.to_string()]
    }

    fn build(
        &self,
        input_len: usize,
        variables: &BTreeMap<String, Variable>,
    ) -> EvalResult<Box<dyn Model>> {
        let weights = take_matrix(variables, Self::WEIGHTS, Some(input_len), Some(self.num_classes))?;
        let biases = take_vector(variables, Self::BIASES, self.num_classes)?;
        Ok(Box::new(Linear { weights, biases }))
    }
}

pub struct Linear {
    weights: Array2<f32>,
    biases: Array1<f32>,
}

impl Model for Linear {
    fn num_classes(&self) -> usize {
        self.biases.len()
    }

    fn input_len(&self) -> usize {
        self.weights.nrows()
    }

    fn logits(&self, images: &Array2<f32>) -> EvalResult<Array2<f32>> {
        check_input(images, self.input_len())?;
        Ok(images.dot(&self.weights) + &self.biases)
    }
}

/// One ReLU hidden layer; the hidden width is read from the checkpoint.
pub struct MlpNet {
    num_classes: usize,
}

impl MlpNet {
    pub const HIDDEN_WEIGHTS: &'static str = "mlp/hidden/weights";
    pub const HIDDEN_BIASES: &'static str = "mlp/hidden/biases";
    pub const LOGITS_WEIGHTS: &'static str = "mlp/logits/weights";
    pub const LOGITS_BIASES: &'static str = "mlp/logits/biases";

    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl NetworkFn for MlpNet {
    fn name(&self) -> &str {
        "mlp"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn default_image_size(&self) -> u32 {
        48
    }

    fn variable_names(&self) -> Vec<String> {
        [
            Self::HIDDEN_WEIGHTS,
            Self::HIDDEN_BIASES,
            Self::LOGITS_WEIGHTS,
            Self::LOGITS_BIASES,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn build(
        &self,
        input_len: usize,
        variables: &BTreeMap<String, Variable>,
    ) -> EvalResult<Box<dyn Model>> {
        let hidden_w = take_matrix(variables, Self::HIDDEN_WEIGHTS, Some(input_len), None)?;
        let width = hidden_w.ncols();
        let hidden_b = take_vector(variables, Self::HIDDEN_BIASES, width)?;
        let out_w = take_matrix(variables, Self::LOGITS_WEIGHTS, Some(width), Some(self.num_classes))?;
        let out_b = take_vector(variables, Self::LOGITS_BIASES, self.num_classes)?;
        Ok(Box::new(Mlp {
            hidden_w,
            hidden_b,
            out_w,
            out_b,
        }))
    }
}

pub struct Mlp {
    hidden_w: Array2<f32>,
    hidden_b: Array1<f32>,
    out_w: Array2<f32>,
    out_b: Array1<f32>,
}

impl Model for Mlp {
    fn num_classes(&self) -> usize {
        self.out_b.len()
    }

    fn input_len(&self) -> usize {
        self.hidden_w.nrows()
    }

    fn logits(&self, images: &Array2<f32>) -> EvalResult<Array2<f32>> {
        check_input(images, self.input_len())?;
        let hidden = (images.dot(&self.hidden_w) + &self.hidden_b).mapv(|v| v.max(0.0));
        Ok(hidden.dot(&self.out_w) + &self.out_b)
    }
}

/// Index of the highest score in each row; ties resolve to the lowest index.
pub fn argmax(logits: &Array2<f32>) -> Vec<i64> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0usize;
            for (idx, &value) in row.iter().enumerate() {
                if value > row[best] {
                    best = idx;
                }
            }
            best as i64
        })
        .collect()
}
