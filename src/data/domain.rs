//! Core dataset and preprocessing contracts.

use image::RgbImage;

use crate::common::error::{EvalError, EvalResult};

/// Decoded sample as handed to a [`Preprocessor`].
pub type RawImage = RgbImage;

/// Labeled validation samples addressed by index.
pub trait Dataset: Send + Sync {
    fn name(&self) -> &str;
    fn num_samples(&self) -> usize;
    fn num_classes(&self) -> usize;

    /// Raw label of sample `index`, before any offset is applied.
    fn label(&self, index: usize) -> usize;

    /// Decode sample `index`; called from preprocessing workers.
    fn load_image(&self, index: usize) -> EvalResult<RawImage>;
}

/// Maps a raw image to a flattened, model-ready tensor.
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;

    /// Output is `height * width * 3` floats in HWC order.
    fn preprocess(&self, image: &RawImage, height: u32, width: u32) -> Vec<f32>;
}

/// Dataset held entirely in memory; handy for embedding and tests.
pub struct InMemoryDataset {
    name: String,
    num_classes: usize,
    samples: Vec<(RawImage, usize)>,
}

impl InMemoryDataset {
    pub fn new(
        name: impl Into<String>,
        num_classes: usize,
        samples: Vec<(RawImage, usize)>,
    ) -> EvalResult<Self> {
        if let Some((_, label)) = samples.iter().find(|(_, label)| *label >= num_classes) {
            return Err(EvalError::Dataset(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }
        Ok(Self {
            name: name.into(),
            num_classes,
            samples,
        })
    }
}

impl Dataset for InMemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn label(&self, index: usize) -> usize {
        self.samples[index].1
    }

    fn load_image(&self, index: usize) -> EvalResult<RawImage> {
        Ok(self.samples[index].0.clone())
    }
}
