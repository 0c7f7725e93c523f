//! Built-in preprocessing pipelines.

use image::imageops::{self, FilterType};

use super::domain::{Preprocessor, RawImage};

/// Resize to the target size and map `[0, 255]` linearly onto `[low, high]`.
#[derive(Clone, Debug)]
pub struct RangeScale {
    name: String,
    low: f32,
    high: f32,
}

impl RangeScale {
    pub fn new(name: impl Into<String>, low: f32, high: f32) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }

    /// Pixels in `[0, 1]`.
    pub fn unit(name: impl Into<String>) -> Self {
        Self::new(name, 0.0, 1.0)
    }

    /// Pixels in `[-1, 1]`, as MobileNet/Inception style networks expect.
    pub fn signed(name: impl Into<String>) -> Self {
        Self::new(name, -1.0, 1.0)
    }
}

impl Preprocessor for RangeScale {
    fn name(&self) -> &str {
        &self.name
    }

    fn preprocess(&self, image: &RawImage, height: u32, width: u32) -> Vec<f32> {
        let span = self.high - self.low;
        let resized;
        let source = if image.dimensions() == (width, height) {
            image
        } else {
            resized = imageops::resize(image, width, height, FilterType::Triangle);
            &resized
        };
        source
            .pixels()
            .flat_map(|px| px.0)
            .map(|v| self.low + (f32::from(v) / 255.0) * span)
            .collect()
    }
}
