//! Batch assembly on top of the preprocessing pool.
//!
//! Samples are drawn cyclically, so batch `k` covers sample indices
//! `(k * batch_size + j) % num_samples`; a capped run longer than one epoch
//! simply re-reads the dataset and every batch is full-sized. While the
//! caller consumes batch `k`, batch `k + 1` is already being preprocessed.

use std::sync::mpsc;
use std::sync::Arc;

use ndarray::Array2;

use crate::common::error::{EvalError, EvalResult};

use super::domain::{Dataset, Preprocessor};
use super::workers::Pool;

/// Model-ready inputs plus offset-adjusted labels.
#[derive(Clone, Debug)]
pub struct Batch {
    /// `[batch_size, height * width * 3]`.
    pub images: Array2<f32>,
    pub labels: Vec<i64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

type SlotResult = (usize, EvalResult<Vec<f32>>);

struct Pending {
    rx: mpsc::Receiver<SlotResult>,
    labels: Vec<i64>,
}

pub struct BatchLoader {
    dataset: Arc<dyn Dataset>,
    preprocessor: Arc<dyn Preprocessor>,
    pool: Pool,
    batch_size: usize,
    image_size: u32,
    labels_offset: usize,
}

impl BatchLoader {
    pub fn new(
        dataset: Arc<dyn Dataset>,
        preprocessor: Arc<dyn Preprocessor>,
        num_threads: usize,
        batch_size: usize,
        image_size: u32,
        labels_offset: usize,
    ) -> Self {
        Self {
            dataset,
            preprocessor,
            pool: Pool::new(num_threads),
            batch_size,
            image_size,
            labels_offset,
        }
    }

    /// Flattened length of one preprocessed sample.
    pub fn feature_len(&self) -> usize {
        let side = self.image_size as usize;
        side * side * 3
    }

    /// Dataset indices making up batch `batch_index`.
    pub fn sample_indices(&self, batch_index: usize) -> Vec<usize> {
        let total = self.dataset.num_samples();
        if total == 0 {
            return Vec::new();
        }
        let start = batch_index * self.batch_size;
        (start..start + self.batch_size).map(|i| i % total).collect()
    }

    /// Raw label shifted by the configured offset.
    pub fn offset_label(&self, raw: usize) -> i64 {
        raw as i64 - self.labels_offset as i64
    }

    /// Iterate over exactly `num_batches` batches.
    pub fn batches(&self, num_batches: usize) -> EvalResult<Batches<'_>> {
        if num_batches > 0 && self.dataset.num_samples() == 0 {
            return Err(EvalError::EmptyDataset(num_batches));
        }
        Ok(Batches {
            loader: self,
            next: 0,
            total: num_batches,
            pending: None,
        })
    }

    fn submit(&self, batch_index: usize) -> EvalResult<Pending> {
        let (tx, rx) = mpsc::channel();
        let indices = self.sample_indices(batch_index);
        let mut labels = Vec::with_capacity(indices.len());

        for (slot, sample) in indices.into_iter().enumerate() {
            labels.push(self.offset_label(self.dataset.label(sample)));
            let tx = tx.clone();
            let dataset = Arc::clone(&self.dataset);
            let preprocessor = Arc::clone(&self.preprocessor);
            let size = self.image_size;
            let queued = self.pool.submit(move || {
                let result = dataset
                    .load_image(sample)
                    .map(|image| preprocessor.preprocess(&image, size, size));
                let _ = tx.send((slot, result));
            });
            if !queued {
                return Err(EvalError::internal("preprocessing pool is not running"));
            }
        }

        Ok(Pending { rx, labels })
    }

    fn collect(&self, pending: Pending) -> EvalResult<Batch> {
        let rows = pending.labels.len();
        let width = self.feature_len();
        let mut slots: Vec<Option<Vec<f32>>> = vec![None; rows];

        for _ in 0..rows {
            let (slot, result) = pending
                .rx
                .recv()
                .map_err(|_| EvalError::internal("preprocessing worker exited early"))?;
            let features = result?;
            if features.len() != width {
                return Err(EvalError::Shape {
                    name: "preprocessed image".to_string(),
                    expected: vec![width],
                    found: vec![features.len()],
                });
            }
            slots[slot] = Some(features);
        }

        let mut data = Vec::with_capacity(rows * width);
        for features in slots.into_iter().flatten() {
            data.extend(features);
        }
        let images = Array2::from_shape_vec((rows, width), data)
            .map_err(|err| EvalError::internal(format!("batch assembly: {err}")))?;

        Ok(Batch {
            images,
            labels: pending.labels,
        })
    }
}

/// Iterator returned by [`BatchLoader::batches`].
pub struct Batches<'a> {
    loader: &'a BatchLoader,
    next: usize,
    total: usize,
    pending: Option<Pending>,
}

impl Iterator for Batches<'_> {
    type Item = EvalResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let current = match self.pending.take() {
            Some(pending) => pending,
            None => match self.loader.submit(self.next) {
                Ok(pending) => pending,
                Err(err) => {
                    self.next = self.total;
                    return Some(Err(err));
                }
            },
        };
        self.next += 1;

        if self.next < self.total {
            match self.loader.submit(self.next) {
                Ok(ahead) => self.pending = Some(ahead),
                Err(err) => {
                    self.next = self.total;
                    return Some(Err(err));
                }
            }
        }

        let batch = self.loader.collect(current);
        if batch.is_err() {
            self.next = self.total;
            self.pending = None;
        }
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total.saturating_sub(self.next);
        (left, Some(left))
    }
}
