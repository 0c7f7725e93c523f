//! Streaming metrics accumulated batch by batch.

use super::domain::MetricResult;

pub trait StreamingMetric: Send {
    fn update(&mut self, predictions: &[i64], labels: &[i64]);
    fn value(&self) -> f64;
}

/// Fraction of predictions equal to their label; `0.0` before any update.
#[derive(Clone, Debug, Default)]
pub struct StreamingAccuracy {
    correct: u64,
    total: u64,
}

impl StreamingMetric for StreamingAccuracy {
    fn update(&mut self, predictions: &[i64], labels: &[i64]) {
        debug_assert_eq!(predictions.len(), labels.len());
        for (pred, label) in predictions.iter().zip(labels) {
            self.total += 1;
            if pred == label {
                self.correct += 1;
            }
        }
    }

    fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Named collection of streaming metrics updated together.
#[derive(Default)]
pub struct MetricMap {
    metrics: Vec<(String, Box<dyn StreamingMetric>)>,
}

impl MetricMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, metric: impl StreamingMetric + 'static) -> Self {
        self.metrics.push((name.into(), Box::new(metric)));
        self
    }

    pub fn update(&mut self, predictions: &[i64], labels: &[i64]) {
        for (_, metric) in &mut self.metrics {
            metric.update(predictions, labels);
        }
    }

    pub fn result(&self) -> MetricResult {
        let mut result = MetricResult::default();
        for (name, metric) in &self.metrics {
            result.insert(name.clone(), metric.value());
        }
        result
    }
}

/// Metrics reported for every checkpoint.
pub fn default_metrics() -> MetricMap {
    MetricMap::new().with("Accuracy", StreamingAccuracy::default())
}
