//! Evaluation pass: restore a checkpoint, score the validation set, flush summaries.

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span};

use crate::checkpoint::domain::Checkpoint;
use crate::checkpoint::repo_fs::FsCheckpointRepo;
use crate::checkpoint::service::load_checkpoint;
use crate::common::config::EvalConfig;
use crate::common::error::{EvalError, EvalResult};
use crate::common::time;
use crate::data::batch::BatchLoader;
use crate::data::domain::Dataset;
use crate::data::service::{get_dataset, get_preprocessing};
use crate::model::domain::NetworkFn;
use crate::model::networks::argmax;
use crate::model::service::{get_network_fn, restore};

use super::domain::{PassReport, PassRunner, SummaryRecord, SummaryRepo};
use super::metrics::default_metrics;
use super::poller::Poller;
use super::repo_fs::FsSummaryRepo;
use super::seen::SeenLog;

/// Batches per pass: the explicit cap, or enough to cover the dataset once.
pub fn num_batches(num_samples: usize, batch_size: usize, max_num_batches: Option<usize>) -> usize {
    match max_num_batches {
        Some(cap) => cap,
        None => num_samples.div_ceil(batch_size.max(1)),
    }
}

/// Pass runner sharing one dataset and preprocessing pool across checkpoints.
pub struct EvalPass {
    loader: BatchLoader,
    network: Box<dyn NetworkFn>,
    summaries: Arc<dyn SummaryRepo>,
    num_batches: usize,
    use_moving_averages: bool,
}

impl EvalPass {
    pub fn new(
        cfg: &EvalConfig,
        dataset: Arc<dyn Dataset>,
        summaries: Arc<dyn SummaryRepo>,
    ) -> EvalResult<Self> {
        let num_classes = dataset
            .num_classes()
            .checked_sub(cfg.labels_offset)
            .ok_or_else(|| {
                EvalError::config(format!(
                    "labels offset {} exceeds the {} classes of '{}'",
                    cfg.labels_offset,
                    dataset.num_classes(),
                    dataset.name()
                ))
            })?;
        let network = get_network_fn(&cfg.model_name, num_classes)?;
        let preprocessor = get_preprocessing(cfg.preprocessing_name())?;
        let image_size = cfg
            .eval_image_size
            .unwrap_or_else(|| network.default_image_size());
        let num_batches = num_batches(dataset.num_samples(), cfg.batch_size, cfg.max_num_batches);

        info!(
            dataset = dataset.name(),
            samples = dataset.num_samples(),
            num_classes,
            network = network.name(),
            preprocessing = preprocessor.name(),
            image_size,
            num_batches,
            "evaluation pass configured"
        );

        let loader = BatchLoader::new(
            dataset,
            preprocessor,
            cfg.num_preprocessing_threads,
            cfg.batch_size,
            image_size,
            cfg.labels_offset,
        );
        Ok(Self {
            loader,
            network,
            summaries,
            num_batches,
            use_moving_averages: cfg.moving_average_decay.is_some(),
        })
    }
}

impl PassRunner for EvalPass {
    fn run_pass(&self, checkpoint: &Checkpoint) -> EvalResult<PassReport> {
        let span = info_span!("eval_pass", checkpoint = %checkpoint.id);
        let _guard = span.enter();
        info!("Evaluating {}", checkpoint.id);
        let started = Instant::now();

        let file = load_checkpoint(checkpoint)?;
        let model = restore(
            self.network.as_ref(),
            &file,
            self.loader.feature_len(),
            self.use_moving_averages,
        )?;

        let mut metrics = default_metrics();
        let mut batches = 0;
        let mut samples = 0;
        for batch in self.loader.batches(self.num_batches)? {
            let batch = batch?;
            let logits = model.logits(&batch.images)?;
            metrics.update(&argmax(&logits), &batch.labels);
            batches += 1;
            samples += batch.len();
        }

        let result = metrics.result();
        let wall_time_ms = time::now_ms() as u64;
        let records: Vec<SummaryRecord> = result
            .iter()
            .map(|(name, value)| SummaryRecord {
                checkpoint: checkpoint.id.clone(),
                global_step: file.global_step,
                tag: format!("eval/{name}"),
                value,
                wall_time_ms,
            })
            .collect();
        self.summaries.put_records(&records)?;
        for record in &records {
            info!(global_step = record.global_step, "{} = {:.6}", record.tag, record.value);
        }
        info!(
            batches,
            samples,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished evaluation"
        );

        Ok(PassReport {
            checkpoint: checkpoint.id.clone(),
            global_step: file.global_step,
            batches,
            samples,
            metrics: result,
        })
    }
}

/// Wire the filesystem collaborators described by `cfg` into a poller.
pub fn build_poller(cfg: &EvalConfig) -> EvalResult<Poller> {
    cfg.validate()?;
    let dataset = get_dataset(&cfg.dataset_name, &cfg.dataset_split_name, &cfg.dataset_dir)?;
    fs::create_dir_all(&cfg.eval_dir)?;

    let summaries = Arc::new(FsSummaryRepo::new(cfg.summaries_path()));
    let runner = Arc::new(EvalPass::new(cfg, dataset, summaries)?);
    let seen = if cfg.persist_seen {
        SeenLog::open(cfg.seen_log_path())?
    } else {
        SeenLog::in_memory()
    };
    let source =
        Arc::new(FsCheckpointRepo::new(&cfg.checkpoint_path).with_settle(cfg.poll_interval));
    Ok(Poller::new(source, runner, seen, cfg.poll_interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::domain::{CheckpointFile, Variable};
    use crate::data::domain::InMemoryDataset;
    use crate::data::repo_fs::tests::write_png;
    use crate::model::networks::LinearNet;
    use image::{Rgb, RgbImage};

    #[test]
    fn batch_count_covers_dataset_once() {
        assert_eq!(num_batches(600, 60, None), 10);
        assert_eq!(num_batches(601, 60, None), 11);
        assert_eq!(num_batches(59, 60, None), 1);
        assert_eq!(num_batches(0, 60, None), 0);
    }

    #[test]
    fn explicit_cap_wins() {
        assert_eq!(num_batches(600, 60, Some(3)), 3);
        assert_eq!(num_batches(10, 60, Some(25)), 25);
    }

    /// Two classes: dark images are class 0, bright images class 1.
    fn shaded_dataset(per_class: usize, offset: usize) -> Arc<dyn Dataset> {
        let mut samples = Vec::new();
        for i in 0..per_class * 2 {
            let class = i % 2;
            let shade = if class == 0 { 0 } else { 255 };
            samples.push((RgbImage::from_pixel(1, 1, Rgb([shade, shade, shade])), class + offset));
        }
        Arc::new(InMemoryDataset::new("mem", 2 + offset, samples).unwrap())
    }

    /// Weights scoring class 1 by brightness; `invert` flips the decision.
    fn linear_vars(invert: bool) -> (Variable, Variable) {
        let sign = if invert { -1.0 } else { 1.0 };
        let (w0, w1) = (-sign, sign);
        (
            Variable::new(vec![3, 2], vec![w0, w1, w0, w1, w0, w1]),
            Variable::new(vec![2], vec![0.5 * sign, -0.5 * sign]),
        )
    }

    fn write_checkpoint(dir: &std::path::Path, name: &str, step: u64, with_averages: bool) -> Checkpoint {
        let mut file = CheckpointFile {
            global_step: step,
            ..Default::default()
        };
        let (w, b) = linear_vars(with_averages);
        file.variables.insert(LinearNet::WEIGHTS.into(), w);
        file.variables.insert(LinearNet::BIASES.into(), b);
        if with_averages {
            let (w, b) = linear_vars(false);
            file.variables
                .insert(CheckpointFile::average_name(LinearNet::WEIGHTS), w);
            file.variables
                .insert(CheckpointFile::average_name(LinearNet::BIASES), b);
        }
        FsCheckpointRepo::new(dir).put_checkpoint(name, &file).unwrap()
    }

    fn config(dir: &std::path::Path) -> EvalConfig {
        let mut cfg = EvalConfig::new(dir);
        cfg.eval_image_size = Some(1);
        cfg.num_preprocessing_threads = 2;
        cfg.preprocessing_name = Some("plain".into());
        cfg
    }

    #[test]
    fn pass_scores_and_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.batch_size = 3;
        let summaries = Arc::new(FsSummaryRepo::new(dir.path().join("summaries.jsonl")));
        let pass = EvalPass::new(&cfg, shaded_dataset(5, 0), summaries.clone()).unwrap();
        assert_eq!(pass.num_batches, 4);

        let ckpt = write_checkpoint(&dir.path().join("ckpts"), "model.ckpt-100", 100, false);
        let report = pass.run_pass(&ckpt).unwrap();
        assert_eq!(report.global_step, 100);
        assert_eq!(report.batches, 4);
        assert_eq!(report.samples, 12);
        assert_eq!(report.metrics.get("Accuracy"), Some(1.0));

        let records = summaries.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tag, "eval/Accuracy");
        assert_eq!(records[0].global_step, 100);
        assert_eq!(records[0].checkpoint, ckpt.id);
    }

    #[test]
    fn dataset_of_600_runs_ten_batches() {
        let dir = tempfile::tempdir().unwrap();
        let summaries = Arc::new(FsSummaryRepo::new(dir.path().join("s.jsonl")));
        let pass = EvalPass::new(&config(dir.path()), shaded_dataset(300, 0), summaries).unwrap();
        let ckpt = write_checkpoint(dir.path(), "model.ckpt-1", 1, false);
        let report = pass.run_pass(&ckpt).unwrap();
        assert_eq!(report.batches, 10);
        assert_eq!(report.samples, 600);
    }

    #[test]
    fn cap_fixes_batch_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.batch_size = 4;
        cfg.max_num_batches = Some(7);
        let summaries = Arc::new(FsSummaryRepo::new(dir.path().join("s.jsonl")));
        let pass = EvalPass::new(&cfg, shaded_dataset(3, 0), summaries).unwrap();
        let report = pass.run_pass(&write_checkpoint(dir.path(), "ckpt-2", 2, false)).unwrap();
        assert_eq!(report.batches, 7);
        assert_eq!(report.samples, 28);
    }

    #[test]
    fn labels_offset_is_applied_before_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.labels_offset = 1;
        let summaries = Arc::new(FsSummaryRepo::new(dir.path().join("s.jsonl")));
        // raw labels are 1 and 2; the network has 2 outputs
        let pass = EvalPass::new(&cfg, shaded_dataset(4, 1), summaries).unwrap();
        let report = pass.run_pass(&write_checkpoint(dir.path(), "ckpt-3", 3, false)).unwrap();
        assert_eq!(report.metrics.get("Accuracy"), Some(1.0));
    }

    #[test]
    fn moving_average_decay_restores_smoothed_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let summaries = Arc::new(FsSummaryRepo::new(dir.path().join("s.jsonl")));
        // raw weights are inverted, the averaged ones are correct
        let ckpt = write_checkpoint(dir.path(), "ckpt-4", 4, true);

        let raw = EvalPass::new(&config(dir.path()), shaded_dataset(4, 0), summaries.clone())
            .unwrap()
            .run_pass(&ckpt)
            .unwrap();
        assert_eq!(raw.metrics.get("Accuracy"), Some(0.0));

        let mut cfg = config(dir.path());
        cfg.moving_average_decay = Some(0.99);
        let smoothed = EvalPass::new(&cfg, shaded_dataset(4, 0), summaries)
            .unwrap()
            .run_pass(&ckpt)
            .unwrap();
        assert_eq!(smoothed.metrics.get("Accuracy"), Some(1.0));
    }

    #[test]
    fn empty_dataset_restores_then_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let summaries = Arc::new(FsSummaryRepo::new(dir.path().join("s.jsonl")));
        let empty: Arc<dyn Dataset> = Arc::new(InMemoryDataset::new("mem", 2, Vec::new()).unwrap());
        let pass = EvalPass::new(&config(dir.path()), empty, summaries).unwrap();
        assert_eq!(pass.num_batches, 0);

        let report = pass.run_pass(&write_checkpoint(dir.path(), "ckpt-5", 5, false)).unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(report.metrics.get("Accuracy"), Some(0.0));

        let missing = Checkpoint::from_path(dir.path().join("ckpt-404"));
        assert!(pass.run_pass(&missing).is_err());
    }

    #[test]
    fn offset_larger_than_class_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.labels_offset = 5;
        let summaries = Arc::new(FsSummaryRepo::new(dir.path().join("s.jsonl")));
        assert!(EvalPass::new(&cfg, shaded_dataset(1, 0), summaries).is_err());
    }

    #[tokio::test]
    async fn build_poller_wires_filesystem_collaborators() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        write_png(&data.join("valid/bright/a.png"), 255);
        write_png(&data.join("valid/dark/a.png"), 0);

        let mut cfg = EvalConfig::new(&data);
        cfg.dataset_name = "image_folder".into();
        cfg.checkpoint_path = dir.path().join("ckpts");
        cfg.eval_dir = dir.path().join("eval");
        cfg.eval_image_size = Some(1);
        cfg.preprocessing_name = Some("plain".into());
        write_checkpoint(&cfg.checkpoint_path, "model.ckpt-10", 10, false);

        let mut poller = build_poller(&cfg).unwrap();
        let report = poller.poll_once().await;
        assert_eq!(report.evaluated.len(), 1);

        let records = FsSummaryRepo::new(cfg.summaries_path()).read_all().unwrap();
        assert_eq!(records.len(), 1);
        // "bright" sorts first, so labels are inverted relative to the weights
        assert_eq!(records[0].value, 0.0);
        assert!(cfg.seen_log_path().exists());
    }

    #[test]
    fn build_poller_requires_dataset_dir() {
        let cfg = EvalConfig::new("");
        assert!(matches!(build_poller(&cfg), Err(EvalError::Config(_))));
    }
}
