//! Startup configuration parsed from flags and environment variables.
//!
//! `EvalArgs` is the raw command-line surface; `EvalConfig` is the validated,
//! immutable snapshot handed to every component at construction.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::common::error::{EvalError, EvalResult};

/// Seconds between checkpoint directory polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Continuously evaluate new checkpoints of an image classifier.
#[derive(Parser, Debug, Clone)]
#[command(name = "evalpoll", version, about, long_about = None)]
pub struct EvalArgs {
    /// The number of samples in each batch.
    #[arg(long, env = "EVALPOLL_BATCH_SIZE", default_value_t = 60)]
    pub batch_size: usize,

    /// Max number of batches to evaluate; by default one pass over the dataset.
    #[arg(long, env = "EVALPOLL_MAX_NUM_BATCHES")]
    pub max_num_batches: Option<usize>,

    /// Directory the trainer writes checkpoints to, or a single checkpoint file.
    #[arg(long, env = "EVALPOLL_CHECKPOINT_PATH", default_value = "./checkpoints")]
    pub checkpoint_path: PathBuf,

    /// Directory where summaries and the evaluated-checkpoint log are written.
    #[arg(long, env = "EVALPOLL_EVAL_DIR", default_value = "./eval")]
    pub eval_dir: PathBuf,

    /// Worker threads used to decode and preprocess samples.
    #[arg(long, env = "EVALPOLL_NUM_PREPROCESSING_THREADS", default_value_t = 4)]
    pub num_preprocessing_threads: usize,

    /// The name of the dataset to load.
    #[arg(long, env = "EVALPOLL_DATASET_NAME", default_value = "jaffe")]
    pub dataset_name: String,

    /// The name of the split to evaluate.
    #[arg(long, env = "EVALPOLL_DATASET_SPLIT_NAME", default_value = "valid")]
    pub dataset_split_name: String,

    /// The directory where the dataset files are stored.
    #[arg(long, env = "EVALPOLL_DATASET_DIR", default_value = "")]
    pub dataset_dir: String,

    /// Subtracted from every raw label before scoring.
    #[arg(long, env = "EVALPOLL_LABELS_OFFSET", default_value_t = 0)]
    pub labels_offset: usize,

    /// The name of the architecture to evaluate.
    #[arg(long, env = "EVALPOLL_MODEL_NAME", default_value = "linear")]
    pub model_name: String,

    /// Preprocessing pipeline; defaults to the one paired with the model.
    #[arg(long, env = "EVALPOLL_PREPROCESSING_NAME")]
    pub preprocessing_name: Option<String>,

    /// Restore exponential moving averages instead of raw parameters.
    #[arg(long, env = "EVALPOLL_MOVING_AVERAGE_DECAY")]
    pub moving_average_decay: Option<f32>,

    /// Square input size; 0 uses the network default.
    #[arg(long, env = "EVALPOLL_EVAL_IMAGE_SIZE", default_value_t = 48)]
    pub eval_image_size: u32,

    /// Seconds to wait between checkpoint directory polls; also how long a
    /// scanned checkpoint must sit unmodified before it is evaluated.
    #[arg(long, env = "EVALPOLL_POLL_INTERVAL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval_secs: u64,

    /// Keep the evaluated-checkpoint set in memory only.
    #[arg(long, env = "EVALPOLL_NO_PERSIST_SEEN")]
    pub no_persist_seen: bool,

    /// Fallback log level when RUST_LOG is unset.
    #[arg(long, env = "EVALPOLL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON log lines.
    #[arg(long, env = "EVALPOLL_LOG_JSON")]
    pub log_json: bool,
}

/// Validated configuration snapshot consumed by the poller and pass runner.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalConfig {
    pub batch_size: usize,
    pub max_num_batches: Option<usize>,
    pub checkpoint_path: PathBuf,
    pub eval_dir: PathBuf,
    pub num_preprocessing_threads: usize,
    pub dataset_name: String,
    pub dataset_split_name: String,
    pub dataset_dir: PathBuf,
    pub labels_offset: usize,
    pub model_name: String,
    pub preprocessing_name: Option<String>,
    pub moving_average_decay: Option<f32>,
    pub eval_image_size: Option<u32>,
    pub poll_interval: Duration,
    pub persist_seen: bool,
}

impl EvalConfig {
    /// Configuration with the documented defaults rooted at `dataset_dir`.
    pub fn new(dataset_dir: impl Into<PathBuf>) -> Self {
        Self {
            batch_size: 60,
            max_num_batches: None,
            checkpoint_path: PathBuf::from("./checkpoints"),
            eval_dir: PathBuf::from("./eval"),
            num_preprocessing_threads: 4,
            dataset_name: "jaffe".to_string(),
            dataset_split_name: "valid".to_string(),
            dataset_dir: dataset_dir.into(),
            labels_offset: 0,
            model_name: "linear".to_string(),
            preprocessing_name: None,
            moving_average_decay: None,
            eval_image_size: Some(48),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            persist_seen: true,
        }
    }

    /// Reject configurations that cannot possibly run.
    pub fn validate(&self) -> EvalResult<()> {
        if self.dataset_dir.as_os_str().is_empty() {
            return Err(EvalError::config(
                "you must supply the dataset directory with --dataset-dir",
            ));
        }
        if self.batch_size == 0 {
            return Err(EvalError::config("batch size must be at least 1"));
        }
        if self.num_preprocessing_threads == 0 {
            return Err(EvalError::config(
                "num preprocessing threads must be at least 1",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(EvalError::config("poll interval must be at least 1 second"));
        }
        if self.max_num_batches == Some(0) {
            return Err(EvalError::config("max num batches must be at least 1"));
        }
        if let Some(decay) = self.moving_average_decay {
            if !(decay > 0.0 && decay < 1.0) {
                return Err(EvalError::config(format!(
                    "moving average decay must be in (0, 1), got {decay}"
                )));
            }
        }
        Ok(())
    }

    /// Pipeline name, falling back to the architecture name.
    pub fn preprocessing_name(&self) -> &str {
        self.preprocessing_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.model_name)
    }

    /// Location of the summary records.
    pub fn summaries_path(&self) -> PathBuf {
        self.eval_dir.join("summaries.jsonl")
    }

    /// Location of the durable evaluated-checkpoint log.
    pub fn seen_log_path(&self) -> PathBuf {
        self.eval_dir.join("evaluated.log")
    }
}

impl TryFrom<EvalArgs> for EvalConfig {
    type Error = EvalError;

    fn try_from(args: EvalArgs) -> EvalResult<Self> {
        let cfg = Self {
            batch_size: args.batch_size,
            max_num_batches: args.max_num_batches,
            checkpoint_path: args.checkpoint_path,
            eval_dir: args.eval_dir,
            num_preprocessing_threads: args.num_preprocessing_threads,
            dataset_name: args.dataset_name,
            dataset_split_name: args.dataset_split_name,
            dataset_dir: PathBuf::from(args.dataset_dir),
            labels_offset: args.labels_offset,
            model_name: args.model_name,
            preprocessing_name: args.preprocessing_name,
            moving_average_decay: args.moving_average_decay,
            eval_image_size: (args.eval_image_size > 0).then_some(args.eval_image_size),
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            persist_seen: !args.no_persist_seen,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
