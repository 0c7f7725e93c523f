//! Checkpoint poller: evaluates every newly listed checkpoint exactly once.
//!
//! Each cycle lists the source, runs a pass for every id not yet seen and
//! records the id whatever the outcome. A failing or panicking pass is logged
//! and skipped so later checkpoints are still evaluated. Between cycles the
//! poller sleeps for the configured interval or until cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::domain::{CheckpointId, CheckpointSource};
use crate::common::error::EvalResult;

use super::domain::PassRunner;
use super::seen::SeenLog;

/// What a single poll cycle did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollReport {
    /// Checkpoints listed by the source, seen or not.
    pub listed: usize,
    pub evaluated: Vec<CheckpointId>,
    pub failed: Vec<CheckpointId>,
}

pub struct Poller {
    source: Arc<dyn CheckpointSource>,
    runner: Arc<dyn PassRunner>,
    seen: SeenLog,
    interval: Duration,
}

impl Poller {
    pub fn new(
        source: Arc<dyn CheckpointSource>,
        runner: Arc<dyn PassRunner>,
        seen: SeenLog,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            runner,
            seen,
            interval,
        }
    }

    /// Run one cycle without a cancellation source.
    pub async fn poll_once(&mut self) -> PollReport {
        self.poll_cycle(&CancellationToken::new()).await
    }

    async fn poll_cycle(&mut self, cancel: &CancellationToken) -> PollReport {
        let mut report = PollReport::default();
        let state = match self.source.checkpoint_state() {
            Ok(state) => state,
            Err(err) => {
                warn!(
                    location = %self.source.location().display(),
                    code = err.code() as u32,
                    error = %err,
                    "checkpoint listing failed, retrying next cycle"
                );
                return report;
            }
        };
        report.listed = state.all.len();

        for checkpoint in state.all {
            if self.seen.contains(&checkpoint.id) {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }

            let id = checkpoint.id.clone();
            let runner = Arc::clone(&self.runner);
            match tokio::task::spawn_blocking(move || runner.run_pass(&checkpoint)).await {
                Ok(Ok(pass)) => {
                    debug!(checkpoint = %id, batches = pass.batches, "pass complete");
                    report.evaluated.push(id.clone());
                }
                Ok(Err(err)) => {
                    error!(
                        checkpoint = %id,
                        code = err.code() as u32,
                        error = %err,
                        "evaluation failed, skipping checkpoint"
                    );
                    report.failed.push(id.clone());
                }
                Err(join) => {
                    error!(checkpoint = %id, error = %join, "evaluation aborted, skipping checkpoint");
                    report.failed.push(id.clone());
                }
            }

            if let Err(err) = self.seen.insert(id.clone()) {
                error!(checkpoint = %id, error = %err, "failed to persist evaluated checkpoint");
            }
        }

        report
    }

    /// Poll until `cancel` fires. An in-flight pass is allowed to finish.
    pub async fn run(mut self, cancel: CancellationToken) -> EvalResult<()> {
        info!(
            location = %self.source.location().display(),
            interval_secs = self.interval.as_secs_f64(),
            already_evaluated = self.seen.len(),
            "watching for checkpoints"
        );

        while !cancel.is_cancelled() {
            let report = self.poll_cycle(&cancel).await;
            if !report.evaluated.is_empty() || !report.failed.is_empty() {
                info!(
                    listed = report.listed,
                    evaluated = report.evaluated.len(),
                    failed = report.failed.len(),
                    "poll cycle complete"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("checkpoint poller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use crate::checkpoint::domain::{Checkpoint, CheckpointState};
    use crate::checkpoint::repo_fs::FsCheckpointRepo;
    use crate::common::error::EvalError;
    use crate::evaluation::domain::{MetricResult, PassReport};

    #[derive(Default)]
    struct ListedSource {
        listed: Mutex<Option<Vec<Checkpoint>>>,
        root: PathBuf,
    }

    impl ListedSource {
        fn set(&self, names: &[&str]) {
            *self.listed.lock().unwrap() =
                Some(names.iter().map(|n| Checkpoint::from_path(*n)).collect());
        }

        fn break_listing(&self) {
            *self.listed.lock().unwrap() = None;
        }
    }

    impl CheckpointSource for ListedSource {
        fn checkpoint_state(&self) -> EvalResult<CheckpointState> {
            match self.listed.lock().unwrap().clone() {
                Some(all) => Ok(CheckpointState {
                    latest: all.last().cloned(),
                    all,
                }),
                None => Err(EvalError::checkpoint(&self.root, "unreadable")),
            }
        }

        fn location(&self) -> &Path {
            &self.root
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        fail: Vec<String>,
        panic_on: Vec<String>,
    }

    impl RecordingRunner {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PassRunner for RecordingRunner {
        fn run_pass(&self, checkpoint: &Checkpoint) -> EvalResult<PassReport> {
            let id = checkpoint.id.to_string();
            self.calls.lock().unwrap().push(id.clone());
            if self.panic_on.contains(&id) {
                panic!("corrupt tensor in {id}");
            }
            if self.fail.contains(&id) {
                return Err(EvalError::checkpoint(&checkpoint.path, "truncated"));
            }
            Ok(PassReport {
                checkpoint: checkpoint.id.clone(),
                global_step: checkpoint.global_step.unwrap_or_default(),
                batches: 1,
                samples: 1,
                metrics: MetricResult::default(),
            })
        }
    }

    fn poller(source: Arc<ListedSource>, runner: Arc<RecordingRunner>) -> Poller {
        Poller::new(source, runner, SeenLog::in_memory(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn relisted_checkpoints_run_once() {
        let source = Arc::new(ListedSource::default());
        let runner = Arc::new(RecordingRunner::default());
        let mut poller = poller(source.clone(), runner.clone());

        source.set(&["ckpt-1", "ckpt-2"]);
        let first = poller.poll_once().await;
        assert_eq!(first.listed, 2);
        assert_eq!(first.evaluated.len(), 2);

        source.set(&["ckpt-1", "ckpt-2", "ckpt-3", "ckpt-3"]);
        let second = poller.poll_once().await;
        assert_eq!(second.evaluated, vec![CheckpointId::new("ckpt-3")]);

        poller.poll_once().await;
        assert_eq!(runner.calls(), vec!["ckpt-1", "ckpt-2", "ckpt-3"]);
    }

    #[tokio::test]
    async fn checkpoint_appearing_later_is_evaluated_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FsCheckpointRepo::new(dir.path()));
        let runner = Arc::new(RecordingRunner::default());
        let mut poller = Poller::new(
            source,
            runner.clone(),
            SeenLog::in_memory(),
            Duration::from_secs(5),
        );

        let idle = poller.poll_once().await;
        assert_eq!(idle, PollReport::default());
        assert!(runner.calls().is_empty());

        std::fs::write(dir.path().join("ckpt-100"), "{}").unwrap();
        let second = poller.poll_once().await;
        assert_eq!(second.evaluated.len(), 1);

        poller.poll_once().await;
        poller.poll_once().await;
        assert_eq!(runner.calls().len(), 1);
        assert!(runner.calls()[0].ends_with("ckpt-100"));
    }

    #[tokio::test]
    async fn checkpoint_mid_write_is_evaluated_once_complete() {
        let dir = tempfile::tempdir().unwrap();
        let source =
            Arc::new(FsCheckpointRepo::new(dir.path()).with_settle(Duration::from_secs(5)));
        let runner = Arc::new(RecordingRunner::default());
        let mut poller = Poller::new(
            source,
            runner.clone(),
            SeenLog::in_memory(),
            Duration::from_secs(5),
        );

        let path = dir.path().join("model.ckpt-5");
        std::fs::write(&path, "{\"global_step\": 5,").unwrap();
        let first = poller.poll_once().await;
        assert_eq!(first, PollReport::default());

        std::fs::write(&path, "{\"global_step\": 5, \"variables\": {}}").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(10))
            .unwrap();
        let second = poller.poll_once().await;
        assert_eq!(second.evaluated.len(), 1);
        assert!(second.failed.is_empty());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn failures_are_skipped_and_not_retried() {
        let source = Arc::new(ListedSource::default());
        let runner = Arc::new(RecordingRunner {
            fail: vec!["ckpt-1".into()],
            panic_on: vec!["ckpt-2".into()],
            ..Default::default()
        });
        let mut poller = poller(source.clone(), runner.clone());

        source.set(&["ckpt-1", "ckpt-2", "ckpt-3"]);
        let report = poller.poll_once().await;
        assert_eq!(report.evaluated, vec![CheckpointId::new("ckpt-3")]);
        assert_eq!(
            report.failed,
            vec![CheckpointId::new("ckpt-1"), CheckpointId::new("ckpt-2")]
        );

        poller.poll_once().await;
        assert_eq!(runner.calls(), vec!["ckpt-1", "ckpt-2", "ckpt-3"]);
        assert_eq!(poller.seen.len(), 3);
    }

    #[tokio::test]
    async fn unreadable_listing_is_an_idle_cycle() {
        let source = Arc::new(ListedSource::default());
        let runner = Arc::new(RecordingRunner::default());
        let mut poller = poller(source.clone(), runner.clone());

        source.break_listing();
        assert_eq!(poller.poll_once().await, PollReport::default());

        source.set(&["ckpt-9"]);
        assert_eq!(poller.poll_once().await.evaluated.len(), 1);
    }

    #[tokio::test]
    async fn persisted_seen_log_skips_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("evaluated.log");
        let source = Arc::new(ListedSource::default());
        source.set(&["ckpt-1", "ckpt-2"]);

        let first_runner = Arc::new(RecordingRunner::default());
        let mut first = Poller::new(
            source.clone(),
            first_runner.clone(),
            SeenLog::open(&log).unwrap(),
            Duration::from_secs(5),
        );
        first.poll_once().await;
        assert_eq!(first_runner.calls().len(), 2);
        drop(first);

        source.set(&["ckpt-1", "ckpt-2", "ckpt-3"]);
        let second_runner = Arc::new(RecordingRunner::default());
        let mut second = Poller::new(
            source,
            second_runner.clone(),
            SeenLog::open(&log).unwrap(),
            Duration::from_secs(5),
        );
        second.poll_once().await;
        assert_eq!(second_runner.calls(), vec!["ckpt-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_cancelled() {
        let source = Arc::new(ListedSource::default());
        source.set(&[]);
        let runner = Arc::new(RecordingRunner::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(poller(source.clone(), runner).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();

        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(stopped, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn cancelled_token_skips_pending_passes() {
        let source = Arc::new(ListedSource::default());
        source.set(&["ckpt-1"]);
        let runner = Arc::new(RecordingRunner::default());
        let mut poller = poller(source, runner.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = poller.poll_cycle(&cancel).await;
        assert_eq!(report.listed, 1);
        assert!(runner.calls().is_empty());
        assert!(!poller.seen.contains(&CheckpointId::new("ckpt-1")));
    }
}
