//! Fixed-size worker pool used to decode and preprocess samples.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::warn;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Pool {
    tx: Option<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl Pool {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let shared_rx = Arc::new(Mutex::new(rx));

        let handles = (0..size.max(1))
            .map(|idx| {
                let rx = Arc::clone(&shared_rx);
                thread::Builder::new()
                    .name(format!("preprocess-{idx}"))
                    .spawn(move || loop {
                        let job = {
                            let Ok(guard) = rx.lock() else { break };
                            guard.recv()
                        };

                        match job {
                            Ok(job) => {
                                // the job's result sender drops on unwind, so its batch fails
                                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                    warn!(worker = idx, "preprocessing job panicked");
                                }
                            }
                            Err(_) => break,
                        }
                    })
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(error = %err, "failed to spawn preprocessing worker");
                    None
                }
            })
            .collect();

        Self {
            tx: Some(tx),
            handles,
        }
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job. Returns `false` when no worker is left to run it.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.handles.is_empty() {
            return false;
        }
        match &self.tx {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
