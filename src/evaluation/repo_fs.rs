//! Filesystem sink appending summary records as JSON lines.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::common::error::EvalResult;

use super::domain::{SummaryRecord, SummaryRepo};

pub struct FsSummaryRepo {
    path: PathBuf,
}

impl FsSummaryRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Every record written so far, oldest first.
    #[cfg(test)]
    pub(crate) fn read_all(&self) -> EvalResult<Vec<SummaryRecord>> {
        use std::io::{BufRead, BufReader};

        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl SummaryRepo for FsSummaryRepo {
    fn put_records(&self, records: &[SummaryRecord]) -> EvalResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(out.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::domain::CheckpointId;

    fn record(step: u64, value: f64) -> SummaryRecord {
        SummaryRecord {
            checkpoint: CheckpointId::new(format!("ckpt-{step}")),
            global_step: step,
            tag: "eval/Accuracy".into(),
            value,
            wall_time_ms: 1,
        }
    }

    #[test]
    fn appends_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsSummaryRepo::new(dir.path().join("nested/summaries.jsonl"));
        assert!(repo.read_all().unwrap().is_empty());

        repo.put_records(&[record(1, 0.25)]).unwrap();
        repo.put_records(&[record(2, 0.5)]).unwrap();

        let records = repo.read_all().unwrap();
        assert_eq!(records, vec![record(1, 0.25), record(2, 0.5)]);
    }

    #[test]
    fn record_serializes_checkpoint_as_string() {
        let line = serde_json::to_string(&record(3, 1.0)).unwrap();
        assert!(line.contains("\"checkpoint\":\"ckpt-3\""));
        assert!(line.contains("\"tag\":\"eval/Accuracy\""));
    }
}
