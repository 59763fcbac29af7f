#![forbid(unsafe_code)]

//! Audit trail of signing operations.
//!
//! Every batch is written out in full before it is sent, and the outcome of
//! each call is appended to `events.jsonl`, so a run can be replayed against
//! the signing service or inspected after the fact.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::PipelineError;
use crate::request::{Pass, SignBatch};

const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug)]
pub struct AuditLog {
    dir: PathBuf,
}

#[derive(Serialize)]
struct Event<'a> {
    timestamp: String,
    pass: Pass,
    requests: usize,
    archives: usize,
    outcome: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl AuditLog {
    pub fn create(dir: &Path) -> Result<Self, PipelineError> {
        fs::create_dir_all(dir).map_err(|source| PipelineError::Setup {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the full batch to `<NN>-<pass>.json`.
    pub fn record_batch(&self, batch: &SignBatch) -> Result<PathBuf, PipelineError> {
        let path = self
            .dir
            .join(format!("{:02}-{}.json", batch.pass.ordinal(), batch.pass));
        let contents = serde_json::to_vec_pretty(batch)?;
        fs::write(&path, contents).map_err(|source| PipelineError::Audit {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Appends one line describing how a signing call went.
    pub fn record_outcome(
        &self,
        batch: &SignBatch,
        error: Option<&str>,
    ) -> Result<(), PipelineError> {
        let event = Event {
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string()),
            pass: batch.pass,
            requests: batch.len(),
            archives: batch.archives().len(),
            outcome: if error.is_some() { "failed" } else { "signed" },
            error,
        };

        let path = self.dir.join(EVENTS_FILE);
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(&line))
            .map_err(|source| PipelineError::Audit { path, source })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;
    use crate::request::SignRequest;

    #[test]
    fn batches_and_outcomes_are_recorded() {
        let temp = tempdir().expect("temp dir");
        let log = AuditLog::create(&temp.path().join("binlog")).expect("create");

        let mut batch = SignBatch::new(Pass::Notarization);
        batch.extend([SignRequest::for_notarization(
            Path::new("go.darwin.tar.gz"),
            PathBuf::from("out/go.darwin.tar.gz.withSignedContent"),
            "MacNotarize",
        )]);

        let path = log.record_batch(&batch).expect("batch recorded");
        assert!(path.ends_with("02-notarization.json"));
        let recorded: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(recorded["requests"][0]["kind"], "notarization");

        log.record_outcome(&batch, None).expect("outcome");
        log.record_outcome(&batch, Some("broker offline")).expect("outcome");

        let events = fs::read_to_string(log.dir().join(EVENTS_FILE)).expect("events");
        let lines: Vec<serde_json::Value> = events
            .lines()
            .map(|line| serde_json::from_str(line).expect("line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["outcome"], "signed");
        assert_eq!(lines[1]["error"], "broker offline");
    }
}
