//! Files of a job directory: status record, decision input, stop report.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::core::job_state::validate_job_status;
use crate::core::text::decode_text;
use crate::core::types::JobStatus;

pub const JOB_STATUS_FILE: &str = "job_status.json";
pub const HUMAN_DECISION_FILE: &str = "human_decision.txt";
pub const PROCESSED_DECISION_FILE: &str = "human_decision.processed.txt";
pub const STOP_REPORT_FILE: &str = "stop_report.txt";

/// Canonical paths within one job directory.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub dir: PathBuf,
    pub status_path: PathBuf,
    pub decision_path: PathBuf,
    pub processed_decision_path: PathBuf,
    pub stop_report_path: PathBuf,
}

impl JobPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            status_path: dir.join(JOB_STATUS_FILE),
            decision_path: dir.join(HUMAN_DECISION_FILE),
            processed_decision_path: dir.join(PROCESSED_DECISION_FILE),
            stop_report_path: dir.join(STOP_REPORT_FILE),
            dir,
        }
    }

    /// Job id derived from the directory name.
    pub fn job_id(&self) -> Result<String> {
        self.dir
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("job directory has no usable name: {}", self.dir.display()))
    }
}

/// Create the job directory if needed; fail if the path is not a directory.
pub fn ensure_job_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create job directory {}", dir.display()))?;
    if !dir.is_dir() {
        return Err(anyhow!("job path is not a directory: {}", dir.display()));
    }
    Ok(())
}

/// Load the status record. `Ok(None)` when the job has never been persisted.
pub fn load_job_status(path: &Path) -> Result<Option<JobStatus>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let status: JobStatus =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let errors = validate_job_status(&status);
    if !errors.is_empty() {
        return Err(anyhow!(
            "invalid job status {}: {}",
            path.display(),
            errors.join("; ")
        ));
    }
    debug!(job_id = %status.job_id, run = %status.current_run, "job status loaded");
    Ok(Some(status))
}

/// Atomically write the status record (pretty JSON, trailing newline).
pub fn write_job_status(path: &Path, status: &JobStatus) -> Result<()> {
    debug!(
        job_id = %status.job_id,
        run_result = status.run_result.as_str(),
        stop = status.stop.status.as_str(),
        "writing job status"
    );
    let mut buf = serde_json::to_string_pretty(status).context("serialize job status")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Trimmed decision text. `Ok(None)` when the file is absent or blank.
///
/// Bytes no supported encoding accepts are read lossily; the result is never
/// a valid decision, so it surfaces as an invalid one.
pub fn read_decision(path: &Path) -> Result<Option<String>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let text = decode_text(&bytes).unwrap_or_else(|| {
        warn!(path = %path.display(), "decision file has no supported encoding");
        String::from_utf8_lossy(&bytes).into_owned()
    });
    let trimmed = text.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Move a consumed decision aside so it is not applied to a later STOP.
pub fn archive_decision(paths: &JobPaths) -> Result<()> {
    fs::rename(&paths.decision_path, &paths.processed_decision_path).with_context(|| {
        format!(
            "move {} to {}",
            paths.decision_path.display(),
            paths.processed_decision_path.display()
        )
    })
}

/// Text of the job's specification document.
pub fn read_spec_document(path: &Path) -> Result<String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(anyhow!("spec file not found: {}", path.display()));
        }
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    decode_text(&bytes)
        .ok_or_else(|| anyhow!("decode {}: unsupported text encoding", path.display()))
}

pub fn write_stop_report(path: &Path, report: &str) -> Result<()> {
    super::write_atomic(path, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StopCode;
    use chrono::{TimeZone, Utc};

    fn status() -> JobStatus {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");
        JobStatus::new("job-a", "spec.md", now)
    }

    #[test]
    fn missing_status_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = JobPaths::new(temp.path());
        assert!(load_job_status(&paths.status_path).expect("load").is_none());
    }

    #[test]
    fn status_round_trips_with_wire_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = JobPaths::new(temp.path());
        let mut status = status();
        let later = status.created_at + chrono::Duration::seconds(5);
        status
            .set_stop(StopCode::SpecMissing, "Missing required sections: output", later)
            .expect("stop");

        write_job_status(&paths.status_path, &status).expect("write");
        let raw = fs::read_to_string(&paths.status_path).expect("read");
        assert!(raw.contains("\"run_result\": \"STOP\""));
        assert!(raw.contains("\"stop_code\": \"SPEC_MISSING\""));
        assert!(raw.contains("\"current_run\": \"run0\""));

        let loaded = load_job_status(&paths.status_path).expect("load").expect("some");
        assert_eq!(loaded, status);
    }

    #[test]
    fn inconsistent_status_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = JobPaths::new(temp.path());
        let mut status = status();
        status.run_result = crate::core::types::RunResult::Stop;
        write_job_status(&paths.status_path, &status).expect("write");
        assert!(load_job_status(&paths.status_path).is_err());
    }

    #[test]
    fn blank_decision_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = JobPaths::new(temp.path());
        assert_eq!(read_decision(&paths.decision_path).expect("absent"), None);
        fs::write(&paths.decision_path, "  \n").expect("write");
        assert_eq!(read_decision(&paths.decision_path).expect("blank"), None);
        fs::write(&paths.decision_path, " Yes\r\n").expect("write");
        assert_eq!(
            read_decision(&paths.decision_path).expect("yes").as_deref(),
            Some("Yes")
        );
    }

    #[test]
    fn undecodable_decision_is_read_lossily() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = JobPaths::new(temp.path());
        fs::write(&paths.decision_path, [0xC3, 0x28, 0xFF]).expect("write");
        assert_eq!(
            read_decision(&paths.decision_path).expect("read").as_deref(),
            Some("\u{FFFD}(\u{FFFD}")
        );
    }

    #[test]
    fn archive_moves_decision_aside() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = JobPaths::new(temp.path());
        fs::write(&paths.decision_path, "no").expect("write");
        archive_decision(&paths).expect("archive");
        assert!(!paths.decision_path.exists());
        assert_eq!(
            fs::read_to_string(&paths.processed_decision_path).expect("read"),
            "no"
        );
    }

    #[test]
    fn missing_spec_names_the_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = read_spec_document(&temp.path().join("spec.md")).unwrap_err();
        assert!(err.to_string().contains("spec file not found"));

        fs::write(temp.path().join("spec.md"), "# Purpose\n").expect("write");
        assert_eq!(
            read_spec_document(&temp.path().join("spec.md")).expect("read"),
            "# Purpose\n"
        );
    }

    #[test]
    fn job_id_is_directory_name() {
        let paths = JobPaths::new("/tmp/jobs/job-42");
        assert_eq!(paths.job_id().expect("id"), "job-42");
    }
}
