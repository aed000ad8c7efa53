//! Append-only step ledger under `logs/steps/`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::step_record::{LedgerSummary, StepRecord, summarize};

/// `step_NNN.json`, zero-padded to three digits.
pub fn step_path(steps_dir: &Path, step_num: u32) -> PathBuf {
    steps_dir.join(format!("step_{step_num:03}.json"))
}

/// Write a record. Fails if a record for this step number already exists.
pub fn write_step_record(steps_dir: &Path, record: &StepRecord) -> Result<PathBuf> {
    fs::create_dir_all(steps_dir)
        .with_context(|| format!("create directory {}", steps_dir.display()))?;
    let path = step_path(steps_dir, record.step_num);
    let mut buf = serde_json::to_string_pretty(record).context("serialize step record")?;
    buf.push('\n');

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("create {}", path.display()))?;
    file.write_all(buf.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", path.display()))?;

    info!(step = record.step_num, phase = %record.phase, path = %path.display(), "step record written");
    Ok(path)
}

fn record_paths(steps_dir: &Path) -> Result<Vec<PathBuf>> {
    if !steps_dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in
        fs::read_dir(steps_dir).with_context(|| format!("read {}", steps_dir.display()))?
    {
        let path = entry.context("read entry")?.path();
        let is_record = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("step_") && name.ends_with(".json"));
        if is_record && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load every readable record, sorted by step number.
///
/// Unreadable or malformed files are skipped and reported as warnings.
pub fn load_step_records(steps_dir: &Path) -> Result<(Vec<StepRecord>, Vec<String>)> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    for path in record_paths(steps_dir)? {
        let record: StepRecord = match fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))
            .and_then(|contents| serde_json::from_str(&contents).context("parse step record"))
        {
            Ok(record) => record,
            Err(err) => {
                warnings.push(format!("skip {}: {err:#}", path.display()));
                continue;
            }
        };
        records.push(record);
    }

    records.sort_by_key(|record| record.step_num);
    debug!(records = records.len(), warnings = warnings.len(), "step records loaded");
    Ok((records, warnings))
}

/// First unused step number (1 for an empty ledger).
///
/// Counts every `step_NNN.json` file name, readable or not, so a number is
/// never reused.
pub fn next_step_num(steps_dir: &Path) -> Result<u32> {
    let last = record_paths(steps_dir)?
        .iter()
        .filter_map(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.strip_prefix("step_"))
                .and_then(|num| num.parse::<u32>().ok())
        })
        .max();
    Ok(last.map_or(1, |n| n + 1))
}

/// Aggregate the ledger at `steps_dir`.
pub fn aggregate(steps_dir: &Path) -> Result<(LedgerSummary, Vec<String>)> {
    let (records, warnings) = load_step_records(steps_dir)?;
    Ok((summarize(&records), warnings))
}
