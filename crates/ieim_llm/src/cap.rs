//! Daily call-count cap, enforced with the same read-modify-write under
//! an exclusive advisory lock that the audit log uses for its
//! read-last-line-then-append sequence: several stage workers may try
//! to consume the budget for the same day at once, and the counter file
//! must never lose an increment to a race.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Counters {
    #[serde(flatten)]
    by_date: std::collections::BTreeMap<String, u32>,
}

/// Counter file at `<base_dir>/llm_call_counts.json`, keyed by calendar
/// date (`YYYY-MM-DD`, caller's responsibility to pass the same clock
/// source consistently).
pub struct DailyCallCap {
    path: PathBuf,
}

impl DailyCallCap {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { path: base_dir.into().join("llm_call_counts.json") }
    }

    /// Attempts to consume one call against `date`'s budget of
    /// `max_calls_per_day`. Returns `true` and increments the counter if
    /// the budget was not yet exhausted; returns `false` (no increment)
    /// if it was already at the cap.
    pub fn try_consume(&self, date: &str, max_calls_per_day: u32) -> Result<bool, CapError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CapError::Io { path: parent.to_path_buf(), source })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| CapError::Io { path: self.path.clone(), source })?;

        file.lock_exclusive().map_err(|source| CapError::Io { path: self.path.clone(), source })?;

        let result = (|| {
            let mut counters = read_counters(&mut file, &self.path)?;
            let current = *counters.by_date.get(date).unwrap_or(&0);
            if current >= max_calls_per_day {
                return Ok(false);
            }
            counters.by_date.insert(date.to_string(), current + 1);
            write_counters(&mut file, &self.path, &counters)?;
            Ok(true)
        })();

        let _ = FileExt::unlock(&file);
        result
    }
}

fn read_counters(file: &mut File, path: &Path) -> Result<Counters, CapError> {
    file.seek(SeekFrom::Start(0)).map_err(|source| CapError::Io { path: path.to_path_buf(), source })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|source| CapError::Io { path: path.to_path_buf(), source })?;
    if contents.trim().is_empty() {
        return Ok(Counters::default());
    }
    Ok(serde_json::from_str(&contents)?)
}

fn write_counters(file: &mut File, path: &Path, counters: &Counters) -> Result<(), CapError> {
    let bytes = serde_json::to_vec_pretty(counters)?;
    file.seek(SeekFrom::Start(0)).map_err(|source| CapError::Io { path: path.to_path_buf(), source })?;
    file.set_len(0).map_err(|source| CapError::Io { path: path.to_path_buf(), source })?;
    file.write_all(&bytes).map_err(|source| CapError::Io { path: path.to_path_buf(), source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn consumes_until_cap_then_refuses() {
        let dir = tempdir().unwrap();
        let cap = DailyCallCap::new(dir.path());
        assert!(cap.try_consume("2026-08-01", 2).unwrap());
        assert!(cap.try_consume("2026-08-01", 2).unwrap());
        assert!(!cap.try_consume("2026-08-01", 2).unwrap());
    }

    #[test]
    fn separate_dates_have_independent_budgets() {
        let dir = tempdir().unwrap();
        let cap = DailyCallCap::new(dir.path());
        assert!(cap.try_consume("2026-08-01", 1).unwrap());
        assert!(!cap.try_consume("2026-08-01", 1).unwrap());
        assert!(cap.try_consume("2026-08-02", 1).unwrap());
    }
}
