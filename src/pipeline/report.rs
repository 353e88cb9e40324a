// src/pipeline/report.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::YearRange;
use crate::error::{PipelineError, Result};
use crate::process::materialize::write_atomically;

/// Per-year outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearStats {
    pub year: i32,
    /// `"ok"` or the error that stopped the year.
    pub status: String,
    pub inputs: Vec<PathBuf>,
    pub rows: u64,
    pub chunks: u64,
    pub departments: usize,
    pub aliased_rows: u64,
    pub name_collisions: Vec<Vec<String>>,
    pub outputs: Vec<PathBuf>,
    pub elapsed_ms: u64,
}

impl YearStats {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// What `run-report.json` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub years: YearRange,
    pub stats: Vec<YearStats>,
    pub merged: Option<PathBuf>,
}

impl RunReport {
    pub fn new(years: YearRange, mut stats: Vec<YearStats>, merged: Option<PathBuf>) -> Self {
        stats.sort_by_key(|s| s.year);
        Self {
            generated_at: Utc::now(),
            years,
            stats,
            merged,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &YearStats> {
        self.stats.iter().filter(|s| !s.is_ok())
    }

    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Pretty JSON with a trailing newline, written atomically.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        write_atomically(path, |out| {
            serde_json::to_writer_pretty(&mut *out, self).map_err(|e| {
                PipelineError::InvalidArgument(format!("serializing run report: {}", e))
            })?;
            out.write_all(b"\n").map_err(|e| PipelineError::io(path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn report_lists_failures_and_round_trips() -> anyhow::Result<()> {
        let ok = YearStats {
            year: 2013,
            status: "ok".into(),
            rows: 10,
            ..Default::default()
        };
        let bad = YearStats {
            year: 2012,
            status: "malformed record in a.csv at row 3: x".into(),
            ..Default::default()
        };
        let report = RunReport::new(YearRange::new(2012, 2013)?, vec![ok, bad], None);
        assert_eq!(report.stats[0].year, 2012);
        assert!(!report.succeeded());
        assert_eq!(report.failures().map(|s| s.year).collect::<Vec<_>>(), vec![2012]);

        let dir = tempdir()?;
        let path = dir.path().join("run-report.json");
        report.write_file(&path)?;
        let back: RunReport = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(back, report);
        Ok(())
    }
}
