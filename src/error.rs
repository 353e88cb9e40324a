// src/error.rs

use std::path::PathBuf;

use arrow::error::ArrowError;
use thiserror::Error;

/// Every failure the aggregation pipeline can surface.
///
/// Record-level failures carry the file and the data-row offset so the
/// operator can find the offending line without re-running anything.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed record in {} at row {row}: {detail}", path.display())]
    MalformedRecord {
        path: PathBuf,
        row: u64,
        detail: String,
    },

    #[error("column layout mismatch in {}: {detail}", path.display())]
    LayoutMismatch { path: PathBuf, detail: String },

    #[error("summary tables disagree: {0}")]
    SchemaMismatch(String),

    #[error("no input files for year {year} (pattern `{pattern}`)")]
    MissingInput { year: i32, pattern: String },

    #[error("year {year} cancelled after another year failed")]
    Cancelled { year: i32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Failures that make the remaining years of a run pointless.
    ///
    /// A missing input only affects its own year; everything else aborts.
    pub fn aborts_run(&self) -> bool {
        !matches!(
            self,
            PipelineError::MissingInput { .. } | PipelineError::Cancelled { .. }
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
