//! Bounded-memory aggregation of yearly public-spending record files into
//! per-department and per-department/month summary tables.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod schema;

pub use config::{GranularitySet, PipelineConfig, YearRange};
pub use error::{PipelineError, Result};
pub use pipeline::{CancellationToken, Pipeline, RunReport, YearStats};
