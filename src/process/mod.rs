// src/process/mod.rs
pub mod accumulate;
pub mod materialize;
pub mod merge;
pub mod reader;
pub mod split;

pub use accumulate::{Accumulator, AggregationKey, Granularity};
pub use materialize::{materialize, write_summary, SummaryRow};
pub use merge::{merge_years, MissingPolicy, WideSummaryTable, YearTable};
pub use reader::{ChunkReader, RecordChunk, SpendRecord};
pub use split::{split_file, SplitSummary};
