// src/pipeline/mod.rs

pub mod report;

use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::process::accumulate::{Accumulator, Granularity};
use crate::process::materialize::{materialize, name_collisions, read_annual_summary, write_summary_file};
use crate::process::merge::{merge_years, WideSummaryTable, YearTable};
use crate::process::reader::{ChunkReader, RecordChunk};
use crate::schema::{AliasTable, RecordLayout};

pub use report::{RunReport, YearStats};

/// Shared stop flag, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives reader → accumulator → materializer per year, then the merge.
pub struct Pipeline {
    config: PipelineConfig,
    layout: &'static RecordLayout,
    aliases: Arc<AliasTable>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let layout = config.record_layout()?;
        let aliases = Arc::new(config.alias_table());
        Ok(Self {
            config,
            layout,
            aliases,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle for stopping a run from outside; years stop at the next chunk.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Input files for `year`, sorted so split parts are read in order.
    pub fn resolve_inputs(&self, year: i32) -> Result<Vec<PathBuf>> {
        let pattern = self.config.pattern_for(year);
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| PipelineError::InvalidArgument(format!("bad pattern {:?}: {}", pattern, e)))?
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(year, "unreadable glob entry: {}", e);
                    None
                }
            })
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(PipelineError::MissingInput { year, pattern });
        }
        Ok(paths)
    }

    /// Aggregate one year and write its summaries. Safe to re-run on its own,
    /// including after a failed [`Pipeline::run`].
    pub fn run_year(&self, year: i32) -> Result<YearStats> {
        self.process_year(year, &CancellationToken::new())
    }

    /// `abort` is scoped to one `run`; the external token is checked too.
    #[instrument(level = "info", skip(self, abort))]
    fn process_year(&self, year: i32, abort: &CancellationToken) -> Result<YearStats> {
        let start = Instant::now();
        self.check_cancelled(year, abort)?;

        let inputs = self.resolve_inputs(year)?;
        info!(files = inputs.len(), "starting year");

        let mut accumulators: Vec<Accumulator> = self
            .config
            .granularity
            .granularities()
            .into_iter()
            .map(Accumulator::new)
            .collect();
        let mut aliased_rows = 0u64;

        for path in &inputs {
            self.for_each_chunk(year, path, abort, |chunk| {
                for acc in accumulators.iter_mut() {
                    acc.accumulate(&chunk);
                }
                aliased_rows += chunk.aliased_rows();
                info!(
                    file = %path.display(),
                    chunk = chunk.index(),
                    rows = chunk.len(),
                    "chunk completed"
                );
                Ok(())
            })?;
        }

        let mut stats = YearStats {
            year,
            status: "ok".to_string(),
            inputs: inputs.clone(),
            rows: accumulators.first().map(Accumulator::rows).unwrap_or(0),
            chunks: accumulators.first().map(Accumulator::chunks).unwrap_or(0),
            aliased_rows,
            ..Default::default()
        };

        for acc in accumulators {
            let granularity = acc.granularity();
            let rows = materialize(acc);

            let departments: BTreeSet<&str> = rows.iter().map(|r| r.department.as_str()).collect();
            stats.departments = stats.departments.max(departments.len());
            if stats.name_collisions.is_empty() {
                stats.name_collisions = name_collisions(&rows);
            }

            let path = self.config.summary_path(granularity, year);
            write_summary_file(&path, granularity, &rows)?;
            debug!(path = %path.display(), rows = rows.len(), "summary written");
            stats.outputs.push(path);
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            rows = stats.rows,
            departments = stats.departments,
            elapsed = ?start.elapsed(),
            "year complete"
        );
        Ok(stats)
    }

    /// Feed every chunk of `path` to `consume`, one at a time.
    ///
    /// With prefetch on, a scoped reader thread parses the next chunk while
    /// the current one is consumed; the channel holds at most one chunk.
    fn for_each_chunk<F>(
        &self,
        year: i32,
        path: &Path,
        abort: &CancellationToken,
        mut consume: F,
    ) -> Result<()>
    where
        F: FnMut(RecordChunk) -> Result<()>,
    {
        let open = || {
            ChunkReader::open(
                path,
                self.layout,
                self.config.chunk_size,
                Arc::clone(&self.aliases),
            )
        };

        if !self.config.prefetch {
            for chunk in open()? {
                self.check_cancelled(year, abort)?;
                consume(chunk?)?;
            }
            return Ok(());
        }

        thread::scope(|s| {
            let (tx, rx) = mpsc::sync_channel::<Result<RecordChunk>>(1);
            s.spawn(move || {
                let reader = match open() {
                    Ok(reader) => reader,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                for chunk in reader {
                    // receiver gone: the consumer stopped early
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            });

            for chunk in rx {
                self.check_cancelled(year, abort)?;
                consume(chunk?)?;
            }
            Ok(())
        })
    }

    fn check_cancelled(&self, year: i32, abort: &CancellationToken) -> Result<()> {
        if self.cancel.is_cancelled() || abort.is_cancelled() {
            return Err(PipelineError::Cancelled { year });
        }
        Ok(())
    }

    /// Run every configured year in parallel, then merge the annual tables.
    ///
    /// Year failures are recorded in the returned report rather than
    /// returned as `Err`; an aborting failure cancels the other years of this
    /// run only. The external token stays untouched.
    pub fn run(&self) -> Result<RunReport> {
        let abort = CancellationToken::new();
        let years: Vec<i32> = self.config.years.years().collect();
        let workers = self.config.worker_count().min(years.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| PipelineError::InvalidArgument(format!("building worker pool: {}", e)))?;
        info!(years = %self.config.years, workers, "starting run");

        let stats: Vec<YearStats> = pool.install(|| {
            years
                .par_iter()
                .map(|&year| {
                    let start = Instant::now();
                    match self.process_year(year, &abort) {
                        Ok(stats) => stats,
                        Err(e) => {
                            if e.aborts_run() {
                                abort.cancel();
                            }
                            error!(year, "year failed: {}", e);
                            YearStats {
                                year,
                                status: e.to_string(),
                                elapsed_ms: start.elapsed().as_millis() as u64,
                                ..Default::default()
                            }
                        }
                    }
                })
                .collect()
        });

        let all_ok = stats.iter().all(YearStats::is_ok);
        let merged = if !self.config.granularity.includes_annual() {
            None
        } else if all_ok {
            Some(self.merge())
        } else {
            warn!("skipping merge: not every year completed");
            None
        };

        let merged_path = match &merged {
            Some(Ok(_)) => Some(self.config.merged_path()),
            _ => None,
        };
        let report = RunReport::new(self.config.years, stats, merged_path);
        report.write_file(&self.config.report_path())?;

        if let Some(Err(e)) = merged {
            return Err(e);
        }
        Ok(report)
    }

    /// Join the per-year annual summaries already on disk into the wide table.
    pub fn merge(&self) -> Result<WideSummaryTable> {
        let tables = self
            .config
            .years
            .years()
            .map(|year| {
                let path = self.config.summary_path(Granularity::Annual, year);
                if !path.is_file() {
                    return Err(PipelineError::MissingInput {
                        year,
                        pattern: path.display().to_string(),
                    });
                }
                Ok(YearTable {
                    year,
                    rows: read_annual_summary(&path)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let table = merge_years(tables, self.config.missing_policy)?;
        let path = self.config.merged_path();
        table.write_file(&path)?;
        info!(path = %path.display(), "wide summary written");
        Ok(table)
    }
}
