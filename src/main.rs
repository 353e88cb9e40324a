use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gasto_pipeline::{
    process::{merge::MissingPolicy, split},
    GranularitySet, Pipeline, PipelineConfig, YearRange,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Aggregate yearly spending records into per-department summaries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate every year of the range, then merge the annual tables
    Run {
        /// YAML config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input glob with a `{year}` placeholder, e.g. "data/{year}-Gastos*.csv"
        #[arg(short, long)]
        input: Option<String>,

        /// Year range, e.g. 2012..2023
        #[arg(short, long)]
        years: Option<YearRange>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rows per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long, value_enum)]
        granularity: Option<GranularitySet>,

        /// Parallel years (0 = one per CPU)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Fill departments missing from a year with 0 instead of failing the merge
        #[arg(long)]
        zero_fill: bool,

        /// Read and accumulate on one thread
        #[arg(long)]
        no_prefetch: bool,
    },

    /// Merge existing per-year annual summaries into the wide table
    Merge {
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        #[arg(short, long)]
        years: YearRange,

        #[arg(long)]
        zero_fill: bool,
    },

    /// Split a large line-oriented file into fixed-size parts
    Split {
        input: PathBuf,

        /// Parts are written as <prefix>0.csv, <prefix>1.csv, ...
        output_prefix: PathBuf,

        #[arg(short, long, default_value_t = split::DEFAULT_LINES_PER_PART)]
        lines: u64,
    },
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            input,
            years,
            output,
            chunk_size,
            granularity,
            jobs,
            zero_fill,
            no_prefetch,
        } => {
            // ─── 2) assemble config: file, then flags ───────────────────
            let mut cfg = match &config {
                Some(path) => PipelineConfig::load(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => PipelineConfig::default(),
            };
            if let Some(input) = input {
                cfg.input_pattern = input;
            }
            if let Some(years) = years {
                cfg.years = years;
            }
            if let Some(output) = output {
                cfg.output_dir = output;
            }
            if let Some(chunk_size) = chunk_size {
                cfg.chunk_size = chunk_size;
            }
            if let Some(granularity) = granularity {
                cfg.granularity = granularity;
            }
            if let Some(jobs) = jobs {
                cfg.jobs = jobs;
            }
            if zero_fill {
                cfg.missing_policy = MissingPolicy::ZeroFill;
            }
            if no_prefetch {
                cfg.prefetch = false;
            }

            // ─── 3) run every year, then merge ─────────────────────────
            let pipeline = Pipeline::new(cfg).context("invalid configuration")?;
            let report = pipeline.run().context("run failed")?;

            if !report.succeeded() {
                for failed in report.failures() {
                    error!(year = failed.year, "{}", failed.status);
                }
                bail!(
                    "{} of {} years failed; see {}",
                    report.failures().count(),
                    report.stats.len(),
                    pipeline.config().report_path().display()
                );
            }
            info!(
                years = report.stats.len(),
                rows = report.stats.iter().map(|s| s.rows).sum::<u64>(),
                "all done"
            );
        }

        Command::Merge {
            output,
            years,
            zero_fill,
        } => {
            let cfg = PipelineConfig {
                output_dir: output,
                years,
                missing_policy: if zero_fill {
                    MissingPolicy::ZeroFill
                } else {
                    MissingPolicy::Fail
                },
                ..PipelineConfig::default()
            };
            let pipeline = Pipeline::new(cfg).context("invalid configuration")?;
            let table = pipeline.merge().context("merge failed")?;
            info!(
                departments = table.rows.len(),
                path = %pipeline.config().merged_path().display(),
                "merged"
            );
        }

        Command::Split {
            input,
            output_prefix,
            lines,
        } => {
            let summary = split::split_file(&input, &output_prefix, lines)
                .with_context(|| format!("splitting {}", input.display()))?;
            info!(parts = summary.parts.len(), lines = summary.lines, "files split");
        }
    }

    Ok(())
}
