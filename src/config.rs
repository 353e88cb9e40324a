// src/config.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::process::accumulate::Granularity;
use crate::process::merge::MissingPolicy;
use crate::process::reader::DEFAULT_CHUNK_SIZE;
use crate::schema::{AliasTable, RecordLayout};

/// Placeholder substituted with the year in `input_pattern`.
pub const YEAR_PLACEHOLDER: &str = "{year}";

/// Inclusive, contiguous range of fiscal years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub first: i32,
    pub last: i32,
}

impl YearRange {
    pub fn new(first: i32, last: i32) -> Result<Self> {
        if first > last {
            return Err(PipelineError::InvalidArgument(format!(
                "year range {}..{} is reversed",
                first, last
            )));
        }
        Ok(Self { first, last })
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.first..=self.last
    }

    pub fn len(&self) -> usize {
        (self.last - self.first + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.first, self.last)
    }
}

/// Accepts `2012..2023`, `2012-2023` or a single `2015`.
impl FromStr for YearRange {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || PipelineError::InvalidArgument(format!("cannot parse year range {:?}", s));
        let s = s.trim();
        let (first, last) = match s.split_once("..").or_else(|| s.split_once('-')) {
            Some((a, b)) => (a.trim(), b.trim().trim_start_matches('=')),
            None => (s, s),
        };
        let first = first.parse().map_err(|_| bad())?;
        let last = last.parse().map_err(|_| bad())?;
        YearRange::new(first, last)
    }
}

/// Which summaries a run produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GranularitySet {
    Annual,
    Monthly,
    #[default]
    Both,
}

impl GranularitySet {
    pub fn granularities(&self) -> Vec<Granularity> {
        match self {
            GranularitySet::Annual => vec![Granularity::Annual],
            GranularitySet::Monthly => vec![Granularity::Monthly],
            GranularitySet::Both => vec![Granularity::Annual, Granularity::Monthly],
        }
    }

    pub fn includes_annual(&self) -> bool {
        !matches!(self, GranularitySet::Monthly)
    }
}

/// Everything a pipeline run needs. Loadable from YAML; every field defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Glob with a `{year}` placeholder; all matches of a year are read in
    /// sorted order into one accumulator.
    pub input_pattern: String,
    pub output_dir: PathBuf,
    pub years: YearRange,
    pub chunk_size: usize,
    pub granularity: GranularitySet,
    pub missing_policy: MissingPolicy,
    /// Worker threads across years; 0 means one per CPU.
    pub jobs: usize,
    /// Parse the next chunk while the current one is accumulated.
    pub prefetch: bool,
    pub layout: String,
    /// Extra department aliases, variant → canonical.
    pub aliases: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_pattern: "{year}-Gastos.csv".to_string(),
            output_dir: PathBuf::from("output"),
            years: YearRange {
                first: 2012,
                last: 2023,
            },
            chunk_size: DEFAULT_CHUNK_SIZE,
            granularity: GranularitySet::Both,
            missing_policy: MissingPolicy::Fail,
            jobs: 0,
            prefetch: true,
            layout: "mef-gasto-v1".to_string(),
            aliases: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| PipelineError::InvalidArgument(format!("invalid config: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidArgument("chunk_size must be positive".into()));
        }
        if !self.input_pattern.contains(YEAR_PLACEHOLDER) {
            return Err(PipelineError::InvalidArgument(format!(
                "input pattern {:?} has no {} placeholder",
                self.input_pattern, YEAR_PLACEHOLDER
            )));
        }
        YearRange::new(self.years.first, self.years.last)?;
        RecordLayout::by_version(&self.layout)?;
        Ok(())
    }

    pub fn record_layout(&self) -> Result<&'static RecordLayout> {
        RecordLayout::by_version(&self.layout)
    }

    pub fn alias_table(&self) -> AliasTable {
        AliasTable::with_defaults(self.aliases.clone())
    }

    pub fn pattern_for(&self, year: i32) -> String {
        self.input_pattern.replace(YEAR_PLACEHOLDER, &year.to_string())
    }

    pub fn worker_count(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }

    pub fn annual_dir(&self) -> PathBuf {
        self.output_dir.join("Gasto-Anual")
    }

    pub fn monthly_dir(&self) -> PathBuf {
        self.output_dir.join("Gasto-Mensual")
    }

    pub fn summary_path(&self, granularity: Granularity, year: i32) -> PathBuf {
        match granularity {
            Granularity::Annual => self
                .annual_dir()
                .join(format!("{}-Gasto-Total-Por-Region.csv", year)),
            Granularity::Monthly => self
                .monthly_dir()
                .join(format!("{}-Gasto-Mensual-Por-Region.csv", year)),
        }
    }

    pub fn merged_path(&self) -> PathBuf {
        self.annual_dir().join(format!(
            "Gasto-Anual-{}-{}.csv",
            self.years.first, self.years.last
        ))
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join("run-report.json")
    }
}
