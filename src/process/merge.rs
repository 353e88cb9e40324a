// src/process/merge.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use super::materialize::{write_atomically, SummaryRow};
use crate::error::{PipelineError, Result};

/// What to do when a department is absent from some year's table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPolicy {
    /// Reject the merge with `SchemaMismatch`.
    #[default]
    Fail,
    /// Write `0.0` in the absent cell.
    ZeroFill,
}

/// One year's annual summary.
#[derive(Debug, Clone, PartialEq)]
pub struct YearTable {
    pub year: i32,
    pub rows: Vec<SummaryRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub department: String,
    /// One total per year, in the table's year order.
    pub totals: Vec<f64>,
}

/// Departments × years, sorted by department, years ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct WideSummaryTable {
    pub years: Vec<i32>,
    pub rows: Vec<WideRow>,
}

/// Outer-join per-year annual tables on the department key.
pub fn merge_years(mut tables: Vec<YearTable>, policy: MissingPolicy) -> Result<WideSummaryTable> {
    if tables.is_empty() {
        return Err(PipelineError::InvalidArgument("no yearly tables to merge".into()));
    }
    tables.sort_by_key(|t| t.year);
    for pair in tables.windows(2) {
        if pair[1].year != pair[0].year + 1 {
            return Err(PipelineError::SchemaMismatch(format!(
                "years must be contiguous, found {} followed by {}",
                pair[0].year, pair[1].year
            )));
        }
    }

    let years: Vec<i32> = tables.iter().map(|t| t.year).collect();
    let mut cells: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();

    for (col, table) in tables.iter().enumerate() {
        for row in &table.rows {
            let slot = cells
                .entry(row.department.clone())
                .or_insert_with(|| vec![None; years.len()]);
            if slot[col].is_some() {
                return Err(PipelineError::SchemaMismatch(format!(
                    "department {:?} listed twice in {}",
                    row.department, table.year
                )));
            }
            slot[col] = Some(row.total);
        }
    }

    let mut rows = Vec::with_capacity(cells.len());
    for (department, slots) in cells {
        let missing: Vec<i32> = slots
            .iter()
            .zip(&years)
            .filter(|(cell, _)| cell.is_none())
            .map(|(_, year)| *year)
            .collect();

        if !missing.is_empty() {
            match policy {
                MissingPolicy::Fail => {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "department {:?} missing from {:?}",
                        department, missing
                    )))
                }
                MissingPolicy::ZeroFill => {
                    warn!(department = %department, ?missing, "zero-filling absent years");
                }
            }
        }

        rows.push(WideRow {
            department,
            totals: slots.into_iter().map(|c| c.unwrap_or(0.0)).collect(),
        });
    }

    info!(
        departments = rows.len(),
        first = years[0],
        last = years[years.len() - 1],
        "merged yearly summaries"
    );
    Ok(WideSummaryTable { years, rows })
}

impl WideSummaryTable {
    pub fn header(&self) -> Vec<String> {
        std::iter::once("Departamento".to_string())
            .chain(self.years.iter().map(|y| format!("y_{}", y)))
            .collect()
    }

    /// `(department, total)` pairs of one year's column.
    pub fn column(&self, year: i32) -> Option<Vec<(&str, f64)>> {
        let idx = self.years.iter().position(|y| *y == year)?;
        Some(
            self.rows
                .iter()
                .map(|r| (r.department.as_str(), r.totals[idx]))
                .collect(),
        )
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(self.header())?;
        for row in &self.rows {
            wtr.serialize((&row.department, &row.totals))?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        write_atomically(path, |out| self.write(out))
    }
}
