// src/process/materialize.rs

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

use super::accumulate::{Accumulator, Granularity};
use crate::error::{PipelineError, Result};

pub const ANNUAL_HEADER: [&str; 2] = ["Departamento", "Gasto_Total"];
pub const MONTHLY_HEADER: [&str; 3] = ["Departamento", "Mes", "Monto"];

/// One finalized output row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub department: String,
    pub month: Option<u8>,
    pub total: f64,
}

/// Finalize an accumulator into sorted output rows.
///
/// Monthly output drops the month-0 placeholder and blank departments; both
/// were accumulated like any other key. Annual output keeps everything.
pub fn materialize(acc: Accumulator) -> Vec<SummaryRow> {
    let granularity = acc.granularity();
    let mut dropped = 0usize;

    let mut rows: Vec<SummaryRow> = acc
        .into_totals()
        .into_iter()
        .filter(|(key, _)| {
            let keep = granularity == Granularity::Annual
                || (key.month != Some(0) && !key.department.trim().is_empty());
            if !keep {
                dropped += 1;
            }
            keep
        })
        .map(|(key, total)| SummaryRow {
            department: key.department,
            month: key.month,
            total,
        })
        .collect();

    rows.sort_by(|a, b| {
        a.department
            .cmp(&b.department)
            .then_with(|| a.month.cmp(&b.month))
    });

    debug!(
        granularity = granularity.as_str(),
        rows = rows.len(),
        dropped,
        "materialized summary"
    );
    rows
}

/// Department names that collide once case and surrounding whitespace are
/// ignored. These are reported, never merged.
pub fn name_collisions(rows: &[SummaryRow]) -> Vec<Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in rows {
        let folded = row.department.trim().to_uppercase();
        let names = groups.entry(folded).or_default();
        if !names.contains(&row.department) {
            names.push(row.department.clone());
        }
    }
    let collisions: Vec<Vec<String>> = groups
        .into_values()
        .filter(|names| names.len() > 1)
        .collect();
    for names in &collisions {
        warn!(?names, "department names differ only by case or whitespace");
    }
    collisions
}

/// Write rows as a headed CSV table.
pub fn write_summary<W: Write>(writer: W, granularity: Granularity, rows: &[SummaryRow]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    match granularity {
        Granularity::Annual => {
            wtr.write_record(ANNUAL_HEADER)?;
            for row in rows {
                wtr.serialize((&row.department, row.total))?;
            }
        }
        Granularity::Monthly => {
            wtr.write_record(MONTHLY_HEADER)?;
            for row in rows {
                let month = row.month.ok_or_else(|| {
                    PipelineError::InvalidArgument(format!(
                        "monthly row for {} has no month",
                        row.department
                    ))
                })?;
                wtr.serialize((&row.department, month, row.total))?;
            }
        }
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Write rows to `path` atomically: a temp file in the same directory is
/// renamed over the target only after it has been fully flushed.
pub fn write_summary_file(path: &Path, granularity: Granularity, rows: &[SummaryRow]) -> Result<()> {
    write_atomically(path, |file| write_summary(file, granularity, rows))
}

pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path).map_err(|e| PipelineError::io(&temp_path, e))?;
    let mut out = BufWriter::new(file);

    let written = write(&mut out).and_then(|_| {
        out.flush().map_err(|e| PipelineError::io(&temp_path, e))?;
        out.get_ref()
            .sync_all()
            .map_err(|e| PipelineError::io(&temp_path, e))
    });
    drop(out);

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    fs::rename(&temp_path, path).map_err(|e| PipelineError::io(path, e))
}

#[derive(Debug, Deserialize)]
struct AnnualRecord {
    #[serde(rename = "Departamento")]
    department: String,
    #[serde(rename = "Gasto_Total")]
    total: f64,
}

/// Read back an annual summary written by [`write_summary`].
pub fn read_annual_summary(path: &Path) -> Result<Vec<SummaryRow>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut rdr = csv::Reader::from_reader(file);

    let headers = rdr.headers()?.clone();
    if headers.iter().ne(ANNUAL_HEADER) {
        return Err(PipelineError::SchemaMismatch(format!(
            "{} has header {:?}, expected {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>(),
            ANNUAL_HEADER
        )));
    }

    rdr.deserialize::<AnnualRecord>()
        .map(|rec| {
            let rec = rec?;
            Ok(SummaryRow {
                department: rec.department,
                month: None,
                total: rec.total,
            })
        })
        .collect()
}
