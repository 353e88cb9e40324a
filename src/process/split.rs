// src/process/split.rs
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::{PipelineError, Result};

/// Lines per part the yearly files were historically split into.
pub const DEFAULT_LINES_PER_PART: u64 = 524_288;

/// What a split produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    pub parts: Vec<PathBuf>,
    pub lines: u64,
    pub bytes: u64,
}

/// Path of part `n` for `prefix`: `<prefix><n>.csv`.
pub fn part_path(prefix: &Path, n: usize) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!("{}.csv", n));
    PathBuf::from(name)
}

/// Stream `input` into parts of `lines_per_part` lines each.
///
/// Lines are copied byte for byte, terminators included, so concatenating
/// the parts in order reproduces the input exactly. Existing parts with the
/// same names are truncated, and higher-numbered parts left by an earlier
/// split of the same prefix are removed.
#[instrument(level = "info", skip(input, output_prefix), fields(input = %input.as_ref().display()))]
pub fn split_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output_prefix: Q,
    lines_per_part: u64,
) -> Result<SplitSummary> {
    let input = input.as_ref();
    let prefix = output_prefix.as_ref();
    if lines_per_part == 0 {
        return Err(PipelineError::InvalidArgument("lines per part must be positive".into()));
    }

    if let Some(parent) = prefix.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let start = Instant::now();
    let file = File::open(input).map_err(|e| PipelineError::io(input, e))?;
    let mut reader = BufReader::new(file);

    let mut summary = SplitSummary {
        parts: Vec::new(),
        lines: 0,
        bytes: 0,
    };
    let mut current: Option<(PathBuf, BufWriter<File>)> = None;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| PipelineError::io(input, e))?;
        if n == 0 {
            break;
        }

        if summary.lines % lines_per_part == 0 {
            if let Some((path, out)) = current.take() {
                close_part(&path, out)?;
                info!(part = %path.display(), "part written");
            }
            let path = part_path(prefix, summary.parts.len());
            let out = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
            summary.parts.push(path.clone());
            current = Some((path, BufWriter::new(out)));
        }

        if let Some((path, out)) = current.as_mut() {
            out.write_all(&line).map_err(|e| PipelineError::io(path.as_path(), e))?;
        }
        summary.lines += 1;
        summary.bytes += n as u64;
    }

    match current {
        Some((path, out)) => {
            close_part(&path, out)?;
            info!(part = %path.display(), "part written");
        }
        None => warn!("input is empty; no parts written"),
    }

    // parts left over from an earlier split into more parts
    let mut stale = summary.parts.len();
    loop {
        let path = part_path(prefix, stale);
        if !path.is_file() {
            break;
        }
        std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
        warn!(part = %path.display(), "removed stale part");
        stale += 1;
    }

    info!(
        parts = summary.parts.len(),
        lines = summary.lines,
        elapsed = ?start.elapsed(),
        "split complete"
    );
    Ok(summary)
}

fn close_part(path: &Path, mut out: BufWriter<File>) -> Result<()> {
    out.flush().map_err(|e| PipelineError::io(path, e))
}
