// src/process/reader.rs

use arrow::array::{Array, Float64Array, Int8Array, StringArray};
use arrow::csv::{Reader as ArrowCsvReader, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::{BufRead, BufReader, Chain, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::schema::{AliasTable, RecordLayout};

/// 2^19 rows, the batch size the yearly files were always read with.
pub const DEFAULT_CHUNK_SIZE: usize = 524_288;

/// The three aggregated fields of one row, department already canonicalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendRecord<'a> {
    pub department: &'a str,
    pub month: u8,
    pub amount: f64,
}

/// One bounded batch of rows, reduced to the aggregated columns.
///
/// The remaining 60 columns are dropped as soon as the batch is parsed, so a
/// chunk only pins three Arrow arrays.
#[derive(Debug, Clone)]
pub struct RecordChunk {
    index: usize,
    first_row: u64,
    departments: StringArray,
    months: Int8Array,
    amounts: Float64Array,
    aliases: Arc<AliasTable>,
    aliased_rows: u64,
}

impl RecordChunk {
    /// Validate and project a parsed batch.
    fn from_batch(
        batch: &RecordBatch,
        layout: &RecordLayout,
        index: usize,
        first_row: u64,
        path: &Path,
        aliases: Arc<AliasTable>,
    ) -> Result<Self> {
        let malformed = |row: u64, detail: String| PipelineError::MalformedRecord {
            path: path.to_path_buf(),
            row,
            detail,
        };

        let departments = batch
            .column(layout.department)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| malformed(first_row, "department column is not text".into()))?
            .clone();
        let months = batch
            .column(layout.month)
            .as_any()
            .downcast_ref::<Int8Array>()
            .ok_or_else(|| malformed(first_row, "month column is not Int8".into()))?
            .clone();
        let amounts = batch
            .column(layout.amount)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| malformed(first_row, "amount column is not Float64".into()))?
            .clone();

        for i in 0..batch.num_rows() {
            let row = first_row + i as u64;
            if months.is_null(i) {
                return Err(malformed(row, format!("blank {}", layout.column_name(layout.month))));
            }
            let month = months.value(i);
            if !(0..=12).contains(&month) {
                return Err(malformed(row, format!("month {} outside 0..=12", month)));
            }
            if amounts.is_null(i) {
                return Err(malformed(row, format!("blank {}", layout.column_name(layout.amount))));
            }
            if !amounts.value(i).is_finite() {
                return Err(malformed(row, format!("non-finite amount {}", amounts.value(i))));
            }
        }

        let aliased_rows = if aliases.is_empty() {
            0
        } else {
            departments
                .iter()
                .flatten()
                .filter(|d| aliases.is_alias(d))
                .count() as u64
        };

        Ok(Self {
            index,
            first_row,
            departments,
            months,
            amounts,
            aliases,
            aliased_rows,
        })
    }

    /// Build a chunk directly from already-extracted fields.
    pub fn from_records(
        index: usize,
        first_row: u64,
        records: &[(&str, u8, f64)],
        aliases: Arc<AliasTable>,
    ) -> Self {
        let departments = StringArray::from(records.iter().map(|r| r.0).collect::<Vec<_>>());
        let months = Int8Array::from(records.iter().map(|r| r.1 as i8).collect::<Vec<_>>());
        let amounts = Float64Array::from(records.iter().map(|r| r.2).collect::<Vec<_>>());
        let aliased_rows = records.iter().filter(|r| aliases.is_alias(r.0)).count() as u64;
        Self {
            index,
            first_row,
            departments,
            months,
            amounts,
            aliases,
            aliased_rows,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Offset of this chunk's first data row within its file.
    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Rows whose department was rewritten by the alias table.
    pub fn aliased_rows(&self) -> u64 {
        self.aliased_rows
    }

    pub fn records(&self) -> impl Iterator<Item = SpendRecord<'_>> + '_ {
        (0..self.len()).map(move |i| {
            // blank text cells arrive as nulls
            let raw = if self.departments.is_null(i) {
                ""
            } else {
                self.departments.value(i)
            };
            SpendRecord {
                department: self.aliases.canonical(raw),
                month: self.months.value(i) as u8,
                amount: self.amounts.value(i),
            }
        })
    }
}

type Source = Chain<Cursor<Vec<u8>>, BufReader<File>>;

/// Lazily parses one delimited file into typed chunks of at most `chunk_size` rows.
///
/// Re-open the file to restart; a reader is never resumed mid-stream. After
/// the first error the iterator is exhausted, and dropping it closes the file.
pub struct ChunkReader {
    path: PathBuf,
    layout: &'static RecordLayout,
    aliases: Arc<AliasTable>,
    batches: Option<ArrowCsvReader<Source>>,
    next_index: usize,
    rows_read: u64,
    had_header: bool,
}

impl ChunkReader {
    pub fn open(
        path: impl AsRef<Path>,
        layout: &'static RecordLayout,
        chunk_size: usize,
        aliases: Arc<AliasTable>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if chunk_size == 0 {
            return Err(PipelineError::InvalidArgument("chunk size must be positive".into()));
        }

        let file = File::open(&path).map_err(|e| PipelineError::io(&path, e))?;
        let mut buffered = BufReader::new(file);

        // 1) Peek the first non-blank line to decide header vs. headerless split part
        let mut first_line = Vec::new();
        let mut blank_lines = 0usize;
        loop {
            first_line.clear();
            let n = buffered
                .read_until(b'\n', &mut first_line)
                .map_err(|e| PipelineError::io(&path, e))?;
            if n == 0 || !first_line.iter().all(u8::is_ascii_whitespace) {
                break;
            }
            blank_lines += 1;
        }
        if blank_lines > 0 {
            debug!(path = %path.display(), blank_lines, "skipped leading blank lines");
        }

        if first_line.iter().all(u8::is_ascii_whitespace) {
            warn!(path = %path.display(), "empty input file");
            return Ok(Self {
                path,
                layout,
                aliases,
                batches: None,
                next_index: 0,
                rows_read: 0,
                had_header: false,
            });
        }

        let had_header = Self::classify_first_line(&path, layout, &first_line)?;
        if had_header {
            first_line.clear();
        } else {
            debug!(path = %path.display(), "no header line; reading as a split part");
        }

        // 2) Hand the rest of the stream (plus the first line, if it was data) to Arrow
        let source = Cursor::new(first_line).chain(buffered);
        let batches = ReaderBuilder::new(layout.arrow_schema())
            .with_header(false)
            .with_batch_size(chunk_size)
            .build(source)?;

        Ok(Self {
            path,
            layout,
            aliases,
            batches: Some(batches),
            next_index: 0,
            rows_read: 0,
            had_header,
        })
    }

    /// `Ok(true)` for a header, `Ok(false)` for a data row, an error for anything else.
    fn classify_first_line(path: &Path, layout: &RecordLayout, line: &[u8]) -> Result<bool> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line);
        let record = match rdr.records().next() {
            Some(Ok(rec)) => rec,
            Some(Err(e)) => {
                return Err(PipelineError::LayoutMismatch {
                    path: path.to_path_buf(),
                    detail: format!("unreadable first line: {}", e),
                })
            }
            None => return Ok(false),
        };

        if record.len() != layout.width() {
            return Err(PipelineError::LayoutMismatch {
                path: path.to_path_buf(),
                detail: format!(
                    "expected {} columns ({}), first line has {}",
                    layout.width(),
                    layout.version,
                    record.len()
                ),
            });
        }
        if layout.is_header(&record) {
            return Ok(true);
        }

        let month_cell = record.get(layout.month).unwrap_or_default().trim();
        if month_cell.parse::<i8>().is_ok() {
            return Ok(false);
        }
        Err(PipelineError::LayoutMismatch {
            path: path.to_path_buf(),
            detail: format!(
                "first line is neither the {} header nor a data row (column {} = {:?})",
                layout.version,
                layout.column_name(layout.month),
                month_cell
            ),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn had_header(&self) -> bool {
        self.had_header
    }

    /// Data rows handed out so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl Iterator for ChunkReader {
    type Item = Result<RecordChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = match self.batches.as_mut()?.next()? {
            Ok(batch) => batch,
            Err(e) => {
                // exact line is in Arrow's message; the offset is the chunk start
                self.batches = None;
                return Some(Err(PipelineError::MalformedRecord {
                    path: self.path.clone(),
                    row: self.rows_read,
                    detail: e.to_string(),
                }));
            }
        };

        let chunk = RecordChunk::from_batch(
            &batch,
            self.layout,
            self.next_index,
            self.rows_read,
            &self.path,
            Arc::clone(&self.aliases),
        );
        match chunk {
            Ok(chunk) => {
                debug!(
                    path = %self.path.display(),
                    chunk = chunk.index(),
                    rows = chunk.len(),
                    "chunk parsed"
                );
                self.next_index += 1;
                self.rows_read += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.batches = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::layout::fixtures::record_line;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(lines: &[String]) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(tmp, "{}", line).unwrap();
        }
        tmp.flush().unwrap();
        tmp
    }

    fn open(tmp: &NamedTempFile, chunk_size: usize) -> ChunkReader {
        ChunkReader::open(
            tmp.path(),
            RecordLayout::mef_gasto_v1(),
            chunk_size,
            Arc::new(AliasTable::with_defaults(Vec::<(String, String)>::new())),
        )
        .unwrap()
    }

    #[test]
    fn reads_fixed_size_chunks() -> anyhow::Result<()> {
        let layout = RecordLayout::mef_gasto_v1();
        let mut lines = vec![layout.header_line()];
        for i in 0..5 {
            lines.push(record_line("LIMA", i, &format!("{}.5", i)));
        }
        let tmp = write_file(&lines);

        let reader = open(&tmp, 2);
        assert!(reader.had_header());
        let chunks = reader.collect::<Result<Vec<_>>>()?;
        assert_eq!(chunks.iter().map(RecordChunk::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(chunks[2].first_row(), 4);
        assert_eq!(chunks[2].index(), 2);

        let last: Vec<SpendRecord> = chunks[2].records().collect();
        assert_eq!(
            last,
            vec![SpendRecord {
                department: "LIMA",
                month: 4,
                amount: 4.5
            }]
        );
        Ok(())
    }

    #[test]
    fn headerless_part_is_read_as_data() -> anyhow::Result<()> {
        let tmp = write_file(&[record_line("CUSCO", 2, "-10"), record_line("CALLAO", 0, "3")]);
        let reader = open(&tmp, 10);
        assert!(!reader.had_header());
        let chunks = reader.collect::<Result<Vec<_>>>()?;
        assert_eq!(chunks.len(), 1);
        let recs: Vec<SpendRecord> = chunks[0].records().collect();
        assert_eq!(recs[0].amount, -10.0);
        assert_eq!(recs[1].department, "PROVINCIA CONSTITUCIONAL DEL CALLAO");
        assert_eq!(chunks[0].aliased_rows(), 1);
        Ok(())
    }

    #[test]
    fn non_numeric_amount_fails_with_offset() {
        let layout = RecordLayout::mef_gasto_v1();
        let tmp = write_file(&[
            layout.header_line(),
            record_line("LIMA", 1, "1.0"),
            record_line("LIMA", 1, "2.0"),
            record_line("LIMA", 1, "abc"),
        ]);
        let results: Vec<_> = open(&tmp, 2).collect();
        assert_eq!(results.len(), 2, "iterator stops after the first error");
        assert!(results[0].is_ok());
        match &results[1] {
            Err(PipelineError::MalformedRecord { path, row, .. }) => {
                assert_eq!(path, tmp.path());
                assert_eq!(*row, 2);
            }
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn out_of_range_month_and_blank_amount_are_rejected() {
        let tmp = write_file(&[record_line("LIMA", 1, "1.0"), record_line("LIMA", 13, "1.0")]);
        let err = open(&tmp, 8).next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { row: 1, .. }), "{:?}", err);

        let tmp = write_file(&[record_line("LIMA", 1, "")]);
        let err = open(&tmp, 8).next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { row: 0, .. }), "{:?}", err);
    }

    #[test]
    fn shifted_header_is_a_layout_mismatch() {
        let layout = RecordLayout::mef_gasto_v1();
        let mut names: Vec<&str> = layout.columns.iter().map(|(n, _)| *n).collect();
        names.swap(1, 2);
        let tmp = write_file(&[names.join(",")]);
        let err = ChunkReader::open(tmp.path(), layout, 8, Arc::new(AliasTable::empty()))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::LayoutMismatch { .. }), "{:?}", err);

        let tmp = write_file(&["a,b,c".to_string()]);
        let err = ChunkReader::open(tmp.path(), layout, 8, Arc::new(AliasTable::empty()))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::LayoutMismatch { .. }));
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let tmp = NamedTempFile::new().unwrap();
        assert_eq!(open(&tmp, 4).count(), 0);

        let tmp = write_file(&["".to_string(), "  \r".to_string()]);
        assert_eq!(open(&tmp, 4).count(), 0);
    }

    #[test]
    fn leading_blank_lines_are_skipped() -> anyhow::Result<()> {
        let layout = RecordLayout::mef_gasto_v1();
        let tmp = write_file(&[
            String::new(),
            layout.header_line(),
            record_line("LIMA", 3, "100.0"),
        ]);
        let reader = open(&tmp, 4);
        assert!(reader.had_header());
        let chunks = reader.collect::<Result<Vec<_>>>()?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].first_row(), 0);
        let recs: Vec<SpendRecord> = chunks[0].records().collect();
        assert_eq!(recs[0].department, "LIMA");
        assert_eq!(recs[0].amount, 100.0);
        Ok(())
    }

    #[test]
    fn non_utf8_first_line_names_the_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"\xff\xfe,MES\n").unwrap();
        tmp.flush().unwrap();
        match ChunkReader::open(tmp.path(), RecordLayout::mef_gasto_v1(), 8, Arc::new(AliasTable::empty())) {
            Err(PipelineError::LayoutMismatch { path, .. }) => assert_eq!(path, tmp.path()),
            Err(other) => panic!("expected LayoutMismatch, got {:?}", other),
            Ok(_) => panic!("expected LayoutMismatch, got a reader"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ChunkReader::open(
            "/definitely/not/here.csv",
            RecordLayout::mef_gasto_v1(),
            4,
            Arc::new(AliasTable::empty()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
