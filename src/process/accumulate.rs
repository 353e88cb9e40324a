// src/process/accumulate.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::reader::RecordChunk;

/// Which key a summary is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One total per department.
    Annual,
    /// One total per (department, month).
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Annual => "annual",
            Granularity::Monthly => "monthly",
        }
    }
}

/// Group key. Derived ordering sorts by department, then month.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub department: String,
    /// `None` for annual keys.
    pub month: Option<u8>,
}

impl AggregationKey {
    pub fn department(department: impl Into<String>) -> Self {
        Self {
            department: department.into(),
            month: None,
        }
    }

    pub fn monthly(department: impl Into<String>, month: u8) -> Self {
        Self {
            department: department.into(),
            month: Some(month),
        }
    }
}

/// Running group-by-sum state for one year of one granularity.
///
/// Owned by a single worker; entries are only ever added to, never removed.
#[derive(Debug, Clone)]
pub struct Accumulator {
    granularity: Granularity,
    totals: HashMap<AggregationKey, f64>,
    rows: u64,
    chunks: u64,
}

impl Accumulator {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            totals: HashMap::new(),
            rows: 0,
            chunks: 0,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Sum one chunk locally, then fold the subtotals into the running totals.
    pub fn accumulate(&mut self, chunk: &RecordChunk) {
        let monthly = self.granularity == Granularity::Monthly;

        // 1) local group-by over borrowed keys: no allocation per row
        let mut local: HashMap<(&str, Option<u8>), f64> = HashMap::new();
        for rec in chunk.records() {
            let month = monthly.then_some(rec.month);
            *local.entry((rec.department, month)).or_insert(0.0) += rec.amount;
        }

        // 2) merge into the running totals, one allocation per distinct key
        for ((department, month), subtotal) in local {
            *self
                .totals
                .entry(AggregationKey {
                    department: department.to_owned(),
                    month,
                })
                .or_insert(0.0) += subtotal;
        }

        self.rows += chunk.len() as u64;
        self.chunks += 1;
    }

    /// Single-row update; equivalent to accumulating a one-row chunk.
    pub fn add(&mut self, department: &str, month: u8, amount: f64) {
        let key = match self.granularity {
            Granularity::Annual => AggregationKey::department(department),
            Granularity::Monthly => AggregationKey::monthly(department, month),
        };
        *self.totals.entry(key).or_insert(0.0) += amount;
        self.rows += 1;
    }

    /// Fold another accumulator of the same granularity into this one.
    pub fn merge(&mut self, other: Accumulator) {
        debug_assert_eq!(self.granularity, other.granularity);
        for (key, subtotal) in other.totals {
            *self.totals.entry(key).or_insert(0.0) += subtotal;
        }
        self.rows += other.rows;
        self.chunks += other.chunks;
    }

    pub fn total(&self, key: &AggregationKey) -> Option<f64> {
        self.totals.get(key).copied()
    }

    /// Distinct keys seen so far.
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub(crate) fn into_totals(self) -> HashMap<AggregationKey, f64> {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AliasTable;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn chunk(records: &[(&str, u8, f64)]) -> RecordChunk {
        RecordChunk::from_records(0, 0, records, Arc::new(AliasTable::empty()))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn month_zero_counts_toward_annual_only() {
        let rows = [("LIMA", 3, 100.0), ("LIMA", 3, 50.5), ("LIMA", 0, 25.0)];

        let mut monthly = Accumulator::new(Granularity::Monthly);
        monthly.accumulate(&chunk(&rows));
        assert_eq!(monthly.total(&AggregationKey::monthly("LIMA", 3)), Some(150.5));
        // month 0 is still a regular key at this stage
        assert_eq!(monthly.total(&AggregationKey::monthly("LIMA", 0)), Some(25.0));

        let mut annual = Accumulator::new(Granularity::Annual);
        annual.accumulate(&chunk(&rows));
        assert_eq!(annual.total(&AggregationKey::department("LIMA")), Some(175.5));
        assert_eq!(annual.len(), 1);
        assert_eq!(annual.rows(), 3);
    }

    #[test]
    fn blank_department_is_accumulated() {
        let mut acc = Accumulator::new(Granularity::Monthly);
        acc.accumulate(&chunk(&[(" ", 4, 7.0), ("", 4, 1.0), ("PIURA", 4, -2.0)]));
        assert_eq!(acc.total(&AggregationKey::monthly(" ", 4)), Some(7.0));
        assert_eq!(acc.total(&AggregationKey::monthly("", 4)), Some(1.0));
        assert_eq!(acc.total(&AggregationKey::monthly("PIURA", 4)), Some(-2.0));
    }

    #[test]
    fn merge_combines_disjoint_runs() {
        let mut a = Accumulator::new(Granularity::Annual);
        a.accumulate(&chunk(&[("TACNA", 1, 1.0)]));
        let mut b = Accumulator::new(Granularity::Annual);
        b.accumulate(&chunk(&[("TACNA", 2, 2.0), ("PUNO", 2, 5.0)]));
        a.merge(b);
        assert_eq!(a.total(&AggregationKey::department("TACNA")), Some(3.0));
        assert_eq!(a.len(), 2);
        assert_eq!(a.chunks(), 2);
        assert_eq!(a.rows(), 3);
    }

    const DEPTS: [&str; 4] = ["AMAZONAS", "LIMA", "PUNO", " "];

    proptest! {
        #[test]
        fn totals_do_not_depend_on_chunk_size(
            rows in prop::collection::vec((0usize..4, 0u8..=12, -1.0e6f64..1.0e6), 1..200),
            chunk_size in 1usize..64,
        ) {
            let records: Vec<(&str, u8, f64)> =
                rows.iter().map(|(d, m, a)| (DEPTS[*d], *m, *a)).collect();

            for granularity in [Granularity::Annual, Granularity::Monthly] {
                let mut chunked = Accumulator::new(granularity);
                for part in records.chunks(chunk_size) {
                    chunked.accumulate(&chunk(part));
                }
                let mut single = Accumulator::new(granularity);
                for (d, m, a) in &records {
                    single.add(d, *m, *a);
                }

                prop_assert_eq!(chunked.len(), single.len());
                prop_assert_eq!(chunked.rows(), single.rows());
                for (key, expected) in single.into_totals() {
                    let got = chunked.total(&key).unwrap_or(f64::NAN);
                    prop_assert!(close(got, expected), "{:?}: {} vs {}", key, got, expected);
                }
            }
        }
    }
}
