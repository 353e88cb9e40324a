// src/schema/alias.rs

use std::collections::BTreeMap;

/// Built-in department aliases: variant spelling → canonical name.
///
/// The canonical side is the spelling the spending files use most, which is
/// also what the map layer keys its regions by.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[("CALLAO", "PROVINCIA CONSTITUCIONAL DEL CALLAO")];

/// Exact-match department canonicalization, applied once at ingestion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasTable {
    map: BTreeMap<String, String>,
}

impl AliasTable {
    /// An empty table: every name passes through untouched.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in aliases plus `extra` (which win on conflict).
    pub fn with_defaults<I, K, V>(extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut table = Self::empty();
        for (variant, canonical) in DEFAULT_ALIASES {
            table.insert(*variant, *canonical);
        }
        for (variant, canonical) in extra {
            table.insert(variant, canonical);
        }
        table
    }

    pub fn insert(&mut self, variant: impl Into<String>, canonical: impl Into<String>) {
        self.map.insert(variant.into(), canonical.into());
    }

    /// Canonical spelling of `name`, or `name` itself when no alias applies.
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.map.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callao_is_canonicalized() {
        let table = AliasTable::with_defaults(Vec::<(String, String)>::new());
        assert_eq!(table.canonical("CALLAO"), "PROVINCIA CONSTITUCIONAL DEL CALLAO");
        assert_eq!(table.canonical("LIMA"), "LIMA");
        // exact match only: no trimming, no case folding
        assert_eq!(table.canonical("callao"), "callao");
        assert_eq!(table.canonical(" CALLAO"), " CALLAO");
    }

    #[test]
    fn extra_entries_override_defaults() {
        let table = AliasTable::with_defaults([("CALLAO", "CALLAO"), ("LIMA METROPOLITANA", "LIMA")]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.canonical("CALLAO"), "CALLAO");
        assert_eq!(table.canonical("LIMA METROPOLITANA"), "LIMA");
        assert!(table.is_alias("LIMA METROPOLITANA"));
        assert!(!AliasTable::empty().is_alias("CALLAO"));
    }
}
