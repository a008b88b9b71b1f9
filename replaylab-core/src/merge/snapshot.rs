use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rows contributed by each source at one logical timestamp.
///
/// Never empty: the scheduler only emits a snapshot when at least one source
/// contributed. Entries are keyed by source name in sorted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<R> {
    pub timestamp: DateTime<Utc>,
    pub entries: BTreeMap<String, Vec<R>>,
}

impl<R> Snapshot<R> {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, source: &str) -> Option<&[R]> {
        self.entries.get(source).map(Vec::as_slice)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.entries.contains_key(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of contributing sources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total rows across all sources.
    pub fn row_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// All rows, grouped by source in name order.
    pub fn rows(&self) -> impl Iterator<Item = &R> {
        self.entries.values().flatten()
    }

    pub(crate) fn insert(&mut self, source: &str, rows: Vec<R>) {
        self.entries.entry(source.to_string()).or_default().extend(rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rows_are_grouped_by_source_name() {
        let mut snap = Snapshot::new(Utc.timestamp_opt(3, 0).unwrap());
        snap.insert("e2", vec![20]);
        snap.insert("e1", vec![10, 11]);

        assert_eq!(snap.len(), 2);
        assert_eq!(snap.row_count(), 3);
        assert_eq!(snap.sources().collect::<Vec<_>>(), vec!["e1", "e2"]);
        assert_eq!(snap.rows().copied().collect::<Vec<_>>(), vec![10, 11, 20]);
        assert_eq!(snap.get("e1"), Some(&[10, 11][..]));
        assert!(snap.get("e3").is_none());
    }
}
