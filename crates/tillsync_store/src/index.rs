//! Ordered secondary indexes.

use crate::error::{StoreError, StoreResult};
use crate::key::IndexValue;
use crate::schema::IndexSchema;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// A BTree-backed secondary index mapping values to primary keys.
///
/// Supports exact lookups and inclusive range scans. Unique indexes refuse a
/// second primary key under an existing value.
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    schema: IndexSchema,
    entries: BTreeMap<IndexValue, BTreeSet<String>>,
    len: usize,
}

impl SecondaryIndex {
    /// Creates an empty index.
    pub fn new(schema: IndexSchema) -> Self {
        Self {
            schema,
            entries: BTreeMap::new(),
            len: 0,
        }
    }

    /// Returns the index declaration.
    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    /// Fails if inserting `value → key` would break uniqueness.
    ///
    /// `key` itself may already hold the value (an overwrite of the same
    /// document is fine).
    pub fn check_unique(&self, collection: &str, value: &IndexValue, key: &str) -> StoreResult<()> {
        self.check_unique_among(collection, value, &[key])
    }

    /// Like [`check_unique`](Self::check_unique), but any of `keys` may
    /// already hold `value`.
    pub fn check_unique_among(
        &self,
        collection: &str,
        value: &IndexValue,
        keys: &[&str],
    ) -> StoreResult<()> {
        if !self.schema.unique {
            return Ok(());
        }
        match self.entries.get(value) {
            Some(holders) if holders.iter().any(|h| !keys.contains(&h.as_str())) => {
                Err(StoreError::UniqueViolation {
                    collection: collection.to_string(),
                    index: self.schema.name.clone(),
                    value: value.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Adds `value → key`.
    pub fn insert(&mut self, value: IndexValue, key: String) {
        if self.entries.entry(value).or_default().insert(key) {
            self.len += 1;
        }
    }

    /// Removes `value → key`, returning whether it was present.
    pub fn remove(&mut self, value: &IndexValue, key: &str) -> bool {
        let Some(keys) = self.entries.get_mut(value) else {
            return false;
        };
        let removed = keys.remove(key);
        if keys.is_empty() {
            self.entries.remove(value);
        }
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Returns the primary keys stored under exactly `value`.
    pub fn lookup(&self, value: &IndexValue) -> Vec<String> {
        self.entries
            .get(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns primary keys with values in `low..=high`, in value order.
    ///
    /// An inverted range yields nothing.
    pub fn range(&self, low: &IndexValue, high: &IndexValue) -> Vec<String> {
        if low > high {
            return Vec::new();
        }
        self.entries
            .range((Bound::Included(low), Bound::Included(high)))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    /// Number of (value, key) pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date_index() -> SecondaryIndex {
        SecondaryIndex::new(IndexSchema::new("by_date", "created_at"))
    }

    #[test]
    fn lookup_and_remove() {
        let mut index = SecondaryIndex::new(IndexSchema::new("by_category", "category"));
        index.insert("snacks".into(), "p1".into());
        index.insert("snacks".into(), "p2".into());
        index.insert("drinks".into(), "p3".into());

        assert_eq!(index.lookup(&"snacks".into()), vec!["p1", "p2"]);
        assert_eq!(index.len(), 3);

        assert!(index.remove(&"snacks".into(), "p1"));
        assert!(!index.remove(&"snacks".into(), "p1"));
        assert_eq!(index.lookup(&"snacks".into()), vec!["p2"]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn duplicate_insert_counts_once() {
        let mut index = date_index();
        index.insert(5_i64.into(), "s1".into());
        index.insert(5_i64.into(), "s1".into());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let mut index = date_index();
        index.insert(300_i64.into(), "s3".into());
        index.insert(100_i64.into(), "s1".into());
        index.insert(200_i64.into(), "s2".into());
        index.insert(400_i64.into(), "s4".into());

        assert_eq!(
            index.range(&100_i64.into(), &300_i64.into()),
            vec!["s1", "s2", "s3"]
        );
        assert!(index.range(&300_i64.into(), &100_i64.into()).is_empty());
    }

    #[test]
    fn unique_rejects_second_key() {
        let mut index = SecondaryIndex::new(IndexSchema::new("by_sku", "sku").unique());
        index.insert("SKU-1".into(), "p1".into());

        assert!(index.check_unique("product", &"SKU-1".into(), "p1").is_ok());
        assert!(matches!(
            index.check_unique("product", &"SKU-1".into(), "p2"),
            Err(StoreError::UniqueViolation { .. })
        ));
        assert!(index.check_unique("product", &"SKU-2".into(), "p2").is_ok());
    }

    proptest! {
        #[test]
        fn range_matches_filter(values in prop::collection::vec(-1000_i64..1000, 0..60), low in -1000_i64..1000, high in -1000_i64..1000) {
            let mut index = date_index();
            for (i, v) in values.iter().enumerate() {
                index.insert((*v).into(), format!("k{i:03}"));
            }

            let got = index.range(&low.into(), &high.into());

            let mut expected: Vec<(i64, String)> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| **v >= low && **v <= high)
                .map(|(i, v)| (*v, format!("k{i:03}")))
                .collect();
            expected.sort();
            let expected: Vec<String> = expected.into_iter().map(|(_, k)| k).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
