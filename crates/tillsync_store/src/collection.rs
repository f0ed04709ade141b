//! In-memory state of one collection: documents plus their indexes.

use crate::error::{StoreError, StoreResult};
use crate::index::SecondaryIndex;
use crate::key::{self, IndexValue};
use crate::schema::CollectionSchema;
use serde_json::Value;
use std::collections::HashMap;

/// Documents of one collection keyed by primary key, with their indexes.
#[derive(Debug, Clone)]
pub(crate) struct Collection {
    schema: CollectionSchema,
    documents: HashMap<String, Value>,
    indexes: HashMap<String, SecondaryIndex>,
}

impl Collection {
    pub(crate) fn new(schema: CollectionSchema) -> Self {
        let indexes = schema
            .indexes
            .iter()
            .map(|index| (index.name.clone(), SecondaryIndex::new(index.clone())))
            .collect();
        Self {
            schema,
            documents: HashMap::new(),
            indexes,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.schema.name
    }

    /// Extracts the primary key of `document`.
    pub(crate) fn key_of(&self, document: &Value) -> StoreResult<String> {
        key::extract(document, &self.schema.key_path)
            .and_then(key::primary_key)
            .ok_or_else(|| StoreError::MissingKey {
                collection: self.schema.name.clone(),
                key_path: self.schema.key_path.clone(),
            })
    }

    /// Checks that storing `document` under `key` keeps every unique index
    /// unique. Nothing is modified.
    pub(crate) fn validate(&self, key: &str, document: &Value) -> StoreResult<()> {
        for index in self.indexes.values() {
            if let Some(value) = index_value(document, &index.schema().key_path) {
                index.check_unique(&self.schema.name, &value, key)?;
            }
        }
        Ok(())
    }

    /// Checks that moving the document under `old_key` to `new_key` as
    /// `document` keeps every unique index unique.
    pub(crate) fn validate_move(
        &self,
        old_key: &str,
        new_key: &str,
        document: &Value,
    ) -> StoreResult<()> {
        for index in self.indexes.values() {
            if let Some(value) = index_value(document, &index.schema().key_path) {
                index.check_unique_among(&self.schema.name, &value, &[old_key, new_key])?;
            }
        }
        Ok(())
    }

    /// Moves the document under `old_key` to `new_key`. Callers validate
    /// first.
    pub(crate) fn apply_rekey(&mut self, old_key: &str, new_key: String, document: Value) {
        self.apply_delete(old_key);
        self.apply_put(new_key, document);
    }

    /// Stores `document` under `key`, replacing any previous version.
    ///
    /// Callers validate first; this never fails.
    pub(crate) fn apply_put(&mut self, key: String, document: Value) {
        if let Some(previous) = self.documents.remove(&key) {
            self.unindex(&key, &previous);
        }
        for index in self.indexes.values_mut() {
            if let Some(value) = index_value(&document, &index.schema().key_path) {
                index.insert(value, key.clone());
            }
        }
        self.documents.insert(key, document);
    }

    /// Removes the document under `key`, returning whether it existed.
    pub(crate) fn apply_delete(&mut self, key: &str) -> bool {
        match self.documents.remove(key) {
            Some(previous) => {
                self.unindex(key, &previous);
                true
            }
            None => false,
        }
    }

    /// Removes every document, returning how many there were.
    pub(crate) fn apply_clear(&mut self) -> usize {
        let count = self.documents.len();
        self.documents.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
        count
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.documents.get(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.documents.contains_key(key)
    }

    pub(crate) fn documents(&self) -> impl Iterator<Item = &Value> {
        self.documents.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.documents.len()
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn lookup(&self, index: &str, value: &IndexValue) -> StoreResult<Vec<Value>> {
        let keys = self.index(index)?.lookup(value);
        Ok(self.resolve(keys))
    }

    pub(crate) fn range(
        &self,
        index: &str,
        low: &IndexValue,
        high: &IndexValue,
    ) -> StoreResult<Vec<Value>> {
        let keys = self.index(index)?.range(low, high);
        Ok(self.resolve(keys))
    }

    fn index(&self, name: &str) -> StoreResult<&SecondaryIndex> {
        self.indexes.get(name).ok_or_else(|| StoreError::UnknownIndex {
            collection: self.schema.name.clone(),
            index: name.to_string(),
        })
    }

    fn resolve(&self, keys: Vec<String>) -> Vec<Value> {
        keys.iter()
            .filter_map(|key| self.documents.get(key).cloned())
            .collect()
    }

    fn unindex(&mut self, key: &str, document: &Value) {
        for index in self.indexes.values_mut() {
            if let Some(value) = index_value(document, &index.schema().key_path) {
                index.remove(&value, key);
            }
        }
    }
}

fn index_value(document: &Value, key_path: &str) -> Option<IndexValue> {
    key::extract(document, key_path).and_then(IndexValue::from_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSchema;
    use serde_json::json;

    fn products() -> Collection {
        Collection::new(
            CollectionSchema::new("product", "id")
                .with_index(IndexSchema::new("by_sku", "sku").unique())
                .with_index(IndexSchema::new("by_category", "category")),
        )
    }

    #[test]
    fn overwrite_moves_index_entries() {
        let mut c = products();
        c.apply_put("p1".into(), json!({"id": "p1", "sku": "A", "category": "snacks"}));
        c.apply_put("p1".into(), json!({"id": "p1", "sku": "A", "category": "drinks"}));

        assert!(c.lookup("by_category", &"snacks".into()).unwrap().is_empty());
        assert_eq!(c.lookup("by_category", &"drinks".into()).unwrap().len(), 1);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn validate_catches_unique_conflict_without_mutating() {
        let mut c = products();
        c.apply_put("p1".into(), json!({"id": "p1", "sku": "A"}));

        let conflicting = json!({"id": "p2", "sku": "A"});
        assert!(matches!(
            c.validate("p2", &conflicting),
            Err(StoreError::UniqueViolation { .. })
        ));
        assert!(!c.contains("p2"));

        let same_doc = json!({"id": "p1", "sku": "A", "category": "x"});
        assert!(c.validate("p1", &same_doc).is_ok());
    }

    #[test]
    fn null_fields_are_not_indexed() {
        let mut c = products();
        c.apply_put("p1".into(), json!({"id": "p1", "sku": null}));
        c.apply_put("p2".into(), json!({"id": "p2", "sku": null}));
        assert!(c.validate("p3", &json!({"id": "p3", "sku": null})).is_ok());
    }

    #[test]
    fn key_of_requires_key() {
        let c = products();
        assert_eq!(c.key_of(&json!({"id": "p1"})).unwrap(), "p1");
        assert!(matches!(
            c.key_of(&json!({"sku": "A"})),
            Err(StoreError::MissingKey { .. })
        ));
    }

    #[test]
    fn unknown_index_is_an_error() {
        let c = products();
        assert!(matches!(
            c.lookup("by_colour", &"red".into()),
            Err(StoreError::UnknownIndex { .. })
        ));
    }

    #[test]
    fn clear_empties_indexes() {
        let mut c = products();
        c.apply_put("p1".into(), json!({"id": "p1", "sku": "A"}));
        assert_eq!(c.apply_clear(), 1);
        assert!(c.validate("p2", &json!({"id": "p2", "sku": "A"})).is_ok());
        assert_eq!(c.len(), 0);
    }
}
