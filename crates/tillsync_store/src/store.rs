//! Async record store over a lazily opened database.

use crate::config::StoreConfig;
use crate::database::{CompactionStats, DatabaseStats};
use crate::error::StoreResult;
use crate::handle::DatabaseHandle;
use crate::key::IndexValue;
use crate::record::{now_millis, Entity, EntityKind, Record};
use serde_json::Value;
use tracing::debug;

/// Durable, indexed cache of products, sales, and customers.
///
/// Every method may be called before the underlying database has finished
/// opening; the first call opens it and concurrent callers share that open.
/// Clones share one database.
#[derive(Debug, Clone)]
pub struct RecordStore {
    handle: DatabaseHandle,
}

impl RecordStore {
    /// Creates a store; the database opens on first use.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_handle(DatabaseHandle::new(config))
    }

    /// Creates a store over an existing handle.
    pub fn with_handle(handle: DatabaseHandle) -> Self {
        Self { handle }
    }

    /// Returns the underlying handle.
    pub fn handle(&self) -> &DatabaseHandle {
        &self.handle
    }

    /// Point lookup.
    pub async fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Record>> {
        let key = key.to_string();
        self.handle
            .run(move |db| {
                db.get(kind.collection(), &key)?
                    .map(Record::from_document)
                    .transpose()
            })
            .await
    }

    /// Upserts a record by primary key.
    pub async fn put(&self, kind: EntityKind, record: &Record) -> StoreResult<()> {
        let document = record.to_document();
        self.handle
            .run(move |db| db.put(kind.collection(), document).map(|_| ()))
            .await
    }

    /// Removes a record; removing a missing record succeeds.
    pub async fn delete(&self, kind: EntityKind, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.handle
            .run(move |db| db.delete(kind.collection(), &key).map(|_| ()))
            .await
    }

    /// Returns every record of a kind.
    pub async fn get_all(&self, kind: EntityKind) -> StoreResult<Vec<Record>> {
        self.handle
            .run(move |db| to_records(db.get_all(kind.collection())?))
            .await
    }

    /// Exact-match lookup on a secondary index.
    pub async fn query_by_index(
        &self,
        kind: EntityKind,
        index: &str,
        value: impl Into<IndexValue>,
    ) -> StoreResult<Vec<Record>> {
        let index = index.to_string();
        let value = value.into();
        self.handle
            .run(move |db| to_records(db.query_index(kind.collection(), &index, &value)?))
            .await
    }

    /// Inclusive range scan on a secondary index, in index order.
    pub async fn query_range(
        &self,
        kind: EntityKind,
        index: &str,
        low: impl Into<IndexValue>,
        high: impl Into<IndexValue>,
    ) -> StoreResult<Vec<Record>> {
        let index = index.to_string();
        let (low, high) = (low.into(), high.into());
        self.handle
            .run(move |db| to_records(db.query_range(kind.collection(), &index, &low, &high)?))
            .await
    }

    /// Number of records of a kind.
    pub async fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        self.handle.run(move |db| db.count(kind.collection())).await
    }

    /// Removes every record of a kind.
    pub async fn clear(&self, kind: EntityKind) -> StoreResult<()> {
        self.handle
            .run(move |db| db.clear(kind.collection()).map(|_| ()))
            .await
    }

    /// Moves a record from a temporary key to its permanent one.
    ///
    /// The move is a single logged mutation, so a crash leaves the record
    /// under exactly one of the two keys. Returns `false` if nothing is
    /// stored under `old_id`.
    ///
    /// # Errors
    ///
    /// Returns `UniqueViolation` if another record already holds one of the
    /// record's unique values; the old record is then left in place.
    pub async fn rekey(&self, kind: EntityKind, old_id: &str, new_id: &str) -> StoreResult<bool> {
        if old_id == new_id {
            return Ok(true);
        }
        let (old_id, new_id) = (old_id.to_string(), new_id.to_string());
        self.handle
            .run(move |db| {
                let moved = db.rekey(kind.collection(), &old_id, |document| {
                    let mut record = Record::from_document(document.clone())?;
                    record.id = new_id.clone();
                    Ok(record.to_document())
                })?;
                if moved.is_some() {
                    debug!(%kind, %old_id, %new_id, "record rekeyed");
                }
                Ok(moved.is_some())
            })
            .await
    }

    /// Typed point lookup.
    pub async fn get_entity<E: Entity>(&self, key: &str) -> StoreResult<Option<E>> {
        self.get(E::KIND, key)
            .await?
            .map(Record::into_entity)
            .transpose()
    }

    /// Typed upsert. Stamps `updated_at` if the entity left it at zero.
    pub async fn put_entity<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        let mut record = Record::from_entity(entity)?;
        if record.updated_at == 0 {
            record.updated_at = now_millis();
        }
        self.put(E::KIND, &record).await
    }

    /// Typed full scan.
    pub async fn all_entities<E: Entity>(&self) -> StoreResult<Vec<E>> {
        self.get_all(E::KIND)
            .await?
            .into_iter()
            .map(Record::into_entity)
            .collect()
    }

    /// Raw documents of any declared collection, including `sync_queue`.
    pub async fn documents(&self, collection: &str) -> StoreResult<Vec<Value>> {
        let collection = collection.to_string();
        self.handle.run(move |db| db.get_all(&collection)).await
    }

    /// Database statistics.
    pub async fn stats(&self) -> StoreResult<DatabaseStats> {
        self.handle.run(|db| db.stats()).await
    }

    /// Compacts the log.
    pub async fn compact(&self) -> StoreResult<CompactionStats> {
        self.handle.run(|db| db.compact()).await
    }

    /// Flushes the log.
    pub async fn shutdown(&self) -> StoreResult<()> {
        self.handle.shutdown().await
    }
}

fn to_records(documents: Vec<Value>) -> StoreResult<Vec<Record>> {
    documents.into_iter().map(Record::from_document).collect()
}

impl From<DatabaseHandle> for RecordStore {
    fn from(handle: DatabaseHandle) -> Self {
        Self::with_handle(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Product;

    fn store() -> RecordStore {
        RecordStore::new(StoreConfig::in_memory("store-test"))
    }

    fn product(id: &str, sku: &str, category: &str) -> Record {
        Record::new(id)
            .with_field("sku", sku)
            .with_field("name", format!("Item {id}"))
            .with_field("category", category)
            .with_field("price_cents", 100)
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        assert!(store()
            .get(EntityKind::Product, "nope")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = store();
        let record = product("p1", "A", "snacks");
        store.put(EntityKind::Product, &record).await.unwrap();
        store.put(EntityKind::Product, &record).await.unwrap();
        assert_eq!(store.count(EntityKind::Product).await.unwrap(), 1);
        assert_eq!(
            store.get(EntityKind::Product, "p1").await.unwrap(),
            Some(record)
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store();
        store
            .put(EntityKind::Product, &product("p1", "A", "snacks"))
            .await
            .unwrap();
        store.delete(EntityKind::Product, "p1").await.unwrap();
        store.delete(EntityKind::Product, "p1").await.unwrap();
        assert_eq!(store.count(EntityKind::Product).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn index_queries() {
        let store = store();
        for (id, sku, category) in [("p1", "A", "snacks"), ("p2", "B", "drinks"), ("p3", "C", "snacks")] {
            store
                .put(EntityKind::Product, &product(id, sku, category))
                .await
                .unwrap();
        }
        let snacks = store
            .query_by_index(EntityKind::Product, "by_category", "snacks")
            .await
            .unwrap();
        assert_eq!(snacks.len(), 2);

        let by_sku = store
            .query_range(EntityKind::Product, "by_sku", "B", "C")
            .await
            .unwrap();
        let ids: Vec<&str> = by_sku.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);
    }

    #[tokio::test]
    async fn clear_removes_only_one_kind() {
        let store = store();
        store
            .put(EntityKind::Product, &product("p1", "A", "snacks"))
            .await
            .unwrap();
        store
            .put(EntityKind::Customer, &Record::new("c1").with_field("name", "Ada"))
            .await
            .unwrap();
        store.clear(EntityKind::Product).await.unwrap();
        assert_eq!(store.count(EntityKind::Product).await.unwrap(), 0);
        assert_eq!(store.count(EntityKind::Customer).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rekey_moves_record_and_unique_values() {
        let store = store();
        store
            .put(EntityKind::Product, &product("tmp-1", "A", "snacks"))
            .await
            .unwrap();

        assert!(store.rekey(EntityKind::Product, "tmp-1", "p-100").await.unwrap());
        assert!(store.get(EntityKind::Product, "tmp-1").await.unwrap().is_none());
        let moved = store
            .query_by_index(EntityKind::Product, "by_sku", "A")
            .await
            .unwrap();
        assert_eq!(moved[0].id, "p-100");

        assert!(!store.rekey(EntityKind::Product, "tmp-1", "p-101").await.unwrap());
    }

    #[tokio::test]
    async fn rekey_onto_existing_key_replaces_it() {
        let store = store();
        store
            .put(EntityKind::Product, &product("tmp-1", "A", "snacks"))
            .await
            .unwrap();
        store
            .put(EntityKind::Product, &product("p-7", "B", "drinks"))
            .await
            .unwrap();

        assert!(store.rekey(EntityKind::Product, "tmp-1", "p-7").await.unwrap());
        assert_eq!(store.count(EntityKind::Product).await.unwrap(), 1);
        let kept = store.get(EntityKind::Product, "p-7").await.unwrap().unwrap();
        assert_eq!(kept.field("sku"), Some(&serde_json::json!("A")));
        assert!(store
            .query_by_index(EntityKind::Product, "by_sku", "B")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn typed_helpers() {
        let store = store();
        let cola = Product {
            id: "p1".into(),
            sku: "COLA-330".into(),
            name: "Cola".into(),
            category: "drinks".into(),
            barcode: Some("5000112637922".into()),
            price_cents: 150,
            stock: 24,
            updated_at: 0,
        };
        store.put_entity(&cola).await.unwrap();

        let stored: Product = store.get_entity("p1").await.unwrap().unwrap();
        assert!(stored.updated_at > 0);
        assert_eq!(stored.sku, cola.sku);
        assert_eq!(store.all_entities::<Product>().await.unwrap().len(), 1);
    }
}
