//! # TillSync Store
//!
//! Durable, indexed local record store for an offline point-of-sale till.
//!
//! The store keeps cached copies of products, sales, and customers so the
//! till can keep selling with no network, and it hosts the `sync_queue`
//! collection the outbox is persisted in.
//!
//! ## Layers
//!
//! - [`Database`] - the synchronous engine. One append-only log of
//!   checksummed CBOR frames, replayed on open into in-memory documents and
//!   secondary indexes. A torn tail left by a crash is discarded; damage
//!   anywhere else is reported as corruption.
//! - [`DatabaseHandle`] - opens the database on first use, shares that open
//!   between concurrent callers, and runs engine calls on the blocking pool.
//! - [`RecordStore`] - the async API keyed by [`EntityKind`], with typed
//!   helpers for [`Product`], [`Sale`], and [`Customer`].
//!
//! ## Schema versions
//!
//! A [`Schema`] is declared once at a fixed version. Indexes are always
//! rebuilt from the stored documents, so declaring a new index only needs a
//! version bump; [`StoreConfig::on_upgrade`] is called once per increase.
//! Opening a log written by a newer version fails.
//!
//! ## Example
//!
//! ```rust
//! use tillsync_store::{EntityKind, Record, RecordStore, StoreConfig, StoreResult};
//!
//! # async fn demo() -> StoreResult<()> {
//! let store = RecordStore::new(StoreConfig::in_memory("front-till"));
//! let cola = Record::new("p1")
//!     .with_field("sku", "COLA-330")
//!     .with_field("price_cents", 150);
//! store.put(EntityKind::Product, &cola).await?;
//!
//! let found = store
//!     .query_by_index(EntityKind::Product, "by_sku", "COLA-330")
//!     .await?;
//! assert_eq!(found[0].id, "p1");
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(demo()).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod database;
mod error;
mod handle;
mod index;
mod key;
mod lock;
mod log;
mod record;
mod schema;
mod store;

pub use config::{StorageLocation, StoreConfig, UpgradeHook};
pub use database::{CollectionStats, CompactionStats, Database, DatabaseStats};
pub use error::{StoreError, StoreResult};
pub use handle::DatabaseHandle;
pub use index::SecondaryIndex;
pub use key::{extract, primary_key, IndexValue};
pub use log::{compute_crc32, LogEntry};
pub use record::{
    now_millis, Customer, Entity, EntityKind, Product, Record, Sale, SaleItem, SaleStatus,
};
pub use schema::{CollectionSchema, IndexSchema, Schema, POS_SCHEMA_VERSION, SYNC_QUEUE};
pub use store::RecordStore;
