//! Schema declarations: collections, primary keys, and secondary indexes.

/// Name of the collection holding the sync outbox.
pub const SYNC_QUEUE: &str = "sync_queue";

/// Current schema version of the point-of-sale layout.
pub const POS_SCHEMA_VERSION: u32 = 1;

/// A secondary index over one key path of a collection's documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Index name, used by queries.
    pub name: String,
    /// Dotted path of the indexed field.
    pub key_path: String,
    /// Whether two documents may share a value.
    pub unique: bool,
}

impl IndexSchema {
    /// Declares a non-unique index.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A named collection of documents keyed by one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Dotted path of the primary key.
    pub key_path: String,
    /// Declared secondary indexes.
    pub indexes: Vec<IndexSchema>,
}

impl CollectionSchema {
    /// Declares a collection keyed by `key_path`.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            indexes: Vec::new(),
        }
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an index declaration by name.
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

/// The full, versioned layout of one database.
///
/// Evolution is additive: bump [`version`](Self::version) and declare the new
/// collections or indexes. On open, indexes are rebuilt from the stored
/// documents, which covers "declare indexes if missing".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Schema version, recorded in the log.
    pub version: u32,
    /// Declared collections.
    pub collections: Vec<CollectionSchema>,
}

impl Schema {
    /// Creates an empty schema at `version`.
    pub fn new(version: u32) -> Self {
        Self {
            version,
            collections: Vec::new(),
        }
    }

    /// Adds a collection.
    #[must_use]
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.push(collection);
        self
    }

    /// Looks up a collection declaration by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// The till's layout: one collection per entity kind plus the outbox.
    pub fn point_of_sale() -> Self {
        Self::new(POS_SCHEMA_VERSION)
            .with_collection(
                CollectionSchema::new("product", "id")
                    .with_index(IndexSchema::new("by_sku", "sku").unique())
                    .with_index(IndexSchema::new("by_barcode", "barcode").unique())
                    .with_index(IndexSchema::new("by_category", "category")),
            )
            .with_collection(
                CollectionSchema::new("sale", "id")
                    .with_index(IndexSchema::new("by_customer", "customer_id"))
                    .with_index(IndexSchema::new("by_date", "created_at"))
                    .with_index(IndexSchema::new("by_status", "status")),
            )
            .with_collection(
                CollectionSchema::new("customer", "id")
                    .with_index(IndexSchema::new("by_email", "email").unique())
                    .with_index(IndexSchema::new("by_phone", "phone")),
            )
            .with_collection(
                CollectionSchema::new(SYNC_QUEUE, "id")
                    .with_index(IndexSchema::new("by_status", "status"))
                    .with_index(IndexSchema::new("by_timestamp", "timestamp"))
                    .with_index(IndexSchema::new("by_entity", "entity")),
            )
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::point_of_sale()
    }
}
