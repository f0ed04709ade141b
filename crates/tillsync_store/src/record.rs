//! Records and the typed point-of-sale entities.

use crate::error::{StoreError, StoreResult};
use crate::key;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// The kinds of record a till stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A sellable item.
    Product,
    /// A completed or in-progress sale.
    Sale,
    /// A known customer.
    Customer,
}

impl EntityKind {
    /// Every kind, in declaration order.
    pub const ALL: [EntityKind; 3] = [Self::Product, Self::Sale, Self::Customer];

    /// Returns the lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Sale => "sale",
            Self::Customer => "customer",
        }
    }

    /// Returns the collection records of this kind are stored in.
    pub fn collection(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Self::Product),
            "sale" => Ok(Self::Sale),
            "customer" => Ok(Self::Customer),
            other => Err(StoreError::unknown_collection(other)),
        }
    }
}

/// A stored entity in generic form.
///
/// `fields` holds everything except `id` and `updated_at`; the stored
/// document is the union of the three.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Primary key.
    pub id: String,
    /// Kind-specific fields.
    pub fields: Map<String, Value>,
    /// Last modification, ms since epoch.
    pub updated_at: i64,
}

impl Record {
    /// Creates a record with no fields, stamped now.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
            updated_at: now_millis(),
        }
    }

    /// Creates a record under a fresh client-generated id (`local-<uuid>`),
    /// to be replaced by the server's id once the CREATE syncs.
    pub fn with_local_id() -> Self {
        Self::new(format!("local-{}", Uuid::new_v4()))
    }

    /// Sets a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Builds the stored document.
    pub fn to_document(&self) -> Value {
        let mut document = self.fields.clone();
        document.insert("id".into(), Value::String(self.id.clone()));
        document.insert("updated_at".into(), Value::from(self.updated_at));
        Value::Object(document)
    }

    /// Materializes a record from a stored document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the document is not an object or has no
    /// usable `id`.
    pub fn from_document(document: Value) -> StoreResult<Self> {
        let Value::Object(mut fields) = document else {
            return Err(StoreError::invalid_record("document is not an object"));
        };
        let id = fields
            .remove("id")
            .as_ref()
            .and_then(key::primary_key)
            .ok_or_else(|| StoreError::invalid_record("document has no id"))?;
        let updated_at = fields
            .remove("updated_at")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Ok(Self {
            id,
            fields,
            updated_at,
        })
    }

    /// Converts a typed entity.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if the entity does not serialize to an object.
    pub fn from_entity<E: Entity>(entity: &E) -> StoreResult<Self> {
        let document =
            serde_json::to_value(entity).map_err(|e| StoreError::encode(e.to_string()))?;
        Self::from_document(document)
    }

    /// Converts into a typed entity.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the fields do not match `E`.
    pub fn into_entity<E: Entity>(self) -> StoreResult<E> {
        serde_json::from_value(self.to_document()).map_err(|e| StoreError::decode(e.to_string()))
    }
}

/// A typed record stored in a fixed collection.
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    /// Kind of record.
    const KIND: EntityKind;

    /// Primary key.
    fn id(&self) -> &str;
}

/// A sellable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Primary key.
    pub id: String,
    /// Stock keeping unit, unique per till.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Category used for browsing.
    #[serde(default)]
    pub category: String,
    /// Scannable barcode, unique when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    /// Unit price in cents.
    pub price_cents: i64,
    /// Units on hand.
    #[serde(default)]
    pub stock: i64,
    /// Last modification, ms since epoch.
    #[serde(default)]
    pub updated_at: i64,
}

impl Entity for Product {
    const KIND: EntityKind = EntityKind::Product;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    /// Items still being rung up.
    Open,
    /// Paid.
    Completed,
    /// Refunded after completion.
    Refunded,
    /// Cancelled before payment.
    Voided,
}

/// One line of a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem {
    /// Product sold.
    pub product_id: String,
    /// Units sold.
    pub quantity: u32,
    /// Price per unit at the time of sale, in cents.
    pub unit_price_cents: i64,
}

/// A sale rung up at the till.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    /// Primary key.
    pub id: String,
    /// Customer the sale is attributed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// When the sale was opened, ms since epoch.
    pub created_at: i64,
    /// Total in cents.
    pub total_cents: i64,
    /// Current status.
    pub status: SaleStatus,
    /// Line items.
    #[serde(default)]
    pub items: Vec<SaleItem>,
    /// Last modification, ms since epoch.
    #[serde(default)]
    pub updated_at: i64,
}

impl Entity for Sale {
    const KIND: EntityKind = EntityKind::Sale;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A known customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Primary key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address, unique when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Loyalty balance.
    #[serde(default)]
    pub loyalty_points: i64,
    /// Last modification, ms since epoch.
    #[serde(default)]
    pub updated_at: i64,
}

impl Entity for Customer {
    const KIND: EntityKind = EntityKind::Customer;

    fn id(&self) -> &str {
        &self.id
    }
}
