//! Index key values and key-path extraction.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A value that can be stored in a secondary index.
///
/// Values of different types order by type first
/// (`Bool < Number < Text`), then by value. Integers and reals compare
/// numerically with each other so a price index can mix `3` and `2.5`.
///
/// JSON `null`, arrays, and objects are not indexable; documents holding
/// them at an index's key path are simply left out of that index.
#[derive(Debug, Clone)]
pub enum IndexValue {
    /// A boolean.
    Bool(bool),
    /// An integral number.
    Int(i64),
    /// A non-integral number.
    Real(f64),
    /// A string.
    Text(String),
}

impl IndexValue {
    /// Converts a JSON value into an index value, if it is indexable.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Real)
                }
            }
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) | Self::Real(_) => 1,
            Self::Text(_) => 2,
        }
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Real(a), Self::Real(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Real(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Self::Real(a), Self::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for IndexValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Resolves a dotted key path (`"customer.id"`) inside a document.
pub fn extract<'a>(document: &'a Value, key_path: &str) -> Option<&'a Value> {
    key_path
        .split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// Renders a primary key. Strings are used as-is, integers in decimal.
pub fn primary_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn cross_type_ordering() {
        let mut values = vec![
            IndexValue::from("apple"),
            IndexValue::from(10_i64),
            IndexValue::from(true),
            IndexValue::from(2.5),
            IndexValue::from(false),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                IndexValue::from(false),
                IndexValue::from(true),
                IndexValue::from(2.5),
                IndexValue::from(10_i64),
                IndexValue::from("apple"),
            ]
        );
    }

    #[test]
    fn int_and_real_with_same_magnitude_are_distinct() {
        let int = IndexValue::Int(3);
        let real = IndexValue::Real(3.0);
        assert!(int < real);
        assert_ne!(int, real);
    }

    #[test]
    fn from_json_skips_unindexable() {
        assert_eq!(IndexValue::from_json(&json!(null)), None);
        assert_eq!(IndexValue::from_json(&json!([1, 2])), None);
        assert_eq!(IndexValue::from_json(&json!({"a": 1})), None);
        assert_eq!(
            IndexValue::from_json(&json!("SKU-1")),
            Some(IndexValue::from("SKU-1"))
        );
        assert_eq!(IndexValue::from_json(&json!(42)), Some(IndexValue::Int(42)));
    }

    #[test]
    fn extract_nested_path() {
        let doc = json!({"id": "s1", "customer": {"id": "c9"}});
        assert_eq!(extract(&doc, "customer.id"), Some(&json!("c9")));
        assert_eq!(extract(&doc, "customer.email"), None);
        assert_eq!(extract(&doc, "id"), Some(&json!("s1")));
    }

    #[test]
    fn primary_key_rendering() {
        assert_eq!(primary_key(&json!("p-1")), Some("p-1".to_string()));
        assert_eq!(primary_key(&json!(17)), Some("17".to_string()));
        assert_eq!(primary_key(&json!("")), None);
        assert_eq!(primary_key(&json!(1.5)), None);
        assert_eq!(primary_key(&json!(null)), None);
    }

    proptest! {
        #[test]
        fn integer_order_matches_i64(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(IndexValue::Int(a).cmp(&IndexValue::Int(b)), a.cmp(&b));
        }

        #[test]
        fn text_order_matches_string(a in ".{0,12}", b in ".{0,12}") {
            prop_assert_eq!(
                IndexValue::from(a.as_str()).cmp(&IndexValue::from(b.as_str())),
                a.cmp(&b)
            );
        }
    }
}
