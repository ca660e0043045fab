//! The closed set of property values spacegraph writes to the store.
//!
//! External input (fixtures, JSON payloads) is converted once at the
//! boundary; anything outside this set is rejected there.

use serde::{Deserialize, Serialize};

use crate::error::SpacegraphError;

/// A property value: a scalar, or a list whose elements all share one scalar type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    StringList(Vec<String>),
    BoolList(Vec<bool>),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String form used when a value participates in a key (chunk ids may be stored as integers).
    pub fn key_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Elements of a string list; empty for any other value.
    pub fn string_items(&self) -> Vec<String> {
        match self {
            Self::StringList(items) => items.clone(),
            _ => Vec::new(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) | Self::StringList(_) => "string",
            Self::Bool(_) | Self::BoolList(_) => "bool",
            Self::Int(_) | Self::IntList(_) => "int",
            Self::Float(_) | Self::FloatList(_) => "float",
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(items: Vec<String>) -> Self {
        Self::StringList(items)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(items: Vec<&str>) -> Self {
        Self::StringList(items.into_iter().map(str::to_string).collect())
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = SpacegraphError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::Array(items) => list_from_json(items),
            other => scalar_from_json(other, "$"),
        }
    }
}

fn scalar_from_json(
    value: serde_json::Value,
    path: &str,
) -> Result<PropertyValue, SpacegraphError> {
    use serde_json::Value;

    match value {
        Value::String(s) => Ok(PropertyValue::String(s)),
        Value::Bool(b) => Ok(PropertyValue::Bool(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(PropertyValue::Int(i))
            } else if let Some(x) = n.as_f64() {
                Ok(PropertyValue::Float(x))
            } else {
                Err(invalid(path, "number outside the i64/f64 range"))
            }
        }
        Value::Null => Err(invalid(path, "null is not a storable value")),
        Value::Array(_) => Err(invalid(path, "nested lists are not storable")),
        Value::Object(_) => Err(invalid(path, "maps are not storable")),
    }
}

/// Lists are typed by their first element; every later element must match it.
/// An empty list is stored as an empty string list.
fn list_from_json(items: Vec<serde_json::Value>) -> Result<PropertyValue, SpacegraphError> {
    let mut list = PropertyValue::StringList(Vec::new());
    for (i, item) in items.into_iter().enumerate() {
        let path = format!("$[{i}]");
        let scalar = scalar_from_json(item, &path)?;
        if i == 0 {
            list = match scalar {
                PropertyValue::String(_) => PropertyValue::StringList(Vec::new()),
                PropertyValue::Bool(_) => PropertyValue::BoolList(Vec::new()),
                PropertyValue::Int(_) => PropertyValue::IntList(Vec::new()),
                _ => PropertyValue::FloatList(Vec::new()),
            };
        }
        match (&mut list, scalar) {
            (PropertyValue::StringList(v), PropertyValue::String(s)) => v.push(s),
            (PropertyValue::BoolList(v), PropertyValue::Bool(b)) => v.push(b),
            (PropertyValue::IntList(v), PropertyValue::Int(n)) => v.push(n),
            (PropertyValue::FloatList(v), PropertyValue::Float(x)) => v.push(x),
            (list, scalar) => {
                let reason = format!(
                    "{} element in a {} list; list elements must share one type",
                    scalar.type_name(),
                    list.type_name()
                );
                return Err(invalid(&path, &reason));
            }
        }
    }
    Ok(list)
}

fn invalid(path: &str, reason: &str) -> SpacegraphError {
    SpacegraphError::InvalidProperty {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_convert_from_json() {
        assert_eq!(
            PropertyValue::try_from(json!("tenant_1")).unwrap(),
            PropertyValue::String("tenant_1".into())
        );
        assert_eq!(PropertyValue::try_from(json!(42)).unwrap(), PropertyValue::Int(42));
        assert_eq!(PropertyValue::try_from(json!(true)).unwrap(), PropertyValue::Bool(true));
        assert_eq!(PropertyValue::try_from(json!(0.5)).unwrap(), PropertyValue::Float(0.5));
    }

    #[test]
    fn homogeneous_lists_keep_their_element_type() {
        let members = PropertyValue::try_from(json!(["u1", "u2"])).unwrap();
        assert_eq!(members, PropertyValue::StringList(vec!["u1".into(), "u2".into()]));
        assert_eq!(members.string_items(), vec!["u1".to_string(), "u2".to_string()]);

        assert_eq!(
            PropertyValue::try_from(json!([1, 2])).unwrap(),
            PropertyValue::IntList(vec![1, 2])
        );
        assert_eq!(
            PropertyValue::try_from(json!([])).unwrap(),
            PropertyValue::StringList(Vec::new())
        );
    }

    #[test]
    fn mixed_scalar_lists_are_rejected() {
        let err = PropertyValue::try_from(json!(["u1", 2, false])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("$[1]"), "{message}");
        assert!(message.contains("int element in a string list"), "{message}");

        assert!(PropertyValue::try_from(json!([1, 2.5])).is_err());
    }

    #[test]
    fn nested_and_null_values_are_rejected() {
        assert!(PropertyValue::try_from(json!(null)).is_err());
        assert!(PropertyValue::try_from(json!({"a": 1})).is_err());

        let err = PropertyValue::try_from(json!(["ok", ["nested"]])).unwrap_err();
        assert!(err.to_string().contains("$[1]"));
    }

    #[test]
    fn chunk_ids_stored_as_integers_still_key() {
        assert_eq!(PropertyValue::Int(3).key_string().as_deref(), Some("3"));
        assert_eq!(PropertyValue::Bool(true).key_string(), None);
    }
}
