//! Attr - Tri-state attribute wrapper for typed models
//!
//! Every attribute of a configuration or state model is independently absent
//! (`Null`), not yet resolved (`Unknown`) or set (`Known`). Models keep that
//! distinction through the translation to and from the remote API.

use std::collections::HashMap;

use crate::resource::{Attributes, Value};
use crate::schema::TypeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Attr<T> {
    #[default]
    Null,
    Unknown,
    Known(T),
}

impl<T> Attr<T> {
    pub fn known(value: impl Into<T>) -> Self {
        Attr::Known(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Attr::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Attr::Unknown)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Attr::Known(_))
    }

    pub fn as_known(&self) -> Option<&T> {
        match self {
            Attr::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Attr::Known(v) => Some(v),
            _ => None,
        }
    }

    /// `None` maps to `Null`
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Attr::Known(v),
            None => Attr::Null,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attr<U> {
        match self {
            Attr::Null => Attr::Null,
            Attr::Unknown => Attr::Unknown,
            Attr::Known(v) => Attr::Known(f(v)),
        }
    }
}

impl<T: Clone> Attr<T> {
    /// Value observed from the remote for an Optional+Computed attribute.
    ///
    /// A reported value always wins. When the remote omits the field the prior
    /// known value is kept; an unknown prior resolves to `Null`.
    pub fn reported(remote: Option<T>, prior: &Attr<T>) -> Self {
        match (remote, prior) {
            (Some(v), _) => Attr::Known(v),
            (None, Attr::Known(v)) => Attr::Known(v.clone()),
            (None, _) => Attr::Null,
        }
    }

    /// Keep `self` if known, otherwise fall back to `prior`
    pub fn or_prior(&self, prior: &Attr<T>) -> Attr<T> {
        match self {
            Attr::Known(_) => self.clone(),
            _ => prior.clone(),
        }
    }
}

impl<T: Default + Clone> Attr<T> {
    pub fn known_or_default(&self) -> T {
        self.as_known().cloned().unwrap_or_default()
    }
}

impl<T> From<Option<T>> for Attr<T> {
    fn from(value: Option<T>) -> Self {
        Attr::from_option(value)
    }
}

/// Conversion between a Rust type and the dynamic attribute `Value`
pub trait AttrValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self, TypeError>;
}

impl AttrValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(TypeError::mismatch("String", other)),
        }
    }
}

impl AttrValue for i64 {
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Int(n) => Ok(*n),
            // Numbers arriving from JSON configuration as strings
            Value::String(s) => s.parse().map_err(|_| TypeError::mismatch("Int", value)),
            other => Err(TypeError::mismatch("Int", other)),
        }
    }
}

impl AttrValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(TypeError::mismatch("Bool", other)),
        }
    }
}

impl<T: AttrValue> AttrValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(AttrValue::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    T::from_value(item).map_err(|e| TypeError::ListItemError {
                        index,
                        inner: Box::new(e),
                    })
                })
                .collect(),
            other => Err(TypeError::mismatch("List", other)),
        }
    }
}

impl<T: AttrValue> AttrValue for HashMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.clone(), v.to_value())).collect())
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| {
                    T::from_value(v)
                        .map(|t| (k.clone(), t))
                        .map_err(|e| TypeError::MapValueError {
                            key: k.clone(),
                            inner: Box::new(e),
                        })
                })
                .collect(),
            other => Err(TypeError::mismatch("Map", other)),
        }
    }
}

impl<T: AttrValue> Attr<T> {
    pub fn to_value(&self) -> Value {
        match self {
            Attr::Null => Value::Null,
            Attr::Unknown => Value::Unknown,
            Attr::Known(v) => v.to_value(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Null => Ok(Attr::Null),
            Value::Unknown => Ok(Attr::Unknown),
            v => T::from_value(v).map(Attr::Known),
        }
    }
}

/// Read a typed attribute; a missing key is `Null`
pub fn get_attr<T: AttrValue>(attributes: &Attributes, key: &str) -> Result<Attr<T>, TypeError> {
    match attributes.get(key) {
        Some(value) => Attr::from_value(value).map_err(|e| e.at(key)),
        None => Ok(Attr::Null),
    }
}

/// Write a typed attribute
pub fn put_attr<T: AttrValue>(attributes: &mut Attributes, key: &str, value: &Attr<T>) {
    attributes.insert(key.to_string(), value.to_value());
}

/// Map field accessor used by nested block conversions
pub fn field<T: AttrValue>(map: &HashMap<String, Value>, key: &str) -> Result<Attr<T>, TypeError> {
    get_attr(map, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_prefers_remote_value() {
        let prior = Attr::known("old".to_string());
        assert_eq!(
            Attr::reported(Some("new".to_string()), &prior),
            Attr::known("new".to_string())
        );
    }

    #[test]
    fn reported_keeps_prior_when_remote_omits() {
        let prior: Attr<String> = Attr::known("kept".to_string());
        assert_eq!(Attr::reported(None, &prior), prior);
    }

    #[test]
    fn reported_resolves_unknown_to_null() {
        let prior: Attr<i64> = Attr::Unknown;
        assert_eq!(Attr::reported(None, &prior), Attr::Null);
    }

    #[test]
    fn missing_key_reads_as_null() {
        let attrs = Attributes::new();
        let attr: Attr<String> = get_attr(&attrs, "name").unwrap();
        assert!(attr.is_null());
    }

    #[test]
    fn unknown_roundtrips_through_value() {
        let mut attrs = Attributes::new();
        put_attr::<String>(&mut attrs, "id", &Attr::Unknown);
        assert_eq!(attrs.get("id"), Some(&Value::Unknown));
        let back: Attr<String> = get_attr(&attrs, "id").unwrap();
        assert!(back.is_unknown());
    }

    #[test]
    fn type_mismatch_reports_attribute_path() {
        let mut attrs = Attributes::new();
        attrs.insert("count".to_string(), Value::Bool(true));
        let err = get_attr::<i64>(&attrs, "count").unwrap_err();
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn list_of_strings() {
        let value = Value::List(vec![Value::from("a"), Value::from("b")]);
        let list = Vec::<String>::from_value(&value).unwrap();
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }
}
