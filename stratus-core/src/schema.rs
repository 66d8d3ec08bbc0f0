//! Schema - Define type schemas for resources
//!
//! Providers define schemas for each resource type, so plans are validated
//! before any remote call is issued.

use std::collections::HashMap;
use std::fmt;

use crate::resource::{Attributes, Value};

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// JSON document compared by meaning rather than by bytes
    JsonDocument,
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// Ordered list
    List(Box<AttributeType>),
    /// Unordered collection, compared as a set
    Set(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested block
    Object(Vec<AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    ///
    /// Null and unknown values always conform; requiredness is checked by the
    /// resource schema.
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        if !value.is_known() {
            return Ok(());
        }
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::JsonDocument, Value::String(s)) => serde_json::from_str::<
                serde_json::Value,
            >(s)
            .map(|_| ())
            .map_err(|e| TypeError::ValidationFailed {
                message: format!("Invalid JSON document: {}", e),
            }),

            (AttributeType::Custom { validate, base, .. }, v) => {
                base.validate(v)?;
                validate(v).map_err(|msg| TypeError::ValidationFailed { message: msg })
            }

            (AttributeType::List(inner) | AttributeType::Set(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Object(fields), Value::Map(map)) => {
                for field in fields {
                    match map.get(&field.name) {
                        Some(v) if !v.is_null() => {
                            field.attr_type.validate(v).map_err(|e| e.at(&field.name))?
                        }
                        _ if field.mode == AttributeMode::Required => {
                            return Err(TypeError::MissingRequired {
                                name: field.name.clone(),
                            });
                        }
                        _ => {}
                    }
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::JsonDocument => "JsonDocument".to_string(),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Set(inner) => format!("Set<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Object(_) => "Object".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Attributes {} are mutually exclusive", names.join(", "))]
    ConflictingAttributes { names: Vec<String> },

    #[error("Exactly one of {} must be set", names.join(", "))]
    ExactlyOneOf { names: Vec<String> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("Attribute '{path}': {inner}")]
    AtPath { path: String, inner: Box<TypeError> },
}

impl TypeError {
    pub fn mismatch(expected: &str, got: &Value) -> Self {
        TypeError::TypeMismatch {
            expected: expected.to_string(),
            got: got.type_name(),
        }
    }

    /// Attach the attribute path this error was found at
    pub fn at(self, path: &str) -> Self {
        TypeError::AtPath {
            path: path.to_string(),
            inner: Box::new(self),
        }
    }
}

/// How an attribute is filled in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    /// Must be set in configuration
    Required,
    /// May be set in configuration, stays null otherwise
    Optional,
    /// Only set by the provider
    Computed,
    /// May be set in configuration, otherwise filled in by the provider and
    /// kept from state across reads
    OptionalComputed,
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub mode: AttributeMode,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// Changing this attribute replaces the resource
    pub force_new: bool,
    /// Value is redacted from logs
    pub sensitive: bool,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            mode: AttributeMode::Optional,
            default: None,
            description: None,
            force_new: false,
            sensitive: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.mode = AttributeMode::Required;
        self
    }

    pub fn computed(mut self) -> Self {
        self.mode = AttributeMode::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.mode = AttributeMode::OptionalComputed;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn is_computed(&self) -> bool {
        matches!(
            self.mode,
            AttributeMode::Computed | AttributeMode::OptionalComputed
        )
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
    /// Groups of attributes of which at most one may be set
    pub conflicts: Vec<Vec<String>>,
    /// Groups of attributes of which exactly one must be set
    pub exactly_one_of: Vec<Vec<String>>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
            conflicts: Vec::new(),
            exactly_one_of: Vec::new(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn conflicting(mut self, names: &[&str]) -> Self {
        self.conflicts
            .push(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn exactly_one_of(mut self, names: &[&str]) -> Self {
        self.exactly_one_of
            .push(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Attributes that replace the resource when changed
    pub fn force_new_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .values()
            .filter(|a| a.force_new)
            .map(|a| a.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Validate resource attributes, collecting every error found
    pub fn validate(&self, attributes: &Attributes) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        let mut names: Vec<&String> = self.attributes.keys().collect();
        names.sort();

        // Check required attributes
        for name in &names {
            let schema = &self.attributes[*name];
            let missing = attributes.get(*name).is_none_or(Value::is_null);
            if schema.mode == AttributeMode::Required && missing && schema.default.is_none() {
                errors.push(TypeError::MissingRequired {
                    name: (*name).clone(),
                });
            }
        }

        // Type check each attribute
        for name in &names {
            if let Some(value) = attributes.get(*name)
                && let Err(e) = self.attributes[*name].attr_type.validate(value)
            {
                errors.push(e.at(name));
            }
            // Unknown attributes are allowed (for flexibility)
        }

        for group in &self.conflicts {
            let set = set_members(group, attributes);
            if set.len() > 1 {
                errors.push(TypeError::ConflictingAttributes { names: set });
            }
        }

        for group in &self.exactly_one_of {
            let set = set_members(group, attributes);
            match set.len() {
                1 => {}
                0 => errors.push(TypeError::ExactlyOneOf {
                    names: group.clone(),
                }),
                _ => errors.push(TypeError::ConflictingAttributes { names: set }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Members of a group that are present in the plan. Unknown counts as set
/// because it will hold a value after apply.
fn set_members(group: &[String], attributes: &Attributes) -> Vec<String> {
    group
        .iter()
        .filter(|name| match attributes.get(name.as_str()) {
            Some(Value::Null) | None => false,
            Some(Value::List(items)) => !items.is_empty(),
            Some(_) => true,
        })
        .cloned()
        .collect()
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Positive integer type
    pub fn positive_int() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| {
                if let Value::Int(n) = value {
                    if *n > 0 {
                        Ok(())
                    } else {
                        Err("Value must be positive".to_string())
                    }
                } else {
                    Err("Expected integer".to_string())
                }
            },
        }
    }

    /// Integer that fits a 32-bit wire field
    pub fn int32() -> AttributeType {
        AttributeType::Custom {
            name: "Int32".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if i32::try_from(*n).is_ok() => Ok(()),
                Value::Int(n) => Err(format!("{} is out of the 32-bit integer range", n)),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// Positive integer that fits a 32-bit wire field
    pub fn positive_int32() -> AttributeType {
        AttributeType::Custom {
            name: "PositiveInt32".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n <= 0 => Err("Value must be positive".to_string()),
                Value::Int(n) if i32::try_from(*n).is_err() => {
                    Err(format!("{} is out of the 32-bit integer range", n))
                }
                Value::Int(_) => Ok(()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// CIDR block type (e.g., "10.0.0.0/16")
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "Cidr".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    validate_cidr(s)
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }

    /// IPv4 address type (e.g., "192.168.1.1")
    pub fn ipv4() -> AttributeType {
        AttributeType::Custom {
            name: "Ipv4".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                if let Value::String(s) = value {
                    validate_ipv4(s)
                } else {
                    Err("Expected string".to_string())
                }
            },
        }
    }

    /// Identifier that must contain a UUID (bare UUID, URN or HREF)
    pub fn uuid_ref() -> AttributeType {
        AttributeType::Custom {
            name: "UuidRef".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) if crate::identity::extract_uuid(s).is_some() => Ok(()),
                Value::String(s) => Err(format!("'{}' does not contain a UUID", s)),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// S3 bucket name: 3-63 characters, lowercase letters, digits, dots and hyphens
    pub fn bucket_name() -> AttributeType {
        AttributeType::Custom {
            name: "BucketName".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| {
                let Value::String(name) = value else {
                    return Err("Expected string".to_string());
                };
                if name.len() < 3 || name.len() > 63 {
                    return Err(format!(
                        "bucket name must be between 3 and 63 characters, got {}",
                        name.len()
                    ));
                }
                if !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
                {
                    return Err(format!(
                        "bucket name '{}' may only contain lowercase letters, digits, dots and hyphens",
                        name
                    ));
                }
                Ok(())
            },
        }
    }
}

/// Validate IPv4 address format (e.g., "10.0.0.1")
pub fn validate_ipv4(ip: &str) -> Result<(), String> {
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(format!("Invalid IP address '{}': expected 4 octets", ip));
    }

    for octet in &octets {
        if octet.parse::<u8>().is_err() {
            return Err(format!(
                "Invalid octet '{}' in IP address: must be 0-255",
                octet
            ));
        }
    }
    Ok(())
}

/// Validate CIDR block format (e.g., "10.0.0.0/16")
pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid CIDR format '{}': expected IP/prefix",
            cidr
        ));
    }

    validate_ipv4(parts[0])?;

    let prefix = parts[1];
    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        Ok(p) => Err(format!("Invalid prefix length '{}': must be 0-32", p)),
        Err(_) => Err(format!(
            "Invalid prefix length '{}': must be a number",
            prefix
        )),
    }
}
