//! Per-verb operation timeouts
//!
//! Every resource accepts a `timeouts` block (`create`, `read`, `update`,
//! `delete`) holding duration strings such as `"10m"` or `"1h30m"`.

use std::time::Duration;

use crate::context::Verb;
use crate::resource::{Attributes, Value};
use crate::schema::{AttributeSchema, AttributeType, TypeError};

/// Default bound for every verb (5 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest accepted timeout (one year)
pub const MAX_TIMEOUT: Duration = Duration::from_secs(86400 * 365);

/// Attribute name of the timeouts block
pub const TIMEOUTS_ATTRIBUTE: &str = "timeouts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(DEFAULT_TIMEOUT)
    }
}

impl Timeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            read: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    pub fn for_verb(&self, verb: Verb) -> Duration {
        match verb {
            Verb::Create => self.create,
            Verb::Read | Verb::Import => self.read,
            Verb::Update => self.update,
            Verb::Delete => self.delete,
        }
    }

    /// Read the `timeouts` block, falling back to `defaults` per verb
    pub fn from_attributes(attributes: &Attributes, defaults: Timeouts) -> Result<Self, TypeError> {
        let block = match attributes.get(TIMEOUTS_ATTRIBUTE) {
            Some(Value::Map(block)) => block,
            None | Some(Value::Null) | Some(Value::Unknown) => return Ok(defaults),
            Some(other) => {
                return Err(TypeError::mismatch("Map", other).at(TIMEOUTS_ATTRIBUTE));
            }
        };

        let pick = |key: &str, fallback: Duration| -> Result<Duration, TypeError> {
            match block.get(key) {
                Some(Value::String(s)) => parse_duration(s).map_err(|message| {
                    TypeError::ValidationFailed { message }.at(&format!("timeouts.{}", key))
                }),
                None | Some(Value::Null) | Some(Value::Unknown) => Ok(fallback),
                Some(other) => {
                    Err(TypeError::mismatch("String", other).at(&format!("timeouts.{}", key)))
                }
            }
        };

        Ok(Self {
            create: pick("create", defaults.create)?,
            read: pick("read", defaults.read)?,
            update: pick("update", defaults.update)?,
            delete: pick("delete", defaults.delete)?,
        })
    }

    /// Schema of the `timeouts` block shared by every resource
    pub fn schema() -> AttributeSchema {
        let field = |name: &str| AttributeSchema::new(name, AttributeType::String);
        AttributeSchema::new(
            TIMEOUTS_ATTRIBUTE,
            AttributeType::Object(vec![
                field("create"),
                field("read"),
                field("update"),
                field("delete"),
            ]),
        )
        .with_description("Per-operation timeouts, e.g. { create = \"10m\" }")
    }
}

/// Parse a duration such as `"90s"`, `"10m"`, `"1h30m"` or `"2h15m10s"`
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("invalid duration: empty string".to_string());
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {}", s))?;
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(format!("invalid duration unit '{}' in {}", c, s)),
        };
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .filter(|secs| *secs <= MAX_TIMEOUT.as_secs())
            .ok_or_else(|| format!("duration {} is out of range", s))?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("invalid duration: {} (missing unit)", s));
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("45s"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration(" 2h15m10s "), Ok(Duration::from_secs(8110)));
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("3d").is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        let err = parse_duration("9999999999999999999h").unwrap_err();
        assert!(err.contains("out of range"));
        assert!(parse_duration("5000000000000000h").is_err());
        assert!(parse_duration("8761h").is_err());
        assert_eq!(parse_duration("8760h"), Ok(MAX_TIMEOUT));
    }

    #[test]
    fn defaults_apply_without_block() {
        let t = Timeouts::from_attributes(&Attributes::new(), Timeouts::default()).unwrap();
        assert_eq!(t, Timeouts::uniform(Duration::from_secs(300)));
    }

    #[test]
    fn block_overrides_single_verb() {
        let mut block = HashMap::new();
        block.insert("create".to_string(), Value::from("10m"));
        let mut attrs = Attributes::new();
        attrs.insert(TIMEOUTS_ATTRIBUTE.to_string(), Value::Map(block));

        let t = Timeouts::from_attributes(&attrs, Timeouts::default()).unwrap();
        assert_eq!(t.create, Duration::from_secs(600));
        assert_eq!(t.delete, DEFAULT_TIMEOUT);
        assert_eq!(t.for_verb(Verb::Create), Duration::from_secs(600));
    }

    #[test]
    fn bad_duration_names_the_field() {
        let mut block = HashMap::new();
        block.insert("delete".to_string(), Value::from("soon"));
        let mut attrs = Attributes::new();
        attrs.insert(TIMEOUTS_ATTRIBUTE.to_string(), Value::Map(block));

        let err = Timeouts::from_attributes(&attrs, Timeouts::default()).unwrap_err();
        assert!(err.to_string().contains("timeouts.delete"));
    }
}
