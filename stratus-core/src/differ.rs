//! Differ - Compare desired state with observed state to detect drift
//!
//! Attributes left unknown or unset (for computed attributes) never count as
//! changes, JSON documents are compared by meaning and sets ignore order. An
//! attribute dropped from the configuration compares as null.

use crate::policy::documents_equivalent;
use crate::resource::{Attributes, Resource, ResourceId, State, Value};
use crate::schema::{AttributeMode, AttributeType, ResourceSchema};
use crate::timeouts::TIMEOUTS_ATTRIBUTE;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        changed_attributes: Vec<String>,
    },
    /// A force-new attribute changed -> needs delete and create
    Replace {
        id: ResourceId,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: &ResourceSchema) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let replace = changed.iter().any(|name| {
        schema
            .attributes
            .get(name)
            .is_some_and(|attr| attr.force_new)
    });

    if replace {
        Diff::Replace {
            id: desired.id.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
pub fn find_changed_attributes(
    desired: &Attributes,
    current: &Attributes,
    schema: &ResourceSchema,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _) and operation settings
        if key.starts_with('_') || key == TIMEOUTS_ATTRIBUTE {
            continue;
        }

        // Resolved during apply
        if desired_value.is_unknown() {
            continue;
        }

        let attr = schema.attributes.get(key);
        let computed = attr.is_some_and(|a| {
            matches!(
                a.mode,
                AttributeMode::Computed | AttributeMode::OptionalComputed
            )
        });
        if desired_value.is_null() && computed {
            continue;
        }

        let current_value = current.get(key).unwrap_or(&Value::Null);
        let equal = match attr.map(|a| &a.attr_type) {
            Some(t) => values_equal(t, desired_value, current_value),
            None => desired_value == current_value,
        };
        if !equal {
            changed.push(key.clone());
        }
    }

    // Attributes removed from the configuration are unset on the remote,
    // unless the remote decides their value
    for (key, attr) in &schema.attributes {
        if desired.contains_key(key) || key == TIMEOUTS_ATTRIBUTE {
            continue;
        }
        if matches!(
            attr.mode,
            AttributeMode::Computed | AttributeMode::OptionalComputed
        ) {
            continue;
        }
        let absent = attr.default.as_ref().unwrap_or(&Value::Null);
        let current_value = current.get(key).unwrap_or(&Value::Null);
        if !values_equal(&attr.attr_type, absent, current_value) {
            changed.push(key.clone());
        }
    }

    changed.sort();
    changed
}

fn values_equal(attr_type: &AttributeType, desired: &Value, current: &Value) -> bool {
    match (attr_type, desired, current) {
        (_, Value::Unknown, _) => true,
        (AttributeType::JsonDocument, Value::String(a), Value::String(b)) => {
            documents_equivalent(a, b).unwrap_or(a == b)
        }
        (AttributeType::Set(inner), Value::List(a), Value::List(b)) => {
            a.len() == b.len()
                && a.iter().all(|x| b.iter().any(|y| values_equal(inner, x, y)))
                && b.iter().all(|y| a.iter().any(|x| values_equal(inner, x, y)))
        }
        (AttributeType::Set(_), Value::List(a), Value::Null)
        | (AttributeType::Set(_), Value::Null, Value::List(a)) => a.is_empty(),
        (AttributeType::List(inner), Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(inner, x, y))
        }
        // A block field left unset in the configuration may be filled by the remote
        (AttributeType::Object(fields), Value::Map(a), Value::Map(b)) => {
            a.iter().all(|(key, value)| {
                let current = b.get(key).unwrap_or(&Value::Null);
                value.is_null()
                    || match fields.iter().find(|f| &f.name == key) {
                        Some(f) => values_equal(&f.attr_type, value, current),
                        None => value == current,
                    }
            })
        }
        (AttributeType::Map(inner), Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    b.get(key).is_some_and(|current| values_equal(inner, value, current))
                })
        }
        (AttributeType::Custom { base, .. }, _, _) => values_equal(base, desired, current),
        _ => desired == current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeSchema;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("bucket_policy")
            .attribute(AttributeSchema::new("bucket", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("policy", AttributeType::JsonDocument))
            .attribute(AttributeSchema::new(
                "hosts",
                AttributeType::Set(Box::new(AttributeType::String)),
            ))
            .attribute(AttributeSchema::new("region", AttributeType::String).optional_computed())
    }

    fn state(attrs: Vec<(&str, Value)>) -> State {
        State::existing(
            ResourceId::new("bucket_policy", "p"),
            attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("bucket_policy", "p");
        let current = State::not_found(ResourceId::new("bucket_policy", "p"));

        assert!(matches!(
            diff(&desired, &current, &schema()),
            Diff::Create(_)
        ));
    }

    #[test]
    fn equivalent_policy_is_not_drift() {
        let desired = Resource::new("bucket_policy", "p").with_attribute(
            "policy",
            r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow", "Action": "s3:GetObject"}]}"#,
        );
        let current = state(vec![(
            "policy",
            Value::from(r#"{"Statement":{"Action":["s3:GetObject"],"Effect":"Allow"},"Version":"2012-10-17"}"#),
        )]);

        assert_eq!(
            diff(&desired, &current, &schema()),
            Diff::NoChange(ResourceId::new("bucket_policy", "p"))
        );
    }

    #[test]
    fn unset_optional_computed_is_not_drift() {
        let desired = Resource::new("bucket_policy", "p").with_attribute("region", Value::Null);
        let current = state(vec![("region", Value::from("fr-par"))]);
        assert!(!diff(&desired, &current, &schema()).is_change());
    }

    #[test]
    fn unknown_is_not_drift() {
        let desired = Resource::new("bucket_policy", "p").with_attribute("hosts", Value::Unknown);
        let current = state(vec![]);
        assert!(!diff(&desired, &current, &schema()).is_change());
    }

    #[test]
    fn set_order_is_ignored() {
        let desired = Resource::new("bucket_policy", "p").with_attribute(
            "hosts",
            Value::List(vec![Value::from("a"), Value::from("b")]),
        );
        let current = state(vec![(
            "hosts",
            Value::List(vec![Value::from("b"), Value::from("a")]),
        )]);
        assert!(!diff(&desired, &current, &schema()).is_change());
    }

    #[test]
    fn force_new_change_requires_replacement() {
        let desired = Resource::new("bucket_policy", "p").with_attribute("bucket", "new");
        let current = state(vec![("bucket", Value::from("old"))]);
        match diff(&desired, &current, &schema()) {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["bucket".to_string()]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn plain_change_is_update() {
        let desired = Resource::new("bucket_policy", "p").with_attribute(
            "policy",
            r#"{"Statement": []}"#,
        );
        let current = state(vec![("policy", Value::from(r#"{"Statement": [{"Effect": "Deny"}]}"#))]);
        assert!(matches!(
            diff(&desired, &current, &schema()),
            Diff::Update { .. }
        ));
    }

    #[test]
    fn block_fields_filled_by_remote_are_not_drift() {
        let schema = ResourceSchema::new("acl").attribute(AttributeSchema::new(
            "owner",
            AttributeType::Object(vec![
                AttributeSchema::new("id", AttributeType::String),
                AttributeSchema::new("display_name", AttributeType::String).computed(),
            ]),
        ));
        let desired = Resource::new("acl", "a").with_attribute(
            "owner",
            Value::Map([("id".to_string(), Value::from("abc"))].into_iter().collect()),
        );
        let observed = Value::Map(
            [
                ("id".to_string(), Value::from("abc")),
                ("display_name".to_string(), Value::from("owner")),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(
            diff(&desired, &state(vec![("owner", observed.clone())]), &schema),
            Diff::NoChange(ResourceId::new("acl", "a"))
        );

        let changed = Resource::new("acl", "a").with_attribute(
            "owner",
            Value::Map([("id".to_string(), Value::from("xyz"))].into_iter().collect()),
        );
        assert!(diff(&changed, &state(vec![("owner", observed)]), &schema).is_change());
    }

    #[test]
    fn removed_optional_attribute_is_a_change() {
        let desired = Resource::new("bucket_policy", "p");
        let current = state(vec![
            ("policy", Value::from(r#"{"Statement": []}"#)),
            ("hosts", Value::List(vec![])),
            ("region", Value::from("fr-par")),
        ]);
        assert_eq!(
            diff(&desired, &current, &schema()),
            Diff::Update {
                id: ResourceId::new("bucket_policy", "p"),
                changed_attributes: vec!["policy".to_string()],
            }
        );

        let removed_force_new = state(vec![("bucket", Value::from("old"))]);
        assert!(matches!(
            diff(&desired, &removed_force_new, &schema()),
            Diff::Replace { .. }
        ));
    }
}
