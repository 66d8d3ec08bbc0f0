//! Semantic comparison of JSON policy documents
//!
//! Two documents are equivalent when they carry the same meaning: key order
//! and whitespace are irrelevant, a single value equals a one-element list,
//! and lists of scalars (actions, resources, principals) compare as sets.

use serde_json::Value as Json;

/// Returns true if both documents parse and mean the same thing
pub fn documents_equivalent(a: &str, b: &str) -> Result<bool, serde_json::Error> {
    let a: Json = serde_json::from_str(a)?;
    let b: Json = serde_json::from_str(b)?;
    Ok(canonicalize(a) == canonicalize(b))
}

/// Choose the document to store in state.
///
/// When the remote document is equivalent to the prior one the prior text is
/// kept so formatting differences never show up as drift.
pub fn normalize_against_prior(remote: &str, prior: Option<&str>) -> String {
    match prior {
        Some(prior) if documents_equivalent(remote, prior).unwrap_or(false) => prior.to_string(),
        _ => remote.to_string(),
    }
}

/// Canonical form used for comparison
pub fn canonicalize(value: Json) -> Json {
    match value {
        Json::Object(map) => Json::Object(
            map.into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect(),
        ),
        Json::Array(items) => {
            let mut items: Vec<Json> = items.into_iter().map(canonicalize).collect();
            // Sort by serialized form so order never matters
            items.sort_by_cached_key(|v| v.to_string());
            items.dedup();
            if items.len() == 1 {
                return items.remove(0);
            }
            Json::Array(items)
        }
        Json::Number(n) => {
            // "Version": 1 and "Version": "1" are not distinguished by S3
            Json::String(n.to_string())
        }
        Json::Bool(b) => Json::String(b.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicRead",
            "Effect": "Allow",
            "Principal": "*",
            "Action": ["s3:GetObject"],
            "Resource": ["arn:aws:s3:::bucket/*", "arn:aws:s3:::bucket"]
        }]
    }"#;

    #[test]
    fn key_order_and_whitespace_do_not_matter() {
        let reordered = r#"{"Statement":[{"Resource":["arn:aws:s3:::bucket/*","arn:aws:s3:::bucket"],"Action":["s3:GetObject"],"Principal":"*","Effect":"Allow","Sid":"PublicRead"}],"Version":"2012-10-17"}"#;
        assert!(documents_equivalent(POLICY, reordered).unwrap());
    }

    #[test]
    fn single_value_equals_singleton_list() {
        let scalar = r#"{"Version":"2012-10-17","Statement":{"Sid":"PublicRead","Effect":"Allow","Principal":["*"],"Action":"s3:GetObject","Resource":["arn:aws:s3:::bucket","arn:aws:s3:::bucket/*"]}}"#;
        assert!(documents_equivalent(POLICY, scalar).unwrap());
    }

    #[test]
    fn repeated_value_equals_the_single_value() {
        let repeated = r#"{"Action": ["s3:GetObject", "s3:GetObject"]}"#;
        let single = r#"{"Action": "s3:GetObject"}"#;
        assert!(documents_equivalent(repeated, single).unwrap());
        assert_eq!(
            canonicalize(serde_json::json!(["a", "a"])),
            serde_json::json!("a")
        );
    }

    #[test]
    fn different_actions_are_not_equivalent() {
        let other = POLICY.replace("s3:GetObject", "s3:PutObject");
        assert!(!documents_equivalent(POLICY, &other).unwrap());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(documents_equivalent(POLICY, "{").is_err());
    }

    #[test]
    fn prior_text_kept_when_equivalent() {
        let remote = r#"{"Statement":{"Effect":"Allow","Sid":"PublicRead","Principal":"*","Action":"s3:GetObject","Resource":["arn:aws:s3:::bucket","arn:aws:s3:::bucket/*"]},"Version":"2012-10-17"}"#;
        assert_eq!(normalize_against_prior(remote, Some(POLICY)), POLICY);
        assert_eq!(normalize_against_prior(remote, None), remote);
    }
}
