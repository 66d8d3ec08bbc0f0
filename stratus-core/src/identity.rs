//! Identity helpers: UUID extraction, import identifiers and synthesized keys

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::provider::{ProviderError, ProviderResult};

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("UUID pattern is valid")
});

/// Extract the canonical UUID from a bare UUID, a URN or an HREF.
///
/// When several UUID-shaped tokens appear, the last one wins
/// (`https://host/api/vApp/vapp-<vdc>/network/<id>` identifies `<id>`).
pub fn extract_uuid(s: &str) -> Option<&str> {
    UUID_RE.find_iter(s).last().map(|m| m.as_str())
}

/// Build a URN such as `urn:vcloud:network:<uuid>` from any identifier
pub fn to_urn(kind: &str, s: &str) -> ProviderResult<String> {
    extract_uuid(s)
        .map(|uuid| format!("urn:vcloud:{}:{}", kind, uuid))
        .ok_or_else(|| ProviderError::validation(format!("'{}' does not contain a UUID", s)))
}

/// Identity of an S3 user credential: `username:` followed by the first four
/// characters of the access key
pub fn credential_identity(username: &str, access_key: &str) -> String {
    let prefix: String = access_key.chars().take(4).collect();
    format!("{}:{}", username, prefix)
}

/// Split a credential identity back into `(username, access key prefix)`
pub fn parse_credential_identity(id: &str) -> ProviderResult<(&str, &str)> {
    match id.rsplit_once(':') {
        Some((user, prefix)) if !user.is_empty() && !prefix.is_empty() => Ok((user, prefix)),
        _ => Err(ProviderError::validation(format!(
            "invalid credential identity '{}', expected username:key_prefix",
            id
        ))),
    }
}

/// Dot-delimited import identifier, e.g. `vdc.vapp.network_name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportId {
    segments: HashMap<String, String>,
}

impl ImportId {
    /// Parse `raw` against the expected segment names.
    ///
    /// The first `optional_leading` names may be omitted, in which case they
    /// resolve to `None` (e.g. the VDC defaulting to the provider's).
    pub fn parse(raw: &str, names: &[&str], optional_leading: usize) -> ProviderResult<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        let min = names.len().saturating_sub(optional_leading);
        if parts.len() < min || parts.len() > names.len() || parts.iter().any(|p| p.is_empty()) {
            return Err(ProviderError::validation(format!(
                "invalid import id '{}', expected {}",
                raw,
                names.join(".")
            )));
        }

        let skipped = names.len() - parts.len();
        let segments = names[skipped..]
            .iter()
            .zip(parts)
            .map(|(name, part)| (name.to_string(), part.to_string()))
            .collect();
        Ok(Self { segments })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.segments.get(name).map(String::as_str)
    }

    /// Segment that must be present
    pub fn require(&self, name: &str) -> ProviderResult<&str> {
        self.get(name).ok_or_else(|| {
            ProviderError::validation(format!("import id is missing the '{}' segment", name))
        })
    }
}
