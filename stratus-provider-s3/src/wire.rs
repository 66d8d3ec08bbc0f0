//! Remote representations of bucket sub-resources
//!
//! These mirror what the object storage API accepts and returns. Optional
//! fields stay `None` when the caller did not set them so they are omitted
//! from requests instead of being sent as zero values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BucketInfo {
    pub name: String,
    pub region: Option<String>,
    pub object_lock_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Owner {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Grantee {
    /// `CanonicalUser`, `Group` or `AmazonCustomerByEmail`
    pub grantee_type: String,
    pub id: Option<String>,
    pub uri: Option<String>,
    pub email_address: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessControlPolicy {
    pub owner: Owner,
    pub grants: Vec<Grant>,
}

/// ACL request: a canned ACL or an explicit policy, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclRequest {
    Canned(String),
    Policy(AccessControlPolicy),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CorsRule {
    pub id: Option<String>,
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_seconds: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transition {
    pub days: Option<i32>,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LifecycleRule {
    pub id: String,
    /// `Enabled` or `Disabled`
    pub status: String,
    pub prefix: Option<String>,
    pub expiration_days: Option<i32>,
    pub noncurrent_version_expiration_days: Option<i32>,
    pub abort_incomplete_multipart_upload_days: Option<i32>,
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedirectAll {
    pub host_name: String,
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingCondition {
    pub key_prefix_equals: Option<String>,
    pub http_error_code_returned_equals: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Redirect {
    pub host_name: Option<String>,
    pub protocol: Option<String>,
    pub replace_key_prefix_with: Option<String>,
    pub replace_key_with: Option<String>,
    pub http_redirect_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingRule {
    pub condition: Option<RoutingCondition>,
    pub redirect: Redirect,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebsiteConfiguration {
    pub index_document: Option<String>,
    pub error_document: Option<String>,
    pub redirect_all: Option<RedirectAll>,
    pub routing_rules: Vec<RoutingRule>,
}

/// User access key as returned by the credential endpoint.
///
/// The secret is only present in the response to its creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}
