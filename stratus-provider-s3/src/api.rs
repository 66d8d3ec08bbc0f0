//! Remote API seams of the object storage provider
//!
//! Resources talk to these traits only, so they can run against the AWS SDK
//! client, the credential endpoint client, or an in-memory fake.

use async_trait::async_trait;
use stratus_core::provider::{ErrorKind, ProviderError};

use crate::wire::{
    AccessControlPolicy, AclRequest, BucketInfo, CorsRule, Credential, LifecycleRule,
    WebsiteConfiguration,
};

/// Error codes meaning the addressed object (or its configuration) is absent
const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchBucket",
    "NoSuchKey",
    "NotFound",
    "NoSuchCORSConfiguration",
    "NoSuchLifecycleConfiguration",
    "NoSuchBucketPolicy",
    "NoSuchWebsiteConfiguration",
    "OwnershipControlsNotFoundError",
    "ObjectLockConfigurationNotFoundError",
    "NoSuchCredential",
];

/// Error codes the remote returns while it is overloaded
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "ServiceUnavailable",
    "InternalError",
    "RequestTimeout",
    "OperationAborted",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum S3ApiError {
    #[error("{code}: {message}")]
    Service {
        code: String,
        message: String,
        status: Option<u16>,
    },

    #[error("request error: {0}")]
    Request(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl S3ApiError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        S3ApiError::Service {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            S3ApiError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_code(&self, expected: &str) -> bool {
        self.code() == Some(expected)
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            S3ApiError::Service { code, status, .. } => {
                NOT_FOUND_CODES.contains(&code.as_str()) || *status == Some(404)
            }
            _ => false,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            S3ApiError::Service { code, status, .. } => {
                TRANSIENT_CODES.contains(&code.as_str()) || status.is_some_and(|s| s >= 500)
            }
            S3ApiError::Transport(_) => true,
            S3ApiError::Request(_) => false,
        }
    }
}

impl From<S3ApiError> for ProviderError {
    fn from(err: S3ApiError) -> Self {
        let kind = if err.is_not_found() {
            ErrorKind::NotFound
        } else if err.is_transient() {
            ErrorKind::Transient
        } else if matches!(err, S3ApiError::Request(_)) {
            ErrorKind::Validation
        } else {
            ErrorKind::Remote
        };
        ProviderError::new("object storage request failed")
            .with_kind(kind)
            .with_cause(err)
    }
}

pub type ApiResult<T> = Result<T, S3ApiError>;

/// Bucket-level operations of an S3-compatible endpoint
#[async_trait]
pub trait ObjectStorageApi: Send + Sync {
    async fn create_bucket(&self, bucket: &str, object_lock: bool) -> ApiResult<()>;
    async fn head_bucket(&self, bucket: &str) -> ApiResult<BucketInfo>;
    async fn delete_bucket(&self, bucket: &str) -> ApiResult<()>;

    async fn get_bucket_acl(&self, bucket: &str) -> ApiResult<AccessControlPolicy>;
    async fn put_bucket_acl(&self, bucket: &str, acl: &AclRequest) -> ApiResult<()>;

    async fn get_bucket_cors(&self, bucket: &str) -> ApiResult<Vec<CorsRule>>;
    async fn put_bucket_cors(&self, bucket: &str, rules: &[CorsRule]) -> ApiResult<()>;
    async fn delete_bucket_cors(&self, bucket: &str) -> ApiResult<()>;

    async fn get_bucket_lifecycle(&self, bucket: &str) -> ApiResult<Vec<LifecycleRule>>;
    async fn put_bucket_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> ApiResult<()>;
    async fn delete_bucket_lifecycle(&self, bucket: &str) -> ApiResult<()>;

    async fn get_bucket_policy(&self, bucket: &str) -> ApiResult<String>;
    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> ApiResult<()>;
    async fn delete_bucket_policy(&self, bucket: &str) -> ApiResult<()>;

    /// `None` when versioning was never configured
    async fn get_bucket_versioning(&self, bucket: &str) -> ApiResult<Option<String>>;
    async fn put_bucket_versioning(&self, bucket: &str, status: &str) -> ApiResult<()>;

    async fn get_bucket_website(&self, bucket: &str) -> ApiResult<WebsiteConfiguration>;
    async fn put_bucket_website(
        &self,
        bucket: &str,
        website: &WebsiteConfiguration,
    ) -> ApiResult<()>;
    async fn delete_bucket_website(&self, bucket: &str) -> ApiResult<()>;

    async fn get_ownership_controls(&self, bucket: &str) -> ApiResult<String>;
    async fn put_ownership_controls(&self, bucket: &str, ownership: &str) -> ApiResult<()>;
    async fn delete_ownership_controls(&self, bucket: &str) -> ApiResult<()>;

    /// Host name serving the bucket's static website
    fn website_endpoint(&self, bucket: &str) -> String;
}

/// User access keys managed by the platform
#[async_trait]
pub trait CredentialApi: Send + Sync {
    async fn create_credential(&self, username: &str) -> ApiResult<Credential>;
    async fn list_credentials(&self, username: &str) -> ApiResult<Vec<Credential>>;
    async fn delete_credential(&self, username: &str, access_key: &str) -> ApiResult<()>;
}
