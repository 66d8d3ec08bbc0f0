//! Object storage client backed by the AWS SDK
//!
//! Works against AWS and any S3-compatible endpoint: a custom endpoint URL,
//! static access keys and path-style addressing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{BuildError, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    AbortIncompleteMultipartUpload, BucketCannedAcl, BucketLifecycleConfiguration,
    BucketLocationConstraint, BucketVersioningStatus, Condition, CorsConfiguration,
    CreateBucketConfiguration, ErrorDocument, ExpirationStatus, IndexDocument,
    LifecycleExpiration, LifecycleRuleFilter, NoncurrentVersionExpiration, ObjectLockEnabled,
    ObjectOwnership, OwnershipControls, OwnershipControlsRule, Permission, Protocol,
    RedirectAllRequestsTo, Type, VersioningConfiguration,
};
use log::debug;
use stratus_core::config::{ProviderConfig, S3Endpoint};
use stratus_core::provider::{ProviderError, ProviderResult};
use tokio::sync::OnceCell;

use crate::api::{ApiResult, CredentialApi, ObjectStorageApi, S3ApiError};
use crate::credentials::OseCredentialClient;
use crate::wire::{
    AccessControlPolicy, AclRequest, BucketInfo, CorsRule, Grant, Grantee, LifecycleRule,
    Owner, Redirect, RedirectAll, RoutingCondition, RoutingRule, Transition,
    WebsiteConfiguration,
};

const DEFAULT_REGION: &str = "us-east-1";

/// Convert an SDK failure, keeping the service error code and HTTP status
fn api_error<E>(err: SdkError<E>) -> S3ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    match err.as_service_error() {
        Some(service) => S3ApiError::Service {
            code: service.code().unwrap_or("Unknown").to_string(),
            message: service.message().unwrap_or_default().to_string(),
            status,
        },
        None if status.is_some() => S3ApiError::Service {
            code: "Unknown".to_string(),
            message: err.to_string(),
            status,
        },
        None => S3ApiError::Transport(err.to_string()),
    }
}

fn build_error(err: BuildError) -> S3ApiError {
    S3ApiError::Request(err.to_string())
}

/// `ObjectStorageApi` over `aws-sdk-s3`
pub struct AwsObjectStorage {
    client: Client,
    region: String,
    endpoint: Option<String>,
}

impl AwsObjectStorage {
    pub async fn connect(config: &S3Endpoint) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "stratus",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        debug!(
            "object storage client for region {} (endpoint: {})",
            config.region,
            config.endpoint.as_deref().unwrap_or("default")
        );

        Self {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        }
    }
}

#[async_trait]
impl ObjectStorageApi for AwsObjectStorage {
    async fn create_bucket(&self, bucket: &str, object_lock: bool) -> ApiResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);

        if self.region != DEFAULT_REGION {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            request = request.create_bucket_configuration(config);
        }
        if object_lock {
            request = request.object_lock_enabled_for_bucket(true);
        }

        request.send().await.map_err(api_error)?;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> ApiResult<BucketInfo> {
        let output = self
            .client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;

        let object_lock_enabled = match self
            .client
            .get_object_lock_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)
        {
            Ok(lock) => lock
                .object_lock_configuration()
                .and_then(|c| c.object_lock_enabled())
                .is_some_and(|e| *e == ObjectLockEnabled::Enabled),
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        Ok(BucketInfo {
            name: bucket.to_string(),
            region: output.bucket_region().map(str::to_string),
            object_lock_enabled,
        })
    }

    async fn delete_bucket(&self, bucket: &str) -> ApiResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_bucket_acl(&self, bucket: &str) -> ApiResult<AccessControlPolicy> {
        let output = self
            .client
            .get_bucket_acl()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;

        let owner = output
            .owner()
            .map(|o| Owner {
                id: o.id().map(str::to_string),
                display_name: o.display_name().map(str::to_string),
            })
            .unwrap_or_default();

        let grants = output
            .grants()
            .iter()
            .filter_map(|g| {
                let grantee = g.grantee()?;
                Some(Grant {
                    grantee: Grantee {
                        grantee_type: grantee.r#type().as_str().to_string(),
                        id: grantee.id().map(str::to_string),
                        uri: grantee.uri().map(str::to_string),
                        email_address: grantee.email_address().map(str::to_string),
                        display_name: grantee.display_name().map(str::to_string),
                    },
                    permission: g.permission()?.as_str().to_string(),
                })
            })
            .collect();

        Ok(AccessControlPolicy { owner, grants })
    }

    async fn put_bucket_acl(&self, bucket: &str, acl: &AclRequest) -> ApiResult<()> {
        let request = self.client.put_bucket_acl().bucket(bucket);
        let request = match acl {
            AclRequest::Canned(canned) => request.acl(BucketCannedAcl::from(canned.as_str())),
            AclRequest::Policy(policy) => {
                let mut grants = Vec::with_capacity(policy.grants.len());
                for grant in &policy.grants {
                    let grantee = aws_sdk_s3::types::Grantee::builder()
                        .r#type(Type::from(grant.grantee.grantee_type.as_str()))
                        .set_id(grant.grantee.id.clone())
                        .set_uri(grant.grantee.uri.clone())
                        .set_email_address(grant.grantee.email_address.clone())
                        .set_display_name(grant.grantee.display_name.clone())
                        .build()
                        .map_err(build_error)?;
                    grants.push(
                        aws_sdk_s3::types::Grant::builder()
                            .grantee(grantee)
                            .permission(Permission::from(grant.permission.as_str()))
                            .build(),
                    );
                }
                let owner = aws_sdk_s3::types::Owner::builder()
                    .set_id(policy.owner.id.clone())
                    .set_display_name(policy.owner.display_name.clone())
                    .build();
                let policy = aws_sdk_s3::types::AccessControlPolicy::builder()
                    .owner(owner)
                    .set_grants(Some(grants))
                    .build();
                request.access_control_policy(policy)
            }
        };
        request.send().await.map_err(api_error)?;
        Ok(())
    }

    async fn get_bucket_cors(&self, bucket: &str) -> ApiResult<Vec<CorsRule>> {
        let output = self
            .client
            .get_bucket_cors()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;

        Ok(output
            .cors_rules()
            .iter()
            .map(|r| CorsRule {
                id: r.id().map(str::to_string),
                allowed_headers: r.allowed_headers().to_vec(),
                allowed_methods: r.allowed_methods().to_vec(),
                allowed_origins: r.allowed_origins().to_vec(),
                expose_headers: r.expose_headers().to_vec(),
                max_age_seconds: r.max_age_seconds(),
            })
            .collect())
    }

    async fn put_bucket_cors(&self, bucket: &str, rules: &[CorsRule]) -> ApiResult<()> {
        let mut sdk_rules = Vec::with_capacity(rules.len());
        for rule in rules {
            sdk_rules.push(
                aws_sdk_s3::types::CorsRule::builder()
                    .set_id(rule.id.clone())
                    .set_allowed_headers(non_empty(&rule.allowed_headers))
                    .set_allowed_methods(Some(rule.allowed_methods.clone()))
                    .set_allowed_origins(Some(rule.allowed_origins.clone()))
                    .set_expose_headers(non_empty(&rule.expose_headers))
                    .set_max_age_seconds(rule.max_age_seconds)
                    .build()
                    .map_err(build_error)?,
            );
        }
        let config = CorsConfiguration::builder()
            .set_cors_rules(Some(sdk_rules))
            .build()
            .map_err(build_error)?;

        self.client
            .put_bucket_cors()
            .bucket(bucket)
            .cors_configuration(config)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_bucket_cors(&self, bucket: &str) -> ApiResult<()> {
        self.client
            .delete_bucket_cors()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_bucket_lifecycle(&self, bucket: &str) -> ApiResult<Vec<LifecycleRule>> {
        let output = self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;

        Ok(output
            .rules()
            .iter()
            .map(|r| LifecycleRule {
                id: r.id().unwrap_or_default().to_string(),
                status: r.status().as_str().to_string(),
                prefix: r.filter().and_then(|f| f.prefix()).map(str::to_string),
                expiration_days: r.expiration().and_then(|e| e.days()),
                noncurrent_version_expiration_days: r
                    .noncurrent_version_expiration()
                    .and_then(|e| e.noncurrent_days()),
                abort_incomplete_multipart_upload_days: r
                    .abort_incomplete_multipart_upload()
                    .and_then(|a| a.days_after_initiation()),
                transitions: r
                    .transitions()
                    .iter()
                    .map(|t| Transition {
                        days: t.days(),
                        storage_class: t.storage_class().map(|c| c.as_str().to_string()),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn put_bucket_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> ApiResult<()> {
        let mut sdk_rules = Vec::with_capacity(rules.len());
        for rule in rules {
            let filter = LifecycleRuleFilter::builder()
                .prefix(rule.prefix.clone().unwrap_or_default())
                .build();
            let transitions = rule
                .transitions
                .iter()
                .map(|t| {
                    aws_sdk_s3::types::Transition::builder()
                        .set_days(t.days)
                        .set_storage_class(t.storage_class.as_deref().map(Into::into))
                        .build()
                })
                .collect::<Vec<_>>();

            let mut builder = aws_sdk_s3::types::LifecycleRule::builder()
                .id(&rule.id)
                .status(ExpirationStatus::from(rule.status.as_str()))
                .filter(filter)
                .set_transitions(non_empty(&transitions));
            if let Some(days) = rule.expiration_days {
                builder = builder.expiration(LifecycleExpiration::builder().days(days).build());
            }
            if let Some(days) = rule.noncurrent_version_expiration_days {
                builder = builder.noncurrent_version_expiration(
                    NoncurrentVersionExpiration::builder()
                        .noncurrent_days(days)
                        .build(),
                );
            }
            if let Some(days) = rule.abort_incomplete_multipart_upload_days {
                builder = builder.abort_incomplete_multipart_upload(
                    AbortIncompleteMultipartUpload::builder()
                        .days_after_initiation(days)
                        .build(),
                );
            }
            sdk_rules.push(builder.build().map_err(build_error)?);
        }

        let config = BucketLifecycleConfiguration::builder()
            .set_rules(Some(sdk_rules))
            .build()
            .map_err(build_error)?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(config)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_bucket_lifecycle(&self, bucket: &str) -> ApiResult<()> {
        self.client
            .delete_bucket_lifecycle()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> ApiResult<String> {
        let output = self
            .client
            .get_bucket_policy()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        output
            .policy()
            .map(str::to_string)
            .ok_or_else(|| S3ApiError::service("NoSuchBucketPolicy", "empty policy"))
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> ApiResult<()> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> ApiResult<()> {
        self.client
            .delete_bucket_policy()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> ApiResult<Option<String>> {
        let output = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.status().map(|s| s.as_str().to_string()))
    }

    async fn put_bucket_versioning(&self, bucket: &str, status: &str) -> ApiResult<()> {
        let config = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::from(status))
            .build();
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(config)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_bucket_website(&self, bucket: &str) -> ApiResult<WebsiteConfiguration> {
        let output = self
            .client
            .get_bucket_website()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;

        Ok(WebsiteConfiguration {
            index_document: output.index_document().map(|d| d.suffix().to_string()),
            error_document: output.error_document().map(|d| d.key().to_string()),
            redirect_all: output.redirect_all_requests_to().map(|r| RedirectAll {
                host_name: r.host_name().to_string(),
                protocol: r.protocol().map(|p| p.as_str().to_string()),
            }),
            routing_rules: output
                .routing_rules()
                .iter()
                .map(|rule| RoutingRule {
                    condition: rule.condition().map(|c| RoutingCondition {
                        key_prefix_equals: c.key_prefix_equals().map(str::to_string),
                        http_error_code_returned_equals: c
                            .http_error_code_returned_equals()
                            .map(str::to_string),
                    }),
                    redirect: rule
                        .redirect()
                        .map(|r| Redirect {
                            host_name: r.host_name().map(str::to_string),
                            protocol: r.protocol().map(|p| p.as_str().to_string()),
                            replace_key_prefix_with: r
                                .replace_key_prefix_with()
                                .map(str::to_string),
                            replace_key_with: r.replace_key_with().map(str::to_string),
                            http_redirect_code: r.http_redirect_code().map(str::to_string),
                        })
                        .unwrap_or_default(),
                })
                .collect(),
        })
    }

    async fn put_bucket_website(
        &self,
        bucket: &str,
        website: &WebsiteConfiguration,
    ) -> ApiResult<()> {
        let mut builder = aws_sdk_s3::types::WebsiteConfiguration::builder();

        if let Some(suffix) = &website.index_document {
            builder = builder.index_document(
                IndexDocument::builder()
                    .suffix(suffix)
                    .build()
                    .map_err(build_error)?,
            );
        }
        if let Some(key) = &website.error_document {
            builder = builder.error_document(
                ErrorDocument::builder()
                    .key(key)
                    .build()
                    .map_err(build_error)?,
            );
        }
        if let Some(redirect) = &website.redirect_all {
            builder = builder.redirect_all_requests_to(
                RedirectAllRequestsTo::builder()
                    .host_name(&redirect.host_name)
                    .set_protocol(redirect.protocol.as_deref().map(Protocol::from))
                    .build()
                    .map_err(build_error)?,
            );
        }
        for rule in &website.routing_rules {
            let redirect = aws_sdk_s3::types::Redirect::builder()
                .set_host_name(rule.redirect.host_name.clone())
                .set_protocol(rule.redirect.protocol.as_deref().map(Protocol::from))
                .set_replace_key_prefix_with(rule.redirect.replace_key_prefix_with.clone())
                .set_replace_key_with(rule.redirect.replace_key_with.clone())
                .set_http_redirect_code(rule.redirect.http_redirect_code.clone())
                .build();
            let condition = rule.condition.as_ref().map(|c| {
                Condition::builder()
                    .set_key_prefix_equals(c.key_prefix_equals.clone())
                    .set_http_error_code_returned_equals(c.http_error_code_returned_equals.clone())
                    .build()
            });
            builder = builder.routing_rules(
                aws_sdk_s3::types::RoutingRule::builder()
                    .set_condition(condition)
                    .redirect(redirect)
                    .build(),
            );
        }

        self.client
            .put_bucket_website()
            .bucket(bucket)
            .website_configuration(builder.build())
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_bucket_website(&self, bucket: &str) -> ApiResult<()> {
        self.client
            .delete_bucket_website()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn get_ownership_controls(&self, bucket: &str) -> ApiResult<String> {
        let output = self
            .client
            .get_bucket_ownership_controls()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        output
            .ownership_controls()
            .and_then(|c| c.rules().first())
            .map(|r| r.object_ownership().as_str().to_string())
            .ok_or_else(|| {
                S3ApiError::service("OwnershipControlsNotFoundError", "no ownership rule")
            })
    }

    async fn put_ownership_controls(&self, bucket: &str, ownership: &str) -> ApiResult<()> {
        let rule = OwnershipControlsRule::builder()
            .object_ownership(ObjectOwnership::from(ownership))
            .build()
            .map_err(build_error)?;
        let controls = OwnershipControls::builder()
            .rules(rule)
            .build()
            .map_err(build_error)?;
        self.client
            .put_bucket_ownership_controls()
            .bucket(bucket)
            .ownership_controls(controls)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_ownership_controls(&self, bucket: &str) -> ApiResult<()> {
        self.client
            .delete_bucket_ownership_controls()
            .bucket(bucket)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    fn website_endpoint(&self, bucket: &str) -> String {
        website_endpoint(self.endpoint.as_deref(), bucket, &self.region)
    }
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}

/// Website host of a bucket: `<bucket>.s3-website.<rest>` for endpoints of
/// the form `https://s3.<rest>`, the AWS regional form otherwise.
pub fn website_endpoint(endpoint: Option<&str>, bucket: &str, region: &str) -> String {
    let host = endpoint.map(|e| {
        e.trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    });
    match host {
        Some(host) => match host.strip_prefix("s3.") {
            Some(rest) => format!("{}.s3-website.{}", bucket, rest),
            None => format!("{}.{}", bucket, host),
        },
        None => format!("{}.s3-website.{}.amazonaws.com", bucket, region),
    }
}

/// Lazily bound remote clients shared by every object storage resource
pub struct S3Connector {
    endpoint: Option<S3Endpoint>,
    storage: OnceCell<Arc<dyn ObjectStorageApi>>,
    credentials: OnceCell<Arc<dyn CredentialApi>>,
    poll_interval: Option<Duration>,
}

impl S3Connector {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            endpoint: config.s3.clone(),
            storage: OnceCell::new(),
            credentials: OnceCell::new(),
            poll_interval: config.poll_interval,
        }
    }

    /// Connector with pre-bound clients
    pub fn with_clients(
        storage: Arc<dyn ObjectStorageApi>,
        credentials: Option<Arc<dyn CredentialApi>>,
    ) -> Self {
        Self {
            endpoint: None,
            storage: OnceCell::new_with(Some(storage)),
            credentials: OnceCell::new_with(credentials),
            poll_interval: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    fn endpoint(&self) -> ProviderResult<&S3Endpoint> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| ProviderError::validation("provider block has no s3 configuration"))
    }

    pub async fn storage(&self) -> ProviderResult<Arc<dyn ObjectStorageApi>> {
        self.storage
            .get_or_try_init(|| async {
                let endpoint = self.endpoint()?;
                let client: Arc<dyn ObjectStorageApi> =
                    Arc::new(AwsObjectStorage::connect(endpoint).await);
                Ok::<_, ProviderError>(client)
            })
            .await
            .cloned()
    }

    pub async fn credentials(&self) -> ProviderResult<Arc<dyn CredentialApi>> {
        self.credentials
            .get_or_try_init(|| async {
                let endpoint = self.endpoint()?;
                let url = endpoint.credentials_url.as_deref().ok_or_else(|| {
                    ProviderError::validation("s3 configuration has no credentials_url")
                })?;
                let client: Arc<dyn CredentialApi> =
                    Arc::new(OseCredentialClient::new(url, endpoint)?);
                Ok::<_, ProviderError>(client)
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn website_endpoint_for_custom_endpoint() {
        assert_eq!(
            website_endpoint(Some("https://s3.fr-par.example.com/"), "site", "fr-par"),
            "site.s3-website.fr-par.example.com"
        );
        assert_eq!(
            website_endpoint(Some("http://storage.local:9000"), "site", "x"),
            "site.storage.local:9000"
        );
    }

    #[test]
    fn website_endpoint_for_aws() {
        assert_eq!(
            website_endpoint(None, "site", "eu-west-1"),
            "site.s3-website.eu-west-1.amazonaws.com"
        );
    }

    #[tokio::test]
    async fn unconfigured_connector_fails_to_bind() {
        let connector = S3Connector::new(&ProviderConfig::default());
        let err = match connector.storage().await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.message.contains("no s3 configuration"));
    }
}
