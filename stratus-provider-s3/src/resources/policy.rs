//! s3_bucket_policy - Bucket policy document

use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::attr::{Attr, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::Model;
use stratus_core::policy::normalize_against_prior;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::Attributes;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::{bucket_attribute, observe, read_when_visible, require, retry_on_codes};
use crate::api::ObjectStorageApi;
use crate::client::S3Connector;

/// Returned while a principal named in the policy is still propagating
const PROPAGATING_CODES: &[&str] = &["MalformedPolicy", "NoSuchBucket"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketPolicyModel {
    pub bucket: Attr<String>,
    pub policy: Attr<String>,
}

impl Model for BucketPolicyModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            policy: get_attr(attributes, "policy")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "policy", &self.policy);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

pub struct BucketPolicyKind {
    connector: Arc<S3Connector>,
}

impl BucketPolicyKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn ObjectStorageApi>,
        plan: &BucketPolicyModel,
    ) -> ProviderResult<BucketPolicyModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        let policy = require(&plan.policy, "policy")?;

        retry_on_codes(ctx, &self.connector, "putting bucket policy", PROPAGATING_CODES, || {
            client.put_bucket_policy(bucket, policy)
        })
        .await?;
        read_when_visible(ctx, &self.connector, "reading bucket policy", || {
            client.get_bucket_policy(bucket)
        })
        .await?;

        Ok(plan.clone())
    }
}

#[async_trait]
impl ResourceKind for BucketPolicyKind {
    type Model = BucketPolicyModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket_policy";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Access policy attached to a bucket")
            .attribute(bucket_attribute())
            .attribute(
                AttributeSchema::new("policy", AttributeType::JsonDocument)
                    .required()
                    .with_description("Policy document as JSON"),
            )
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.storage().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &BucketPolicyModel,
    ) -> ProviderResult<BucketPolicyModel> {
        self.put(ctx, client, plan).await
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &BucketPolicyModel,
    ) -> ReadOutcome<BucketPolicyModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.get_bucket_policy(bucket).await,
            state,
            "reading bucket policy",
            |remote| BucketPolicyModel {
                bucket: state.bucket.clone(),
                policy: Attr::Known(normalize_against_prior(
                    &remote,
                    state.policy.as_known().map(String::as_str),
                )),
            },
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        _prior: &BucketPolicyModel,
        plan: &BucketPolicyModel,
    ) -> ProviderResult<BucketPolicyModel> {
        self.put(ctx, client, plan).await
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &BucketPolicyModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        client
            .delete_bucket_policy(bucket)
            .await
            .map_err(|e| ProviderError::from(e).context("deleting bucket policy"))
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<BucketPolicyModel> {
        Ok(BucketPolicyModel {
            bucket: Attr::known(import_id),
            policy: Attr::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::S3ApiError;
    use crate::fake::{FakeStorage, ctx, provider_with};
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, Value};

    const POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Principal": "*",
      "Action": ["s3:GetObject", "s3:ListBucket"],
      "Resource": ["arn:aws:s3:::public/*", "arn:aws:s3:::public"]
    }
  ]
}"#;

    const REORDERED: &str = r#"{"Statement":{"Resource":["arn:aws:s3:::public","arn:aws:s3:::public/*"],"Action":["s3:ListBucket","s3:GetObject"],"Principal":"*","Effect":"Allow"},"Version":"2012-10-17"}"#;

    fn resource(policy: &str) -> Resource {
        Resource::new("s3_bucket_policy", "public")
            .with_attribute("bucket", "public")
            .with_attribute("policy", policy)
    }

    #[tokio::test(start_paused = true)]
    async fn equivalent_document_is_kept_verbatim_and_not_reapplied() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("public");
        let provider = provider_with(storage.clone());

        let state = provider.create(&ctx(), &resource(POLICY)).await.unwrap();
        // The fake stores its own compact serialization
        assert_eq!(state.attributes.get("policy"), Some(&Value::from(POLICY)));

        let writes = storage.writes();
        let reads = storage.calls("get_bucket_policy");
        let updated = provider
            .update(&ctx(), &state, &resource(REORDERED))
            .await
            .unwrap();
        assert_eq!(storage.writes(), writes);
        assert_eq!(storage.calls("get_bucket_policy"), reads);
        assert_eq!(updated.attributes.get("policy"), Some(&Value::from(POLICY)));
    }

    #[tokio::test(start_paused = true)]
    async fn put_is_retried_while_principal_propagates() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("public");
        storage.fail_next(
            "put_bucket_policy",
            S3ApiError::service("MalformedPolicy", "Invalid principal in policy"),
        );
        let provider = provider_with(storage.clone());

        provider.create(&ctx(), &resource(POLICY)).await.unwrap();
        assert_eq!(storage.calls("put_bucket_policy"), 2);
    }

    #[tokio::test]
    async fn invalid_json_is_rejected_locally() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("public");
        let provider = provider_with(storage.clone());

        let err = provider
            .create(&ctx(), &resource("{not json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, stratus_core::provider::ErrorKind::Validation);
        assert_eq!(storage.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_document_is_drift() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("public");
        let provider = provider_with(storage.clone());

        let state = provider.create(&ctx(), &resource(POLICY)).await.unwrap();
        storage.with_bucket("public", |b| {
            b.policy = Some(r#"{"Version":"2012-10-17","Statement":[]}"#.to_string())
        });

        let refreshed = provider.read(&ctx(), &state).await.unwrap();
        assert_ne!(refreshed.attributes.get("policy"), Some(&Value::from(POLICY)));

        provider
            .update(&ctx(), &refreshed, &resource(POLICY))
            .await
            .unwrap();
        let stored = storage.with_bucket("public", |b| b.policy.clone()).unwrap();
        assert!(stratus_core::policy::documents_equivalent(&stored, POLICY).unwrap());
    }
}
