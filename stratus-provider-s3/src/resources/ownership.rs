//! s3_bucket_ownership_controls - Object ownership setting of a bucket

use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::attr::{Attr, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::Model;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::Attributes;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::{bucket_attribute, observe, require, retry_on_codes};
use crate::api::ObjectStorageApi;
use crate::client::S3Connector;

const OWNERSHIP_MODES: &[&str] = &["BucketOwnerPreferred", "ObjectWriter", "BucketOwnerEnforced"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnershipModel {
    pub bucket: Attr<String>,
    pub object_ownership: Attr<String>,
}

impl Model for OwnershipModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            object_ownership: get_attr(attributes, "object_ownership")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "object_ownership", &self.object_ownership);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

pub struct OwnershipKind {
    connector: Arc<S3Connector>,
}

impl OwnershipKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn ObjectStorageApi>,
        plan: &OwnershipModel,
    ) -> ProviderResult<OwnershipModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        let ownership = require(&plan.object_ownership, "object_ownership")?;
        retry_on_codes(
            ctx,
            &self.connector,
            "putting ownership controls",
            &["NoSuchBucket", "OperationAborted"],
            || client.put_ownership_controls(bucket, ownership),
        )
        .await?;
        Ok(plan.clone())
    }
}

#[async_trait]
impl ResourceKind for OwnershipKind {
    type Model = OwnershipModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket_ownership_controls";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Object ownership controls of a bucket")
            .attribute(bucket_attribute())
            .attribute(
                AttributeSchema::new(
                    "object_ownership",
                    AttributeType::Enum(OWNERSHIP_MODES.iter().map(|m| m.to_string()).collect()),
                )
                .required(),
            )
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.storage().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &OwnershipModel,
    ) -> ProviderResult<OwnershipModel> {
        self.put(ctx, client, plan).await
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &OwnershipModel,
    ) -> ReadOutcome<OwnershipModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.get_ownership_controls(bucket).await,
            state,
            "reading ownership controls",
            |ownership| OwnershipModel {
                bucket: state.bucket.clone(),
                object_ownership: Attr::Known(ownership),
            },
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        _prior: &OwnershipModel,
        plan: &OwnershipModel,
    ) -> ProviderResult<OwnershipModel> {
        self.put(ctx, client, plan).await
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &OwnershipModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        client
            .delete_ownership_controls(bucket)
            .await
            .map_err(|e| ProviderError::from(e).context("deleting ownership controls"))
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<OwnershipModel> {
        Ok(OwnershipModel {
            bucket: Attr::known(import_id),
            object_ownership: Attr::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeStorage, ctx, provider_with};
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, Value};

    fn resource(mode: &str) -> Resource {
        Resource::new("s3_bucket_ownership_controls", "logs")
            .with_attribute("bucket", "logs")
            .with_attribute("object_ownership", mode)
    }

    #[tokio::test]
    async fn create_update_and_delete_twice() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("logs");
        let provider = provider_with(storage.clone());

        let state = provider
            .create(&ctx(), &resource("BucketOwnerPreferred"))
            .await
            .unwrap();
        let state = provider
            .update(&ctx(), &state, &resource("BucketOwnerEnforced"))
            .await
            .unwrap();
        assert_eq!(
            state.attributes.get("object_ownership"),
            Some(&Value::from("BucketOwnerEnforced"))
        );

        provider.delete(&ctx(), &state).await.unwrap();
        // Second delete hits OwnershipControlsNotFoundError and still succeeds
        storage.fail_next(
            "delete_ownership_controls",
            crate::api::S3ApiError::service("OwnershipControlsNotFoundError", "gone"),
        );
        provider.delete(&ctx(), &state).await.unwrap();
    }

    #[tokio::test]
    async fn read_failure_keeps_state() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("logs");
        let provider = provider_with(storage.clone());
        let state = provider
            .create(&ctx(), &resource("ObjectWriter"))
            .await
            .unwrap();

        storage.fail_next(
            "get_ownership_controls",
            crate::api::S3ApiError::service("AccessDenied", "denied"),
        );
        let err = provider.read(&ctx(), &state).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(storage.with_bucket("logs", |b| b.ownership.is_some()));
    }
}
