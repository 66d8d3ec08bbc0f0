//! s3_bucket - Bucket lifecycle and bucket data source

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use stratus_core::attr::{Attr, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::Model;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::Attributes;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};
use stratus_core::waiter::Refresh;

use super::{bucket_attribute, observe, require, waiter};
use crate::api::{ApiResult, ObjectStorageApi};
use crate::client::S3Connector;
use crate::wire::BucketInfo;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketModel {
    pub bucket: Attr<String>,
    pub object_lock_enabled: Attr<bool>,
    pub region: Attr<String>,
}

impl Model for BucketModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            object_lock_enabled: get_attr(attributes, "object_lock_enabled")?,
            region: get_attr(attributes, "region")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "object_lock_enabled", &self.object_lock_enabled);
        put_attr(&mut attrs, "region", &self.region);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

impl BucketModel {
    fn observed(info: BucketInfo, prior: &BucketModel) -> Self {
        Self {
            bucket: Attr::Known(info.name),
            object_lock_enabled: Attr::Known(info.object_lock_enabled),
            region: Attr::reported(info.region, &prior.region),
        }
    }
}

async fn head(api: &dyn ObjectStorageApi, bucket: &str) -> ApiResult<Refresh<BucketInfo>> {
    match api.head_bucket(bucket).await {
        Ok(info) => Ok(Refresh::observed(info, "exists")),
        Err(e) if e.is_not_found() => Ok(Refresh::NotFound),
        Err(e) => Err(e),
    }
}

pub struct BucketKind {
    connector: Arc<S3Connector>,
}

impl BucketKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ResourceKind for BucketKind {
    type Model = BucketModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("An object storage bucket")
            .attribute(bucket_attribute())
            .attribute(
                AttributeSchema::new("object_lock_enabled", AttributeType::Bool)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("region", AttributeType::String).computed())
    }

    fn has_data_source(&self) -> bool {
        true
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.storage().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &BucketModel,
    ) -> ProviderResult<BucketModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        let api = client.as_ref();

        api.create_bucket(bucket, plan.object_lock_enabled.known_or_default())
            .await
            .map_err(ProviderError::from)?;

        debug!("waiting for bucket {} to become visible", bucket);
        waiter(&self.connector, &[], &["exists"], ctx.remaining())
            .wait(ctx, || head(api, bucket))
            .await
            .map_err(|e| ProviderError::from(e).context("waiting for bucket"))?;

        Ok(plan.clone())
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &BucketModel,
    ) -> ReadOutcome<BucketModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.head_bucket(bucket).await,
            state,
            "reading bucket",
            |info| BucketModel::observed(info, state),
        )
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &BucketModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        let api = client.as_ref();

        api.delete_bucket(bucket).await.map_err(ProviderError::from)?;

        waiter(&self.connector, &["exists"], &[], ctx.remaining())
            .wait(ctx, || head(api, bucket))
            .await
            .map_err(|e| ProviderError::from(e).context("waiting for bucket deletion"))?;
        Ok(())
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<BucketModel> {
        Ok(BucketModel {
            bucket: Attr::known(import_id),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::fake::{FakeStorage, provider_with};
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, State, Value};

    use super::*;
    use crate::fake::ctx;

    #[tokio::test(start_paused = true)]
    async fn create_waits_until_bucket_is_visible() {
        let storage = Arc::new(FakeStorage::new());
        storage.hide_new_buckets_for(2);
        let provider = provider_with(storage.clone());

        let resource = Resource::new("s3_bucket", "logs").with_attribute("bucket", "logs");
        let state = provider.create(&ctx(), &resource).await.unwrap();

        assert_eq!(state.identifier.as_deref(), Some("logs"));
        assert_eq!(state.attributes.get("region"), Some(&Value::from("us-east-1")));
        assert_eq!(
            state.attributes.get("object_lock_enabled"),
            Some(&Value::Bool(false))
        );
        assert!(storage.calls("head_bucket") >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn read_of_missing_bucket_removes_state() {
        let storage = Arc::new(FakeStorage::new());
        let provider = provider_with(storage.clone());

        let mut attrs = Attributes::new();
        attrs.insert("bucket".to_string(), "gone".into());
        let state = State::existing(
            stratus_core::resource::ResourceId::new("s3_bucket", "gone"),
            attrs,
        );
        let read = provider.read(&ctx(), &state).await.unwrap();
        assert!(!read.exists);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_twice_succeeds() {
        let storage = Arc::new(FakeStorage::new());
        let provider = provider_with(storage.clone());
        let resource = Resource::new("s3_bucket", "tmp").with_attribute("bucket", "tmp");
        let state = provider.create(&ctx(), &resource).await.unwrap();

        provider.delete(&ctx(), &state).await.unwrap();
        provider.delete(&ctx(), &state).await.unwrap();
        assert!(!storage.has_bucket("tmp"));
    }

    #[tokio::test(start_paused = true)]
    async fn data_source_reads_existing_bucket() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("shared");
        let provider = provider_with(storage);

        let query = Resource::new("s3_bucket", "shared")
            .with_attribute("bucket", "shared")
            .with_read_only(true);
        let state = provider.read_data_source(&ctx(), &query).await.unwrap();
        assert_eq!(state.attributes.get("region"), Some(&Value::from("us-east-1")));

        let missing = Resource::new("s3_bucket", "nope")
            .with_attribute("bucket", "nope")
            .with_read_only(true);
        let err = provider.read_data_source(&ctx(), &missing).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_bucket_name_is_rejected_locally() {
        let storage = Arc::new(FakeStorage::new());
        let provider = provider_with(storage.clone());
        let resource = Resource::new("s3_bucket", "bad").with_attribute("bucket", "Bad_Name");

        assert!(provider.create(&ctx(), &resource).await.is_err());
        assert_eq!(storage.total_calls(), 0);
    }
}
