//! s3_bucket_versioning - Versioning state of a bucket

use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::attr::{Attr, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::Model;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::Attributes;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::{bucket_attribute, require, retry_on_codes};
use crate::api::ObjectStorageApi;
use crate::client::S3Connector;

/// Versioning cannot be turned off once enabled, only suspended
const SUSPENDED: &str = "Suspended";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersioningModel {
    pub bucket: Attr<String>,
    pub status: Attr<String>,
}

impl Model for VersioningModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            status: get_attr(attributes, "status")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "status", &self.status);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

pub struct VersioningKind {
    connector: Arc<S3Connector>,
}

impl VersioningKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn ObjectStorageApi>,
        plan: &VersioningModel,
    ) -> ProviderResult<VersioningModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        let status = require(&plan.status, "status")?;
        retry_on_codes(ctx, &self.connector, "putting bucket versioning", &["NoSuchBucket"], || {
            client.put_bucket_versioning(bucket, status)
        })
        .await?;
        Ok(plan.clone())
    }
}

#[async_trait]
impl ResourceKind for VersioningKind {
    type Model = VersioningModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket_versioning";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Versioning state of a bucket")
            .attribute(bucket_attribute())
            .attribute(
                AttributeSchema::new(
                    "status",
                    AttributeType::Enum(vec!["Enabled".to_string(), SUSPENDED.to_string()]),
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
        plan: &VersioningModel,
    ) -> ProviderResult<VersioningModel> {
        self.put(ctx, client, plan).await
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &VersioningModel,
    ) -> ReadOutcome<VersioningModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        match client.get_bucket_versioning(bucket).await {
            Ok(Some(status)) => ReadOutcome::Found(VersioningModel {
                bucket: state.bucket.clone(),
                status: Attr::Known(status),
            }),
            // Never configured
            Ok(None) => ReadOutcome::NotFound,
            Err(e) => ReadOutcome::from_error(
                state,
                ProviderError::from(e).context("reading bucket versioning"),
            ),
        }
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        _prior: &VersioningModel,
        plan: &VersioningModel,
    ) -> ProviderResult<VersioningModel> {
        self.put(ctx, client, plan).await
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &VersioningModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        if state.status.as_known().map(String::as_str) == Some(SUSPENDED) {
            return Ok(());
        }
        client
            .put_bucket_versioning(bucket, SUSPENDED)
            .await
            .map_err(|e| ProviderError::from(e).context("suspending bucket versioning"))
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<VersioningModel> {
        Ok(VersioningModel {
            bucket: Attr::known(import_id),
            status: Attr::Null,
        })
    }
}
