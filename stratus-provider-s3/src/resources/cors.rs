//! s3_bucket_cors_configuration - Cross-origin rules of a bucket

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use stratus_core::attr::{Attr, AttrValue, field, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::{Model, Translate};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::{Attributes, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError, types};

use super::{
    bucket_attribute, int_attr, observe, read_when_visible, reported_list, require,
    retry_on_codes, wire_int,
};
use crate::api::ObjectStorageApi;
use crate::client::S3Connector;
use crate::wire::CorsRule;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsRuleBlock {
    pub id: Attr<String>,
    pub allowed_headers: Attr<Vec<String>>,
    pub allowed_methods: Attr<Vec<String>>,
    pub allowed_origins: Attr<Vec<String>>,
    pub expose_headers: Attr<Vec<String>>,
    pub max_age_seconds: Attr<i64>,
}

impl AttrValue for CorsRuleBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "id", &self.id);
        put_attr(&mut map, "allowed_headers", &self.allowed_headers);
        put_attr(&mut map, "allowed_methods", &self.allowed_methods);
        put_attr(&mut map, "allowed_origins", &self.allowed_origins);
        put_attr(&mut map, "expose_headers", &self.expose_headers);
        put_attr(&mut map, "max_age_seconds", &self.max_age_seconds);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let Value::Map(map) = value else {
            return Err(TypeError::mismatch("CorsRule", value));
        };
        Ok(Self {
            id: field(map, "id")?,
            allowed_headers: field(map, "allowed_headers")?,
            allowed_methods: field(map, "allowed_methods")?,
            allowed_origins: field(map, "allowed_origins")?,
            expose_headers: field(map, "expose_headers")?,
            max_age_seconds: field(map, "max_age_seconds")?,
        })
    }
}

impl Translate for CorsRuleBlock {
    type Wire = CorsRule;

    fn to_remote(&self) -> CorsRule {
        CorsRule {
            id: self.id.as_known().cloned(),
            allowed_headers: self.allowed_headers.known_or_default(),
            allowed_methods: self.allowed_methods.known_or_default(),
            allowed_origins: self.allowed_origins.known_or_default(),
            expose_headers: self.expose_headers.known_or_default(),
            max_age_seconds: wire_int(&self.max_age_seconds),
        }
    }

    fn from_remote(wire: &CorsRule, prior: &Self) -> Self {
        Self {
            id: Attr::from_option(wire.id.clone()),
            allowed_headers: reported_list(wire.allowed_headers.clone(), &prior.allowed_headers),
            allowed_methods: Attr::Known(wire.allowed_methods.clone()),
            allowed_origins: Attr::Known(wire.allowed_origins.clone()),
            expose_headers: reported_list(wire.expose_headers.clone(), &prior.expose_headers),
            max_age_seconds: int_attr(wire.max_age_seconds),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorsModel {
    pub bucket: Attr<String>,
    pub cors_rule: Attr<Vec<CorsRuleBlock>>,
}

impl Model for CorsModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            cors_rule: get_attr(attributes, "cors_rule")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "cors_rule", &self.cors_rule);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

impl CorsModel {
    fn rules(&self) -> Vec<CorsRule> {
        self.cors_rule
            .as_known()
            .map(|rules| rules.iter().map(Translate::to_remote).collect())
            .unwrap_or_default()
    }

    fn observed(&self, wire: &[CorsRule]) -> Self {
        let prior = self.cors_rule.as_known().cloned().unwrap_or_default();
        let rules = wire
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let matching = prior.get(index).cloned().unwrap_or_default();
                CorsRuleBlock::from_remote(rule, &matching)
            })
            .collect();
        Self {
            bucket: self.bucket.clone(),
            cors_rule: Attr::Known(rules),
        }
    }
}

fn string_set() -> AttributeType {
    AttributeType::Set(Box::new(AttributeType::String))
}

fn rule_schema() -> AttributeType {
    AttributeType::Object(vec![
        AttributeSchema::new("id", AttributeType::String),
        AttributeSchema::new("allowed_headers", string_set()),
        AttributeSchema::new(
            "allowed_methods",
            AttributeType::Set(Box::new(AttributeType::Enum(
                ["GET", "PUT", "HEAD", "POST", "DELETE"]
                    .iter()
                    .map(|m| m.to_string())
                    .collect(),
            ))),
        )
        .required(),
        AttributeSchema::new("allowed_origins", string_set()).required(),
        AttributeSchema::new("expose_headers", string_set()),
        AttributeSchema::new("max_age_seconds", types::positive_int32()),
    ])
}

pub struct CorsKind {
    connector: Arc<S3Connector>,
}

impl CorsKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn ObjectStorageApi>,
        plan: &CorsModel,
    ) -> ProviderResult<CorsModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        let rules = plan.rules();

        retry_on_codes(ctx, &self.connector, "putting CORS configuration", &["NoSuchBucket"], || {
            client.put_bucket_cors(bucket, &rules)
        })
        .await?;

        debug!("waiting for CORS configuration of {}", bucket);
        read_when_visible(ctx, &self.connector, "reading CORS configuration", || {
            client.get_bucket_cors(bucket)
        })
        .await?;

        Ok(plan.clone())
    }
}

#[async_trait]
impl ResourceKind for CorsKind {
    type Model = CorsModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket_cors_configuration";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("CORS configuration of a bucket")
            .attribute(bucket_attribute())
            .attribute(
                AttributeSchema::new("cors_rule", AttributeType::List(Box::new(rule_schema())))
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
        plan: &CorsModel,
    ) -> ProviderResult<CorsModel> {
        self.put(ctx, client, plan).await
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &CorsModel,
    ) -> ReadOutcome<CorsModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.get_bucket_cors(bucket).await,
            state,
            "reading CORS configuration",
            |rules| state.observed(&rules),
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        _prior: &CorsModel,
        plan: &CorsModel,
    ) -> ProviderResult<CorsModel> {
        self.put(ctx, client, plan).await
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &CorsModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        client
            .delete_bucket_cors(bucket)
            .await
            .map_err(|e| ProviderError::from(e).context("deleting CORS configuration"))
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<CorsModel> {
        Ok(CorsModel {
            bucket: Attr::known(import_id),
            cors_rule: Attr::Null,
        })
    }
}
