//! s3_bucket_website_configuration - Static website hosting of a bucket

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::attr::{Attr, AttrValue, field, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::{Model, Translate};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::{Attributes, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::{bucket_attribute, observe, read_when_visible, require, retry_on_codes};
use crate::api::ObjectStorageApi;
use crate::client::S3Connector;
use crate::wire::{Redirect, RedirectAll, RoutingCondition, RoutingRule, WebsiteConfiguration};

fn block(value: &Value, what: &str) -> Result<HashMap<String, Value>, TypeError> {
    match value {
        Value::Map(map) => Ok(map.clone()),
        other => Err(TypeError::mismatch(what, other)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectAllBlock {
    pub host_name: Attr<String>,
    pub protocol: Attr<String>,
}

impl AttrValue for RedirectAllBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "host_name", &self.host_name);
        put_attr(&mut map, "protocol", &self.protocol);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = block(value, "RedirectAllRequestsTo")?;
        Ok(Self {
            host_name: field(&map, "host_name")?,
            protocol: field(&map, "protocol")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionBlock {
    pub key_prefix_equals: Attr<String>,
    pub http_error_code_returned_equals: Attr<String>,
}

impl AttrValue for ConditionBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "key_prefix_equals", &self.key_prefix_equals);
        put_attr(
            &mut map,
            "http_error_code_returned_equals",
            &self.http_error_code_returned_equals,
        );
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = block(value, "Condition")?;
        Ok(Self {
            key_prefix_equals: field(&map, "key_prefix_equals")?,
            http_error_code_returned_equals: field(&map, "http_error_code_returned_equals")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectBlock {
    pub host_name: Attr<String>,
    pub protocol: Attr<String>,
    pub replace_key_prefix_with: Attr<String>,
    pub replace_key_with: Attr<String>,
    pub http_redirect_code: Attr<String>,
}

impl AttrValue for RedirectBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "host_name", &self.host_name);
        put_attr(&mut map, "protocol", &self.protocol);
        put_attr(&mut map, "replace_key_prefix_with", &self.replace_key_prefix_with);
        put_attr(&mut map, "replace_key_with", &self.replace_key_with);
        put_attr(&mut map, "http_redirect_code", &self.http_redirect_code);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = block(value, "Redirect")?;
        Ok(Self {
            host_name: field(&map, "host_name")?,
            protocol: field(&map, "protocol")?,
            replace_key_prefix_with: field(&map, "replace_key_prefix_with")?,
            replace_key_with: field(&map, "replace_key_with")?,
            http_redirect_code: field(&map, "http_redirect_code")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingRuleBlock {
    pub condition: Attr<ConditionBlock>,
    pub redirect: Attr<RedirectBlock>,
}

impl AttrValue for RoutingRuleBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "condition", &self.condition);
        put_attr(&mut map, "redirect", &self.redirect);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = block(value, "RoutingRule")?;
        Ok(Self {
            condition: field(&map, "condition")?,
            redirect: field(&map, "redirect")?,
        })
    }
}

impl Translate for RoutingRuleBlock {
    type Wire = RoutingRule;

    fn to_remote(&self) -> RoutingRule {
        let redirect = self.redirect.as_known().cloned().unwrap_or_default();
        RoutingRule {
            condition: self.condition.as_known().map(|c| RoutingCondition {
                key_prefix_equals: c.key_prefix_equals.as_known().cloned(),
                http_error_code_returned_equals: c
                    .http_error_code_returned_equals
                    .as_known()
                    .cloned(),
            }),
            redirect: Redirect {
                host_name: redirect.host_name.into_option(),
                protocol: redirect.protocol.into_option(),
                replace_key_prefix_with: redirect.replace_key_prefix_with.into_option(),
                replace_key_with: redirect.replace_key_with.into_option(),
                http_redirect_code: redirect.http_redirect_code.into_option(),
            },
        }
    }

    fn from_remote(wire: &RoutingRule, _prior: &Self) -> Self {
        let r = &wire.redirect;
        Self {
            condition: Attr::from_option(wire.condition.as_ref().map(|c| ConditionBlock {
                key_prefix_equals: Attr::from_option(c.key_prefix_equals.clone()),
                http_error_code_returned_equals: Attr::from_option(
                    c.http_error_code_returned_equals.clone(),
                ),
            })),
            redirect: Attr::Known(RedirectBlock {
                host_name: Attr::from_option(r.host_name.clone()),
                protocol: Attr::from_option(r.protocol.clone()),
                replace_key_prefix_with: Attr::from_option(r.replace_key_prefix_with.clone()),
                replace_key_with: Attr::from_option(r.replace_key_with.clone()),
                http_redirect_code: Attr::from_option(r.http_redirect_code.clone()),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebsiteModel {
    pub bucket: Attr<String>,
    pub index_document: Attr<String>,
    pub error_document: Attr<String>,
    pub redirect_all_requests_to: Attr<RedirectAllBlock>,
    pub routing_rule: Attr<Vec<RoutingRuleBlock>>,
    pub website_endpoint: Attr<String>,
}

impl Model for WebsiteModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            index_document: get_attr(attributes, "index_document")?,
            error_document: get_attr(attributes, "error_document")?,
            redirect_all_requests_to: get_attr(attributes, "redirect_all_requests_to")?,
            routing_rule: get_attr(attributes, "routing_rule")?,
            website_endpoint: get_attr(attributes, "website_endpoint")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "index_document", &self.index_document);
        put_attr(&mut attrs, "error_document", &self.error_document);
        put_attr(&mut attrs, "redirect_all_requests_to", &self.redirect_all_requests_to);
        put_attr(&mut attrs, "routing_rule", &self.routing_rule);
        put_attr(&mut attrs, "website_endpoint", &self.website_endpoint);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

impl Translate for WebsiteModel {
    type Wire = WebsiteConfiguration;

    fn to_remote(&self) -> WebsiteConfiguration {
        WebsiteConfiguration {
            index_document: self.index_document.as_known().cloned(),
            error_document: self.error_document.as_known().cloned(),
            redirect_all: self.redirect_all_requests_to.as_known().map(|r| RedirectAll {
                host_name: r.host_name.known_or_default(),
                protocol: r.protocol.as_known().cloned(),
            }),
            routing_rules: self
                .routing_rule
                .as_known()
                .map(|rules| rules.iter().map(Translate::to_remote).collect())
                .unwrap_or_default(),
        }
    }

    fn from_remote(wire: &WebsiteConfiguration, prior: &Self) -> Self {
        let routing_rule = if wire.routing_rules.is_empty() && !prior.routing_rule.is_known() {
            Attr::Null
        } else {
            Attr::Known(
                wire.routing_rules
                    .iter()
                    .map(|r| RoutingRuleBlock::from_remote(r, &RoutingRuleBlock::default()))
                    .collect(),
            )
        };
        Self {
            bucket: prior.bucket.clone(),
            index_document: Attr::from_option(wire.index_document.clone()),
            error_document: Attr::from_option(wire.error_document.clone()),
            redirect_all_requests_to: Attr::from_option(wire.redirect_all.as_ref().map(|r| {
                RedirectAllBlock {
                    host_name: Attr::known(r.host_name.clone()),
                    protocol: Attr::from_option(r.protocol.clone()),
                }
            })),
            routing_rule,
            website_endpoint: prior.website_endpoint.clone(),
        }
    }
}

fn protocol_type() -> AttributeType {
    AttributeType::Enum(vec!["http".to_string(), "https".to_string()])
}

fn routing_rule_schema() -> AttributeType {
    AttributeType::Object(vec![
        AttributeSchema::new(
            "condition",
            AttributeType::Object(vec![
                AttributeSchema::new("key_prefix_equals", AttributeType::String),
                AttributeSchema::new("http_error_code_returned_equals", AttributeType::String),
            ]),
        ),
        AttributeSchema::new(
            "redirect",
            AttributeType::Object(vec![
                AttributeSchema::new("host_name", AttributeType::String),
                AttributeSchema::new("protocol", protocol_type()),
                AttributeSchema::new("replace_key_prefix_with", AttributeType::String),
                AttributeSchema::new("replace_key_with", AttributeType::String),
                AttributeSchema::new("http_redirect_code", AttributeType::String),
            ]),
        )
        .required(),
    ])
}

pub struct WebsiteKind {
    connector: Arc<S3Connector>,
}

impl WebsiteKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn ObjectStorageApi>,
        plan: &WebsiteModel,
    ) -> ProviderResult<WebsiteModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        let website = plan.to_remote();
        retry_on_codes(
            ctx,
            &self.connector,
            "putting website configuration",
            &["NoSuchBucket"],
            || client.put_bucket_website(bucket, &website),
        )
        .await?;
        read_when_visible(ctx, &self.connector, "reading website configuration", || {
            client.get_bucket_website(bucket)
        })
        .await?;
        Ok(plan.clone())
    }
}

#[async_trait]
impl ResourceKind for WebsiteKind {
    type Model = WebsiteModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket_website_configuration";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Static website configuration of a bucket")
            .attribute(bucket_attribute())
            .attribute(AttributeSchema::new("index_document", AttributeType::String))
            .attribute(AttributeSchema::new("error_document", AttributeType::String))
            .attribute(AttributeSchema::new(
                "redirect_all_requests_to",
                AttributeType::Object(vec![
                    AttributeSchema::new("host_name", AttributeType::String).required(),
                    AttributeSchema::new("protocol", protocol_type()),
                ]),
            ))
            .attribute(AttributeSchema::new(
                "routing_rule",
                AttributeType::List(Box::new(routing_rule_schema())),
            ))
            .attribute(
                AttributeSchema::new("website_endpoint", AttributeType::String)
                    .computed()
                    .with_description("Host name serving the website"),
            )
            .exactly_one_of(&["index_document", "redirect_all_requests_to"])
            .conflicting(&["error_document", "redirect_all_requests_to"])
            .conflicting(&["routing_rule", "redirect_all_requests_to"])
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.storage().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &WebsiteModel,
    ) -> ProviderResult<WebsiteModel> {
        self.put(ctx, client, plan).await
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &WebsiteModel,
    ) -> ReadOutcome<WebsiteModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.get_bucket_website(bucket).await,
            state,
            "reading website configuration",
            |wire| WebsiteModel {
                website_endpoint: Attr::Known(client.website_endpoint(bucket)),
                ..WebsiteModel::from_remote(&wire, state)
            },
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        _prior: &WebsiteModel,
        plan: &WebsiteModel,
    ) -> ProviderResult<WebsiteModel> {
        self.put(ctx, client, plan).await
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &WebsiteModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        client
            .delete_bucket_website(bucket)
            .await
            .map_err(|e| ProviderError::from(e).context("deleting website configuration"))
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<WebsiteModel> {
        Ok(WebsiteModel {
            bucket: Attr::known(import_id),
            ..Default::default()
        })
    }
}
