//! s3_bucket_lifecycle_configuration - Lifecycle rules of a bucket
//!
//! Lifecycle configurations propagate slowly: reads right after a put may
//! return nothing or an older rule set. Create and update therefore wait until
//! every configured rule is reported with its configured status on three
//! consecutive reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use stratus_core::attr::{Attr, AttrValue, field, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::{Model, Translate};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::{Attributes, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError, types};
use stratus_core::timeouts::Timeouts;
use stratus_core::waiter::Refresh;

use super::{
    bucket_attribute, int_attr, observe, read_when_visible, require, retry_on_codes, waiter,
    wire_int,
};
use crate::api::{ApiResult, ObjectStorageApi};
use crate::client::S3Connector;
use crate::wire::{LifecycleRule, Transition};

/// Default bound for create and update, which include the propagation wait
const PROPAGATION_WAIT: Duration = Duration::from_secs(600);

/// Consecutive matching reads before the configuration counts as applied
const STEADY_READS: u32 = 3;

const STEADY_INTERVAL: Duration = Duration::from_secs(10);

/// Bound of the steady-state confirmation once the rules are visible
const STEADY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionBlock {
    pub days: Attr<i64>,
    pub storage_class: Attr<String>,
}

impl AttrValue for TransitionBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "days", &self.days);
        put_attr(&mut map, "storage_class", &self.storage_class);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let Value::Map(map) = value else {
            return Err(TypeError::mismatch("Transition", value));
        };
        Ok(Self {
            days: field(map, "days")?,
            storage_class: field(map, "storage_class")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleRuleBlock {
    pub id: Attr<String>,
    pub status: Attr<String>,
    pub prefix: Attr<String>,
    pub expiration_days: Attr<i64>,
    pub noncurrent_version_expiration_days: Attr<i64>,
    pub abort_incomplete_multipart_upload_days: Attr<i64>,
    pub transition: Attr<Vec<TransitionBlock>>,
}

impl AttrValue for LifecycleRuleBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "id", &self.id);
        put_attr(&mut map, "status", &self.status);
        put_attr(&mut map, "prefix", &self.prefix);
        put_attr(&mut map, "expiration_days", &self.expiration_days);
        put_attr(
            &mut map,
            "noncurrent_version_expiration_days",
            &self.noncurrent_version_expiration_days,
        );
        put_attr(
            &mut map,
            "abort_incomplete_multipart_upload_days",
            &self.abort_incomplete_multipart_upload_days,
        );
        put_attr(&mut map, "transition", &self.transition);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let Value::Map(map) = value else {
            return Err(TypeError::mismatch("LifecycleRule", value));
        };
        Ok(Self {
            id: field(map, "id")?,
            status: field(map, "status")?,
            prefix: field(map, "prefix")?,
            expiration_days: field(map, "expiration_days")?,
            noncurrent_version_expiration_days: field(map, "noncurrent_version_expiration_days")?,
            abort_incomplete_multipart_upload_days: field(
                map,
                "abort_incomplete_multipart_upload_days",
            )?,
            transition: field(map, "transition")?,
        })
    }
}

impl Translate for LifecycleRuleBlock {
    type Wire = LifecycleRule;

    fn to_remote(&self) -> LifecycleRule {
        LifecycleRule {
            id: self.id.known_or_default(),
            status: self.status.known_or_default(),
            prefix: self.prefix.as_known().cloned(),
            expiration_days: wire_int(&self.expiration_days),
            noncurrent_version_expiration_days: wire_int(&self.noncurrent_version_expiration_days),
            abort_incomplete_multipart_upload_days: wire_int(
                &self.abort_incomplete_multipart_upload_days,
            ),
            transitions: self
                .transition
                .as_known()
                .map(|ts| {
                    ts.iter()
                        .map(|t| Transition {
                            days: wire_int(&t.days),
                            storage_class: t.storage_class.as_known().cloned(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn from_remote(wire: &LifecycleRule, prior: &Self) -> Self {
        let transition = if wire.transitions.is_empty() && !prior.transition.is_known() {
            Attr::Null
        } else {
            Attr::Known(
                wire.transitions
                    .iter()
                    .map(|t| TransitionBlock {
                        days: int_attr(t.days),
                        storage_class: Attr::from_option(t.storage_class.clone()),
                    })
                    .collect(),
            )
        };
        Self {
            id: Attr::known(wire.id.clone()),
            status: Attr::known(wire.status.clone()),
            // An empty filter prefix is reported for rules configured without one
            prefix: match wire.prefix.as_deref() {
                Some("") | None => Attr::reported(None, &prior.prefix),
                Some(p) => Attr::known(p),
            },
            expiration_days: int_attr(wire.expiration_days),
            noncurrent_version_expiration_days: int_attr(wire.noncurrent_version_expiration_days),
            abort_incomplete_multipart_upload_days: int_attr(
                wire.abort_incomplete_multipart_upload_days,
            ),
            transition,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleModel {
    pub bucket: Attr<String>,
    pub rule: Attr<Vec<LifecycleRuleBlock>>,
}

impl Model for LifecycleModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            rule: get_attr(attributes, "rule")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "rule", &self.rule);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

impl LifecycleModel {
    fn rules(&self) -> Vec<LifecycleRule> {
        self.rule
            .as_known()
            .map(|rules| rules.iter().map(Translate::to_remote).collect())
            .unwrap_or_default()
    }

    fn observed(&self, wire: &[LifecycleRule]) -> Self {
        let prior = self.rule.as_known().cloned().unwrap_or_default();
        let rules = wire
            .iter()
            .map(|rule| {
                let matching = prior
                    .iter()
                    .find(|p| p.id.as_known() == Some(&rule.id))
                    .cloned()
                    .unwrap_or_default();
                LifecycleRuleBlock::from_remote(rule, &matching)
            })
            .collect();
        Self {
            bucket: self.bucket.clone(),
            rule: Attr::Known(rules),
        }
    }
}

/// `"ready"` once every expected rule is reported with its expected status
fn rules_label(expected: &[LifecycleRule], observed: &[LifecycleRule]) -> &'static str {
    let applied = expected.iter().all(|want| {
        observed
            .iter()
            .any(|got| got.id == want.id && got.status == want.status)
    });
    if applied { "ready" } else { "pending" }
}

async fn refresh_rules(
    api: &dyn ObjectStorageApi,
    bucket: &str,
    expected: &[LifecycleRule],
) -> ApiResult<Refresh<Vec<LifecycleRule>>> {
    match api.get_bucket_lifecycle(bucket).await {
        Ok(rules) => {
            let label = rules_label(expected, &rules);
            Ok(Refresh::observed(rules, label))
        }
        Err(e) if e.is_not_found() => Ok(Refresh::NotFound),
        Err(e) => Err(e),
    }
}

fn rule_schema() -> AttributeType {
    AttributeType::Object(vec![
        AttributeSchema::new("id", AttributeType::String).required(),
        AttributeSchema::new(
            "status",
            AttributeType::Enum(vec!["Enabled".to_string(), "Disabled".to_string()]),
        )
        .required(),
        AttributeSchema::new("prefix", AttributeType::String).optional_computed(),
        AttributeSchema::new("expiration_days", types::positive_int32()),
        AttributeSchema::new("noncurrent_version_expiration_days", types::positive_int32()),
        AttributeSchema::new("abort_incomplete_multipart_upload_days", types::positive_int32()),
        AttributeSchema::new(
            "transition",
            AttributeType::List(Box::new(AttributeType::Object(vec![
                AttributeSchema::new("days", types::int32()),
                AttributeSchema::new("storage_class", AttributeType::String).required(),
            ]))),
        ),
    ])
}

pub struct LifecycleKind {
    connector: Arc<S3Connector>,
}

impl LifecycleKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }

    async fn put(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn ObjectStorageApi>,
        plan: &LifecycleModel,
    ) -> ProviderResult<LifecycleModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        let rules = plan.rules();
        let api = client.as_ref();

        retry_on_codes(
            ctx,
            &self.connector,
            "putting lifecycle configuration",
            &["NoSuchBucket"],
            || api.put_bucket_lifecycle(bucket, &rules),
        )
        .await?;

        read_when_visible(ctx, &self.connector, "reading lifecycle configuration", || {
            api.get_bucket_lifecycle(bucket)
        })
        .await?;

        debug!("waiting for lifecycle rules of {} to settle", bucket);
        let steady = ctx.child(STEADY_TIMEOUT);
        waiter(&self.connector, &["pending"], &["ready"], STEADY_TIMEOUT)
            .min_interval(STEADY_INTERVAL)
            .continuous_target_occurrence(STEADY_READS)
            .wait(&steady, || refresh_rules(api, bucket, &rules))
            .await
            .map_err(|e| ProviderError::from(e).context("waiting for lifecycle configuration"))?;

        Ok(plan.clone())
    }
}

#[async_trait]
impl ResourceKind for LifecycleKind {
    type Model = LifecycleModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket_lifecycle_configuration";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Lifecycle configuration of a bucket")
            .attribute(bucket_attribute())
            .attribute(
                AttributeSchema::new("rule", AttributeType::List(Box::new(rule_schema())))
                    .required(),
            )
    }

    fn default_timeouts(&self) -> Timeouts {
        Timeouts {
            create: PROPAGATION_WAIT,
            update: PROPAGATION_WAIT,
            ..Timeouts::default()
        }
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.storage().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &LifecycleModel,
    ) -> ProviderResult<LifecycleModel> {
        self.put(ctx, client, plan).await
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &LifecycleModel,
    ) -> ReadOutcome<LifecycleModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.get_bucket_lifecycle(bucket).await,
            state,
            "reading lifecycle configuration",
            |rules| state.observed(&rules),
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        _prior: &LifecycleModel,
        plan: &LifecycleModel,
    ) -> ProviderResult<LifecycleModel> {
        self.put(ctx, client, plan).await
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &LifecycleModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        let api = client.as_ref();
        api.delete_bucket_lifecycle(bucket)
            .await
            .map_err(|e| ProviderError::from(e).context("deleting lifecycle configuration"))?;

        waiter(&self.connector, &["pending", "ready"], &[], ctx.remaining())
            .wait(ctx, || refresh_rules(api, bucket, &[]))
            .await
            .map_err(|e| ProviderError::from(e).context("waiting for lifecycle deletion"))?;
        Ok(())
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<LifecycleModel> {
        Ok(LifecycleModel {
            bucket: Attr::known(import_id),
            rule: Attr::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeStorage, ctx, provider_with};
    use stratus_core::provider::Provider;
    use stratus_core::resource::Resource;

    fn rule(id: &str, status: &str) -> Value {
        let mut rule = HashMap::new();
        rule.insert("id".to_string(), Value::from(id));
        rule.insert("status".to_string(), Value::from(status));
        rule.insert("expiration_days".to_string(), Value::Int(30));
        Value::Map(rule)
    }

    fn wire(id: &str, status: &str) -> LifecycleRule {
        LifecycleRule {
            id: id.to_string(),
            status: status.to_string(),
            expiration_days: Some(30),
            ..Default::default()
        }
    }

    fn resource() -> Resource {
        Resource::new("s3_bucket_lifecycle_configuration", "archive")
            .with_attribute("bucket", "archive")
            .with_attribute("rule", Value::List(vec![rule("r1", "Enabled")]))
    }

    #[tokio::test(start_paused = true)]
    async fn create_completes_after_three_consecutive_matching_reads() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("archive");
        storage.queue_lifecycle_reads(vec![
            // first visible read
            Ok(vec![wire("r1", "Disabled")]),
            Ok(vec![wire("r1", "Enabled")]),
            Ok(vec![wire("r1", "Enabled")]),
            // stale replica resets the count
            Ok(vec![wire("r1", "Disabled")]),
            Ok(vec![wire("r1", "Enabled")]),
            Ok(vec![wire("r1", "Enabled")]),
            Ok(vec![wire("r1", "Enabled")]),
        ]);
        let provider = provider_with(storage.clone());

        let state = provider.create(&ctx(), &resource()).await.unwrap();

        // seven queued reads plus the read-back
        assert_eq!(storage.calls("get_bucket_lifecycle"), 8);
        let Some(Value::List(rules)) = state.attributes.get("rule") else {
            panic!("expected rules");
        };
        let Value::Map(r1) = &rules[0] else {
            panic!("expected a rule block");
        };
        assert_eq!(r1.get("status"), Some(&Value::from("Enabled")));
        assert_eq!(r1.get("transition"), Some(&Value::Null));
    }

    #[tokio::test(start_paused = true)]
    async fn rules_never_settling_time_out() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("archive");
        storage.queue_lifecycle_reads(
            std::iter::repeat_with(|| Ok(vec![wire("r1", "Disabled")]))
                .take(10_000)
                .collect(),
        );
        let provider = provider_with(storage.clone());

        let timed = resource().with_attribute(
            "timeouts",
            Value::Map([("create".to_string(), Value::from("1m"))].into_iter().collect()),
        );
        let err = provider.create(&ctx(), &timed).await.unwrap_err();
        assert_eq!(err.kind, stratus_core::provider::ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_state_confirmation_gives_up_after_two_minutes() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("archive");
        storage.queue_lifecycle_reads(
            std::iter::repeat_with(|| Ok(vec![wire("r1", "Disabled")]))
                .take(10_000)
                .collect(),
        );
        let provider = provider_with(storage.clone());

        let started = tokio::time::Instant::now();
        let err = provider.create(&ctx(), &resource()).await.unwrap_err();
        assert_eq!(err.kind, stratus_core::provider::ErrorKind::Timeout);
        assert!(started.elapsed() >= STEADY_TIMEOUT);
        assert!(started.elapsed() < STEADY_TIMEOUT + STEADY_INTERVAL * 2);
    }

    #[tokio::test]
    async fn days_beyond_the_wire_range_are_rejected() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("archive");
        let provider = provider_with(storage.clone());

        let mut big = HashMap::new();
        big.insert("id".to_string(), Value::from("r1"));
        big.insert("status".to_string(), Value::from("Enabled"));
        big.insert(
            "expiration_days".to_string(),
            Value::Int(i64::from(i32::MAX) + 1),
        );
        let config = resource().with_attribute("rule", Value::List(vec![Value::Map(big)]));

        let err = provider.create(&ctx(), &config).await.unwrap_err();
        assert_eq!(err.kind, stratus_core::provider::ErrorKind::Validation);
        assert!(err.to_string().contains("32-bit"));
        assert_eq!(storage.total_calls(), 0);
    }

    #[test]
    fn label_requires_every_rule() {
        let expected = vec![wire("r1", "Enabled"), wire("r2", "Enabled")];
        assert_eq!(rules_label(&expected, &[wire("r1", "Enabled")]), "pending");
        assert_eq!(
            rules_label(&expected, &[wire("r2", "Enabled"), wire("r1", "Enabled")]),
            "ready"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_until_configuration_is_gone() {
        let storage = Arc::new(FakeStorage::new());
        storage.add_bucket("archive");
        let provider = provider_with(storage.clone());
        let state = provider.create(&ctx(), &resource()).await.unwrap();

        storage.queue_lifecycle_reads(vec![Ok(vec![wire("r1", "Enabled")])]);
        provider.delete(&ctx(), &state).await.unwrap();

        assert!(storage.with_bucket("archive", |b| b.lifecycle.is_none()));
        provider.delete(&ctx(), &state).await.unwrap();
    }
}
