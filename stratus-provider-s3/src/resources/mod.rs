//! Object storage resource kinds
//!
//! Every bucket sub-resource is addressed by its bucket name, which is also
//! its identity and its import id.

pub mod acl;
pub mod bucket;
pub mod cors;
pub mod credential;
pub mod lifecycle;
pub mod ownership;
pub mod policy;
pub mod versioning;
pub mod website;

use std::future::Future;
use std::time::Duration;

use stratus_core::attr::Attr;
use stratus_core::context::OperationContext;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::ReadOutcome;
use stratus_core::retry::{RetryConfig, retry_until};
use stratus_core::schema::{AttributeSchema, types};
use stratus_core::waiter::StateWaiter;

use crate::api::ApiResult;
use crate::client::S3Connector;

/// Bound for calls racing the propagation of a freshly created bucket
pub(crate) const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause between attempts of a propagation retry
pub(crate) const PROPAGATION_INTERVAL: Duration = Duration::from_secs(5);

/// `bucket` attribute shared by every bucket sub-resource
pub(crate) fn bucket_attribute() -> AttributeSchema {
    AttributeSchema::new("bucket", types::bucket_name())
        .required()
        .force_new()
        .with_description("Name of the bucket")
}

/// Value of an attribute that must be known when the remote is called
pub(crate) fn require<'a>(attr: &'a Attr<String>, name: &str) -> ProviderResult<&'a str> {
    attr.as_known()
        .map(String::as_str)
        .ok_or_else(|| ProviderError::validation(format!("'{}' must be known", name)))
}

/// Turn a remote read into a read outcome
pub(crate) fn observe<T, M: Clone>(
    result: ApiResult<T>,
    prior: &M,
    what: &str,
    found: impl FnOnce(T) -> M,
) -> ReadOutcome<M> {
    match result {
        Ok(value) => ReadOutcome::Found(found(value)),
        Err(e) => ReadOutcome::from_error(prior, ProviderError::from(e).context(what)),
    }
}

/// Run a write, retrying while the remote reports one of `codes`
pub(crate) async fn retry_on_codes<F, Fut>(
    ctx: &OperationContext,
    connector: &S3Connector,
    operation_name: &str,
    codes: &[&str],
    operation: F,
) -> ProviderResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<()>>,
{
    let config = RetryConfig::with_timeout(PROPAGATION_TIMEOUT)
        .interval(connector.poll_interval().unwrap_or(PROPAGATION_INTERVAL));
    retry_until(ctx, &config, operation_name, operation, |result| {
        matches!(result, Err(e) if codes.iter().any(|c| e.is_code(c)))
    })
    .await
    .map_err(|e| ProviderError::from(e).context(operation_name))
}

/// Re-read until the configuration is visible, tolerating not-found for the
/// propagation window
pub(crate) async fn read_when_visible<T, F, Fut>(
    ctx: &OperationContext,
    connector: &S3Connector,
    operation_name: &str,
    operation: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let config = RetryConfig::with_timeout(PROPAGATION_TIMEOUT)
        .interval(connector.poll_interval().unwrap_or(PROPAGATION_INTERVAL));
    retry_until(ctx, &config, operation_name, operation, |result| {
        matches!(result, Err(e) if e.is_not_found())
    })
    .await
    .map_err(|e| ProviderError::from(e).context(operation_name))
}

/// State waiter honouring the provider's poll interval override
pub(crate) fn waiter(
    connector: &S3Connector,
    pending: &[&str],
    target: &[&str],
    timeout: Duration,
) -> StateWaiter {
    let waiter = StateWaiter::new(pending, target, timeout);
    match connector.poll_interval() {
        Some(interval) => waiter.poll_interval(interval),
        None => waiter,
    }
}

/// Reported list for an optional collection: empty and never configured stays
/// null
pub(crate) fn reported_list<T: Clone>(remote: Vec<T>, prior: &Attr<Vec<T>>) -> Attr<Vec<T>> {
    if !remote.is_empty() || prior.is_known() {
        Attr::Known(remote)
    } else {
        Attr::Null
    }
}

pub(crate) fn int_attr(value: Option<i32>) -> Attr<i64> {
    Attr::from_option(value.map(i64::from))
}

/// Wire form of an integer the schema bounds to 32 bits
pub(crate) fn wire_int(attr: &Attr<i64>) -> Option<i32> {
    attr.as_known().and_then(|n| i32::try_from(*n).ok())
}
