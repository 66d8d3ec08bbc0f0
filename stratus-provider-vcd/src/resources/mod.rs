//! Virtual infrastructure resource kinds
//!
//! Objects inside a VDC are addressed by name within that VDC. Resources
//! that change a vApp's children hold the vApp's named lock for the whole
//! operation.

pub mod acl;
pub mod disk;
pub mod network;
pub mod vapp;
pub mod vapp_network;
pub mod vm;

use std::future::Future;
use std::time::Duration;

use stratus_core::attr::Attr;
use stratus_core::context::OperationContext;
use stratus_core::identity::ImportId;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::ReadOutcome;
use stratus_core::retry::{RetryConfig, retry_until};
use stratus_core::schema::{AttributeSchema, AttributeType};

use crate::api::VcdResult;
use crate::client::VcdConnector;
use crate::wire::Task;

/// Bound for retrying a call rejected because another task holds the object
const BUSY_TIMEOUT: Duration = Duration::from_secs(120);

const BUSY_INTERVAL: Duration = Duration::from_secs(5);

/// `vdc` attribute: defaults to the provider's VDC and is recorded in state
pub(crate) fn vdc_attribute() -> AttributeSchema {
    AttributeSchema::new("vdc", AttributeType::String)
        .optional_computed()
        .force_new()
        .with_description("VDC holding the object; defaults to the provider's")
}

pub(crate) fn vapp_name_attribute() -> AttributeSchema {
    AttributeSchema::new("vapp_name", AttributeType::String)
        .required()
        .force_new()
}

/// Value of an attribute that must be known when the remote is called
pub(crate) fn require<'a>(attr: &'a Attr<String>, name: &str) -> ProviderResult<&'a str> {
    attr.as_known()
        .map(String::as_str)
        .ok_or_else(|| ProviderError::validation(format!("'{}' must be known", name)))
}

/// Turn a remote read into a read outcome
pub(crate) fn observe<T, M: Clone>(
    result: VcdResult<T>,
    prior: &M,
    what: &str,
    found: impl FnOnce(T) -> M,
) -> ReadOutcome<M> {
    match result {
        Ok(value) => ReadOutcome::Found(found(value)),
        Err(e) => ReadOutcome::from_error(prior, ProviderError::from(e).context(what)),
    }
}

/// Id of the object a finished task created
pub(crate) fn owner_id(task: &Task) -> ProviderResult<String> {
    task.owner
        .as_ref()
        .and_then(|owner| owner.id.clone())
        .ok_or_else(|| {
            ProviderError::internal(format!(
                "task {} did not report the object it created",
                task.operation_name
            ))
        })
}

/// Start a task, retrying while the object is busy with another one, and
/// wait for it to finish
pub(crate) async fn run_task<F, Fut>(
    ctx: &OperationContext,
    connector: &VcdConnector,
    api: &dyn crate::api::VcdApi,
    operation_name: &str,
    start: F,
) -> ProviderResult<Task>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VcdResult<Task>>,
{
    let config = RetryConfig::with_timeout(BUSY_TIMEOUT)
        .interval(connector.poll_interval().unwrap_or(BUSY_INTERVAL));
    let task = retry_until(ctx, &config, operation_name, start, |result| {
        matches!(result, Err(e) if e.is_busy())
    })
    .await
    .map_err(|e| ProviderError::from(e).context(operation_name))?;
    connector
        .wait(ctx, api, task)
        .await
        .map_err(|e| e.context(operation_name))
}

/// `vdc` segment of an import id as a model attribute
pub(crate) fn import_vdc(id: &ImportId) -> Attr<String> {
    Attr::from_option(id.get("vdc").map(str::to_string))
}
