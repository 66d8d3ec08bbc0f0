//! Provider - Trait abstracting resource operations
//!
//! A Provider exposes the resource kinds of one remote platform (object
//! storage, virtual infrastructure) behind a dynamic, attribute-based
//! interface the declarative runtime drives.

use std::future::Future;
use std::pin::Pin;

use crate::context::OperationContext;
use crate::resource::{Resource, ResourceId, State};
use crate::schema::{ResourceSchema, TypeError};

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote object does not exist
    NotFound,
    /// The remote is not yet consistent; the call may succeed later
    Transient,
    /// The plan is invalid; nothing was sent to the remote
    Validation,
    /// A bounded wait ran out of time
    Timeout,
    /// The caller cancelled the operation
    Cancelled,
    /// Any other remote failure
    Remote,
    /// Broken invariant inside the provider
    Internal,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub kind: ErrorKind,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message)?;
        } else {
            write!(f, "{}", self.message)?;
        }
        if let Some(ref cause) = self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Remote,
            resource_id: None,
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::NotFound)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Validation)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Internal)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Timeout)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Cancelled)
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        if self.resource_id.is_none() {
            self.resource_id = Some(id);
        }
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Prefix the message with what was being attempted
    pub fn context(mut self, what: impl std::fmt::Display) -> Self {
        self.message = format!("{}: {}", what, self.message);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl From<Vec<TypeError>> for ProviderError {
    fn from(errors: Vec<TypeError>) -> Self {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        ProviderError::validation(message)
    }
}

impl From<TypeError> for ProviderError {
    fn from(error: TypeError) -> Self {
        ProviderError::validation(error.to_string())
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "s3_bucket")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema;

    /// Whether the type can also be read as a data source
    fn has_data_source(&self) -> bool {
        false
    }
}

/// Main Provider trait
///
/// Each platform implements this trait. All operations are async and involve
/// side effects on the remote.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "s3")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource no longer exists.
    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        state: &'a State,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Look up an existing object for a data source
    fn read_data_source<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Create a resource
    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Update a resource in place
    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>>;

    /// Delete a resource; deleting an absent resource succeeds
    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        state: &'a State,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Bring an existing remote object under management
    fn import<'a>(
        &'a self,
        ctx: &'a OperationContext,
        id: &'a ResourceId,
        import_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>>;
}
