//! S3Provider - Object storage resources behind the dynamic provider interface

use std::sync::Arc;

use stratus_core::config::ProviderConfig;
use stratus_core::context::OperationContext;
use stratus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use stratus_core::reconcile::Registry;
use stratus_core::resource::{Resource, ResourceId, State};

use crate::client::S3Connector;
use crate::resources::acl::BucketAclKind;
use crate::resources::bucket::BucketKind;
use crate::resources::cors::CorsKind;
use crate::resources::credential::CredentialKind;
use crate::resources::lifecycle::LifecycleKind;
use crate::resources::ownership::OwnershipKind;
use crate::resources::policy::BucketPolicyKind;
use crate::resources::versioning::VersioningKind;
use crate::resources::website::WebsiteKind;

pub struct S3Provider {
    registry: Registry,
}

impl S3Provider {
    /// Provider for the `s3` block of `config`. Clients are bound on first use.
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_connector(Arc::new(S3Connector::new(config)))
    }

    pub fn with_connector(connector: Arc<S3Connector>) -> Self {
        let registry = Registry::new("s3")
            .register(BucketKind::new(connector.clone()))
            .register(BucketAclKind::new(connector.clone()))
            .register(CorsKind::new(connector.clone()))
            .register(LifecycleKind::new(connector.clone()))
            .register(BucketPolicyKind::new(connector.clone()))
            .register(VersioningKind::new(connector.clone()))
            .register(WebsiteKind::new(connector.clone()))
            .register(OwnershipKind::new(connector.clone()))
            .register(CredentialKind::new(connector));
        Self { registry }
    }
}

impl Provider for S3Provider {
    fn name(&self) -> &'static str {
        self.registry.name()
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        self.registry.resource_types()
    }

    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        state: &'a State,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        self.registry.read(ctx, state)
    }

    fn read_data_source<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        self.registry.read_data_source(ctx, resource)
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        self.registry.create(ctx, resource)
    }

    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        self.registry.update(ctx, from, to)
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        state: &'a State,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        self.registry.delete(ctx, state)
    }

    fn import<'a>(
        &'a self,
        ctx: &'a OperationContext,
        id: &'a ResourceId,
        import_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        self.registry.import(ctx, id, import_id)
    }
}
