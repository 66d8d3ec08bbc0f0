//! VcdProvider - Virtual infrastructure resources behind the dynamic provider interface

use std::sync::Arc;

use stratus_core::config::ProviderConfig;
use stratus_core::context::OperationContext;
use stratus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use stratus_core::reconcile::Registry;
use stratus_core::resource::{Resource, ResourceId, State};

use crate::client::VcdConnector;
use crate::resources::acl::AccessControlKind;
use crate::resources::disk::DiskKind;
use crate::resources::network::NetworkKind;
use crate::resources::vapp::VAppKind;
use crate::resources::vapp_network::VAppNetworkKind;
use crate::resources::vm::VmKind;

pub struct VcdProvider {
    registry: Registry,
}

impl VcdProvider {
    /// Provider for the `vcd` block of `config`. The session is opened on first use.
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_connector(Arc::new(VcdConnector::new(config)))
    }

    /// Every kind shares the connector, so they share one session and one lock table
    pub fn with_connector(connector: Arc<VcdConnector>) -> Self {
        let registry = Registry::new("vcd")
            .register(NetworkKind::new(connector.clone()))
            .register(VAppKind::new(connector.clone()))
            .register(VAppNetworkKind::new(connector.clone()))
            .register(VmKind::new(connector.clone()))
            .register(DiskKind::new(connector.clone()))
            .register(AccessControlKind::new(connector));
        Self { registry }
    }
}

impl Provider for VcdProvider {
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
