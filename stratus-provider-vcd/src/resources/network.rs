//! vcd_network_routed - Routed org-VDC network behind an edge gateway
//!
//! Static IP pools are unordered: the remote may return them in any order,
//! and the state keeps the configured order when the members are the same.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::attr::{Attr, AttrValue, field, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::identity::ImportId;
use stratus_core::model::{Model, Translate, stable_order};
use stratus_core::provider::ProviderResult;
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::{Attributes, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError, types};

use super::{import_vdc, observe, owner_id, require, run_task, vdc_attribute};
use crate::api::VcdApi;
use crate::client::VcdConnector;
use crate::wire::{IpRange, Network};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IpPoolBlock {
    pub start_address: Attr<String>,
    pub end_address: Attr<String>,
}

impl AttrValue for IpPoolBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "start_address", &self.start_address);
        put_attr(&mut map, "end_address", &self.end_address);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let Value::Map(map) = value else {
            return Err(TypeError::mismatch("IpPool", value));
        };
        Ok(Self {
            start_address: field(map, "start_address")?,
            end_address: field(map, "end_address")?,
        })
    }
}

impl From<&IpRange> for IpPoolBlock {
    fn from(range: &IpRange) -> Self {
        Self {
            start_address: Attr::known(range.start_address.clone()),
            end_address: Attr::known(range.end_address.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkModel {
    pub vdc: Attr<String>,
    pub name: Attr<String>,
    pub id: Attr<String>,
    pub description: Attr<String>,
    pub edge_gateway: Attr<String>,
    pub gateway: Attr<String>,
    pub prefix_length: Attr<i64>,
    pub dns1: Attr<String>,
    pub dns2: Attr<String>,
    pub dns_suffix: Attr<String>,
    pub static_ip_pool: Attr<Vec<IpPoolBlock>>,
}

impl Model for NetworkModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            vdc: get_attr(attributes, "vdc")?,
            name: get_attr(attributes, "name")?,
            id: get_attr(attributes, "id")?,
            description: get_attr(attributes, "description")?,
            edge_gateway: get_attr(attributes, "edge_gateway")?,
            gateway: get_attr(attributes, "gateway")?,
            prefix_length: get_attr(attributes, "prefix_length")?,
            dns1: get_attr(attributes, "dns1")?,
            dns2: get_attr(attributes, "dns2")?,
            dns_suffix: get_attr(attributes, "dns_suffix")?,
            static_ip_pool: get_attr(attributes, "static_ip_pool")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "vdc", &self.vdc);
        put_attr(&mut attrs, "name", &self.name);
        put_attr(&mut attrs, "id", &self.id);
        put_attr(&mut attrs, "description", &self.description);
        put_attr(&mut attrs, "edge_gateway", &self.edge_gateway);
        put_attr(&mut attrs, "gateway", &self.gateway);
        put_attr(&mut attrs, "prefix_length", &self.prefix_length);
        put_attr(&mut attrs, "dns1", &self.dns1);
        put_attr(&mut attrs, "dns2", &self.dns2);
        put_attr(&mut attrs, "dns_suffix", &self.dns_suffix);
        put_attr(&mut attrs, "static_ip_pool", &self.static_ip_pool);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.id.as_known().cloned()
    }
}

impl Translate for NetworkModel {
    type Wire = Network;

    fn to_remote(&self) -> Network {
        let pools = self
            .static_ip_pool
            .as_known()
            .map(|pools| {
                pools
                    .iter()
                    .filter_map(|p| {
                        Some(IpRange {
                            start_address: p.start_address.as_known()?.clone(),
                            end_address: p.end_address.as_known()?.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Network {
            id: self.id.as_known().cloned(),
            name: self.name.known_or_default(),
            description: self.description.as_known().cloned(),
            edge_gateway: self.edge_gateway.known_or_default(),
            gateway: self.gateway.known_or_default(),
            prefix_length: self.prefix_length.known_or_default(),
            dns1: self.dns1.as_known().cloned(),
            dns2: self.dns2.as_known().cloned(),
            dns_suffix: self.dns_suffix.as_known().cloned(),
            static_ip_pools: pools,
        }
    }

    fn from_remote(wire: &Network, prior: &Self) -> Self {
        let pools: Vec<IpPoolBlock> = wire.static_ip_pools.iter().map(IpPoolBlock::from).collect();
        let static_ip_pool = match &prior.static_ip_pool {
            Attr::Known(prior_pools) => Attr::Known(stable_order(pools, prior_pools)),
            _ if pools.is_empty() => Attr::Null,
            _ => Attr::Known(pools),
        };
        Self {
            vdc: prior.vdc.clone(),
            name: Attr::known(wire.name.clone()),
            id: Attr::reported(wire.id.clone(), &prior.id),
            description: Attr::from_option(wire.description.clone()),
            edge_gateway: Attr::known(wire.edge_gateway.clone()),
            gateway: Attr::known(wire.gateway.clone()),
            prefix_length: Attr::Known(wire.prefix_length),
            dns1: Attr::from_option(wire.dns1.clone()),
            dns2: Attr::from_option(wire.dns2.clone()),
            dns_suffix: Attr::from_option(wire.dns_suffix.clone()),
            static_ip_pool,
        }
    }
}

pub struct NetworkKind {
    connector: Arc<VcdConnector>,
}

impl NetworkKind {
    pub fn new(connector: Arc<VcdConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ResourceKind for NetworkKind {
    type Model = NetworkModel;
    type Client = Arc<dyn VcdApi>;
    const TYPE_NAME: &'static str = "vcd_network_routed";

    fn schema(&self) -> ResourceSchema {
        let pool = AttributeType::Object(vec![
            AttributeSchema::new("start_address", types::ipv4()).required(),
            AttributeSchema::new("end_address", types::ipv4()).required(),
        ]);
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Routed org-VDC network")
            .attribute(vdc_attribute())
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new("edge_gateway", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("gateway", types::ipv4())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("prefix_length", types::positive_int())
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("dns1", types::ipv4()))
            .attribute(AttributeSchema::new("dns2", types::ipv4()))
            .attribute(AttributeSchema::new("dns_suffix", AttributeType::String))
            .attribute(AttributeSchema::new(
                "static_ip_pool",
                AttributeType::Set(Box::new(pool)),
            ))
    }

    fn has_data_source(&self) -> bool {
        true
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.api().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &NetworkModel,
    ) -> ProviderResult<NetworkModel> {
        let vdc = self.connector.vdc(&plan.vdc)?;
        let network = plan.to_remote();
        let task = run_task(ctx, &self.connector, client.as_ref(), "creating network", || {
            client.create_network(&vdc, &network)
        })
        .await?;
        Ok(NetworkModel {
            vdc: Attr::Known(vdc),
            id: Attr::Known(owner_id(&task)?),
            ..plan.clone()
        })
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &NetworkModel,
    ) -> ReadOutcome<NetworkModel> {
        let vdc = match self.connector.vdc(&state.vdc) {
            Ok(vdc) => vdc,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        // Imports and data sources know the network by name only
        let remote = match (&state.id, require(&state.name, "name")) {
            (Attr::Known(id), _) => client.get_network(&vdc, id).await,
            (_, Ok(name)) => client.find_network(&vdc, name).await,
            (_, Err(e)) => return ReadOutcome::from_error(state, e),
        };
        observe(remote, state, "reading network", |network| NetworkModel {
            vdc: Attr::Known(vdc.clone()),
            ..NetworkModel::from_remote(&network, state)
        })
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        prior: &NetworkModel,
        plan: &NetworkModel,
    ) -> ProviderResult<NetworkModel> {
        let vdc = self.connector.vdc(&prior.vdc)?;
        let id = require(&prior.id, "id")?;
        let network = NetworkModel {
            id: prior.id.clone(),
            ..plan.clone()
        }
        .to_remote();
        run_task(ctx, &self.connector, client.as_ref(), "updating network", || {
            client.update_network(&vdc, id, &network)
        })
        .await?;
        Ok(NetworkModel {
            vdc: Attr::Known(vdc.clone()),
            id: prior.id.clone(),
            ..plan.clone()
        })
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &NetworkModel,
    ) -> ProviderResult<()> {
        let vdc = self.connector.vdc(&state.vdc)?;
        let id = require(&state.id, "id")?;
        run_task(ctx, &self.connector, client.as_ref(), "deleting network", || {
            client.delete_network(&vdc, id)
        })
        .await?;
        Ok(())
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<NetworkModel> {
        let id = ImportId::parse(import_id, &["vdc", "name"], 1)?;
        Ok(NetworkModel {
            vdc: import_vdc(&id),
            name: Attr::known(id.require("name")?),
            ..Default::default()
        })
    }
}
