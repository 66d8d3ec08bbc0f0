//! vcd_vapp_org_network - Org network attached to a vApp
//!
//! The vApp's network section is written as a whole, so every change is a
//! read-modify-write under the vApp lock.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use stratus_core::attr::{Attr, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::identity::ImportId;
use stratus_core::model::Model;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::Attributes;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::{import_vdc, require, run_task, vapp_name_attribute, vdc_attribute};
use crate::api::VcdApi;
use crate::client::VcdConnector;
use crate::wire::VAppNetwork;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VAppNetworkModel {
    pub vdc: Attr<String>,
    pub vapp_name: Attr<String>,
    pub org_network_name: Attr<String>,
    pub id: Attr<String>,
    pub is_fenced: Attr<bool>,
    pub retain_ip_mac_resources: Attr<bool>,
}

impl Model for VAppNetworkModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            vdc: get_attr(attributes, "vdc")?,
            vapp_name: get_attr(attributes, "vapp_name")?,
            org_network_name: get_attr(attributes, "org_network_name")?,
            id: get_attr(attributes, "id")?,
            is_fenced: get_attr(attributes, "is_fenced")?,
            retain_ip_mac_resources: get_attr(attributes, "retain_ip_mac_resources")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "vdc", &self.vdc);
        put_attr(&mut attrs, "vapp_name", &self.vapp_name);
        put_attr(&mut attrs, "org_network_name", &self.org_network_name);
        put_attr(&mut attrs, "id", &self.id);
        put_attr(&mut attrs, "is_fenced", &self.is_fenced);
        put_attr(&mut attrs, "retain_ip_mac_resources", &self.retain_ip_mac_resources);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.id.as_known().cloned()
    }
}

impl VAppNetworkModel {
    fn apply_to(&self, network: &mut VAppNetwork) {
        if let Attr::Known(fenced) = self.is_fenced {
            network.is_fenced = fenced;
        }
        if let Attr::Known(retain) = self.retain_ip_mac_resources {
            network.retain_net_info_across_deployments = retain;
        }
    }
}

pub struct VAppNetworkKind {
    connector: Arc<VcdConnector>,
}

impl VAppNetworkKind {
    pub fn new(connector: Arc<VcdConnector>) -> Self {
        Self { connector }
    }

    /// Replace the vApp's network section
    async fn write(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        vapp: &str,
        networks: Vec<VAppNetwork>,
    ) -> ProviderResult<()> {
        debug!("writing {} networks of vApp {}", networks.len(), vapp);
        run_task(
            ctx,
            &self.connector,
            client.as_ref(),
            "updating vApp networks",
            || client.put_vapp_networks(vdc, vapp, &networks),
        )
        .await?;
        Ok(())
    }

    async fn networks(
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        vapp: &str,
    ) -> ProviderResult<Vec<VAppNetwork>> {
        client
            .list_vapp_networks(vdc, vapp)
            .await
            .map_err(|e| ProviderError::from(e).context("reading vApp networks"))
    }
}

#[async_trait]
impl ResourceKind for VAppNetworkKind {
    type Model = VAppNetworkModel;
    type Client = Arc<dyn VcdApi>;
    const TYPE_NAME: &'static str = "vcd_vapp_org_network";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Org network attached to a vApp")
            .attribute(vdc_attribute())
            .attribute(vapp_name_attribute())
            .attribute(
                AttributeSchema::new("org_network_name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("is_fenced", AttributeType::Bool).optional_computed())
            .attribute(
                AttributeSchema::new("retain_ip_mac_resources", AttributeType::Bool)
                    .optional_computed(),
            )
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.api().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &VAppNetworkModel,
    ) -> ProviderResult<VAppNetworkModel> {
        let vdc = self.connector.vdc(&plan.vdc)?;
        let vapp = require(&plan.vapp_name, "vapp_name")?;
        let name = require(&plan.org_network_name, "org_network_name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, vapp).await?;

        let mut networks = Self::networks(client, &vdc, vapp).await?;
        if networks.iter().any(|n| n.network_name == name) {
            return Err(ProviderError::validation(format!(
                "network {} is already attached to vApp {}",
                name, vapp
            )));
        }
        let mut network = VAppNetwork {
            network_name: name.to_string(),
            parent_network: Some(name.to_string()),
            ..Default::default()
        };
        plan.apply_to(&mut network);
        networks.push(network);
        self.write(ctx, client, &vdc, vapp, networks).await?;

        Ok(VAppNetworkModel {
            vdc: Attr::Known(vdc.clone()),
            ..plan.clone()
        })
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &VAppNetworkModel,
    ) -> ReadOutcome<VAppNetworkModel> {
        let lookup = self.connector.vdc(&state.vdc).and_then(|vdc| {
            let vapp = require(&state.vapp_name, "vapp_name")?;
            let name = require(&state.org_network_name, "org_network_name")?;
            Ok((vdc, vapp, name))
        });
        let (vdc, vapp, name) = match lookup {
            Ok(found) => found,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        let attached = match client.list_vapp_networks(&vdc, vapp).await {
            Ok(networks) => networks.into_iter().find(|n| n.network_name == name),
            Err(e) => {
                return ReadOutcome::from_error(
                    state,
                    ProviderError::from(e).context("reading vApp networks"),
                );
            }
        };
        match attached {
            Some(network) => ReadOutcome::Found(VAppNetworkModel {
                vdc: Attr::Known(vdc),
                vapp_name: state.vapp_name.clone(),
                org_network_name: Attr::Known(network.network_name),
                id: Attr::reported(network.id, &state.id),
                is_fenced: Attr::Known(network.is_fenced),
                retain_ip_mac_resources: Attr::Known(network.retain_net_info_across_deployments),
            }),
            None => ReadOutcome::NotFound,
        }
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        prior: &VAppNetworkModel,
        plan: &VAppNetworkModel,
    ) -> ProviderResult<VAppNetworkModel> {
        let vdc = self.connector.vdc(&prior.vdc)?;
        let vapp = require(&prior.vapp_name, "vapp_name")?;
        let name = require(&prior.org_network_name, "org_network_name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, vapp).await?;

        let mut networks = Self::networks(client, &vdc, vapp).await?;
        let network = networks
            .iter_mut()
            .find(|n| n.network_name == name)
            .ok_or_else(|| {
                ProviderError::not_found(format!("network {} is not attached to {}", name, vapp))
            })?;
        plan.apply_to(network);
        self.write(ctx, client, &vdc, vapp, networks).await?;

        Ok(VAppNetworkModel {
            vdc: Attr::Known(vdc.clone()),
            id: prior.id.clone(),
            ..plan.clone()
        })
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &VAppNetworkModel,
    ) -> ProviderResult<()> {
        let vdc = self.connector.vdc(&state.vdc)?;
        let vapp = require(&state.vapp_name, "vapp_name")?;
        let name = require(&state.org_network_name, "org_network_name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, vapp).await?;

        let networks = Self::networks(client, &vdc, vapp).await?;
        let remaining: Vec<VAppNetwork> = networks
            .iter()
            .filter(|n| n.network_name != name)
            .cloned()
            .collect();
        if remaining.len() == networks.len() {
            return Err(ProviderError::not_found(format!(
                "network {} is not attached to {}",
                name, vapp
            )));
        }
        self.write(ctx, client, &vdc, vapp, remaining).await
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<VAppNetworkModel> {
        let id = ImportId::parse(import_id, &["vdc", "vapp", "network"], 1)?;
        Ok(VAppNetworkModel {
            vdc: import_vdc(&id),
            vapp_name: Attr::known(id.require("vapp")?),
            org_network_name: Attr::known(id.require("network")?),
            ..Default::default()
        })
    }
}
