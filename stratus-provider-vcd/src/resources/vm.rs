//! vcd_vapp_vm - Virtual machine inside a vApp
//!
//! NICs are an ordered list: a NIC's position is its connection index on the
//! remote, and the primary NIC is sent as an index into that list.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use stratus_core::attr::{Attr, AttrValue, field, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::diagnostics::Diagnostics;
use stratus_core::identity::ImportId;
use stratus_core::model::{Model, Translate};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::{Attributes, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError, types};

use super::{import_vdc, observe, owner_id, require, run_task, vapp_name_attribute, vdc_attribute};
use crate::api::VcdApi;
use crate::client::VcdConnector;
use crate::wire::{NetworkConnection, NetworkConnectionSection, POWERED_ON, PowerAction, Vm};

pub const ALLOCATION_MODES: &[&str] = &["POOL", "DHCP", "MANUAL", "NONE"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NicBlock {
    pub name: Attr<String>,
    pub ip_allocation_mode: Attr<String>,
    pub ip: Attr<String>,
    pub is_primary: Attr<bool>,
    pub connected: Attr<bool>,
    pub mac: Attr<String>,
    pub adapter_type: Attr<String>,
}

impl AttrValue for NicBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "name", &self.name);
        put_attr(&mut map, "ip_allocation_mode", &self.ip_allocation_mode);
        put_attr(&mut map, "ip", &self.ip);
        put_attr(&mut map, "is_primary", &self.is_primary);
        put_attr(&mut map, "connected", &self.connected);
        put_attr(&mut map, "mac", &self.mac);
        put_attr(&mut map, "adapter_type", &self.adapter_type);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let Value::Map(map) = value else {
            return Err(TypeError::mismatch("Network", value));
        };
        Ok(Self {
            name: field(map, "name")?,
            ip_allocation_mode: field(map, "ip_allocation_mode")?,
            ip: field(map, "ip")?,
            is_primary: field(map, "is_primary")?,
            connected: field(map, "connected")?,
            mac: field(map, "mac")?,
            adapter_type: field(map, "adapter_type")?,
        })
    }
}

impl NicBlock {
    fn to_connection(&self, index: i64) -> NetworkConnection {
        NetworkConnection {
            network_connection_index: index,
            network: self.name.known_or_default(),
            ip_address_allocation_mode: self.ip_allocation_mode.known_or_default(),
            ip_address: self.ip.as_known().cloned(),
            mac_address: self.mac.as_known().cloned(),
            is_connected: self.connected.as_known().copied().unwrap_or(true),
            network_adapter_type: self.adapter_type.as_known().cloned(),
        }
    }

    fn from_connection(nic: &NetworkConnection, primary: bool, prior: Option<&NicBlock>) -> Self {
        let prior = prior.cloned().unwrap_or_default();
        Self {
            name: Attr::known(nic.network.clone()),
            ip_allocation_mode: Attr::known(nic.ip_address_allocation_mode.clone()),
            ip: Attr::reported(nic.ip_address.clone(), &prior.ip),
            is_primary: Attr::Known(primary),
            connected: Attr::Known(nic.is_connected),
            mac: Attr::from_option(nic.mac_address.clone()),
            adapter_type: Attr::reported(nic.network_adapter_type.clone(), &prior.adapter_type),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmModel {
    pub vdc: Attr<String>,
    pub vapp_name: Attr<String>,
    pub name: Attr<String>,
    pub id: Attr<String>,
    pub computer_name: Attr<String>,
    pub memory: Attr<i64>,
    pub cpus: Attr<i64>,
    pub power_on: Attr<bool>,
    pub status: Attr<String>,
    pub network: Attr<Vec<NicBlock>>,
}

impl Model for VmModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            vdc: get_attr(attributes, "vdc")?,
            vapp_name: get_attr(attributes, "vapp_name")?,
            name: get_attr(attributes, "name")?,
            id: get_attr(attributes, "id")?,
            computer_name: get_attr(attributes, "computer_name")?,
            memory: get_attr(attributes, "memory")?,
            cpus: get_attr(attributes, "cpus")?,
            power_on: get_attr(attributes, "power_on")?,
            status: get_attr(attributes, "status")?,
            network: get_attr(attributes, "network")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "vdc", &self.vdc);
        put_attr(&mut attrs, "vapp_name", &self.vapp_name);
        put_attr(&mut attrs, "name", &self.name);
        put_attr(&mut attrs, "id", &self.id);
        put_attr(&mut attrs, "computer_name", &self.computer_name);
        put_attr(&mut attrs, "memory", &self.memory);
        put_attr(&mut attrs, "cpus", &self.cpus);
        put_attr(&mut attrs, "power_on", &self.power_on);
        put_attr(&mut attrs, "status", &self.status);
        put_attr(&mut attrs, "network", &self.network);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.id.as_known().cloned()
    }
}

impl Translate for VmModel {
    type Wire = Vm;

    fn to_remote(&self) -> Vm {
        let nics = self.network.as_known().map(Vec::as_slice).unwrap_or_default();
        let primary = nics
            .iter()
            .position(|nic| nic.is_primary.as_known() == Some(&true))
            .unwrap_or(0);
        Vm {
            id: self.id.as_known().cloned(),
            name: self.name.known_or_default(),
            computer_name: self.computer_name.as_known().cloned(),
            memory_mb: self.memory.known_or_default(),
            cpus: self.cpus.known_or_default(),
            status: None,
            network_connection_section: NetworkConnectionSection {
                primary_network_connection_index: (!nics.is_empty()).then_some(primary as i64),
                network_connection: nics
                    .iter()
                    .enumerate()
                    .map(|(index, nic)| nic.to_connection(index as i64))
                    .collect(),
            },
        }
    }

    fn from_remote(wire: &Vm, prior: &Self) -> Self {
        let section = &wire.network_connection_section;
        let mut connections: Vec<&NetworkConnection> = section.network_connection.iter().collect();
        connections.sort_by_key(|nic| nic.network_connection_index);
        let prior_nics = prior.network.as_known().map(Vec::as_slice).unwrap_or_default();
        let nics: Vec<NicBlock> = connections
            .iter()
            .enumerate()
            .map(|(position, nic)| {
                let primary =
                    section.primary_network_connection_index == Some(nic.network_connection_index);
                NicBlock::from_connection(nic, primary, prior_nics.get(position))
            })
            .collect();
        let network = if nics.is_empty() && !prior.network.is_known() {
            Attr::Null
        } else {
            Attr::Known(nics)
        };
        Self {
            vdc: prior.vdc.clone(),
            vapp_name: prior.vapp_name.clone(),
            name: Attr::known(wire.name.clone()),
            id: Attr::reported(wire.id.clone(), &prior.id),
            computer_name: Attr::reported(wire.computer_name.clone(), &prior.computer_name),
            memory: Attr::Known(wire.memory_mb),
            cpus: Attr::Known(wire.cpus),
            power_on: Attr::Known(wire.status.as_deref() == Some(POWERED_ON)),
            status: Attr::from_option(wire.status.clone()),
            network,
        }
    }
}

/// NIC rules the schema cannot express
fn check_network(model: &VmModel) -> ProviderResult<()> {
    let Some(nics) = model.network.as_known() else {
        return Ok(());
    };
    let primaries = nics
        .iter()
        .filter(|nic| nic.is_primary.as_known() == Some(&true))
        .count();
    if primaries > 1 {
        return Err(ProviderError::validation(format!(
            "only one network may be primary, {} are",
            primaries
        )));
    }
    for (index, nic) in nics.iter().enumerate() {
        if nic.ip_allocation_mode.as_known().map(String::as_str) == Some("MANUAL") && nic.ip.is_null()
        {
            return Err(ProviderError::validation(format!(
                "network[{}]: 'ip' is required when ip_allocation_mode is MANUAL",
                index
            )));
        }
    }
    Ok(())
}

pub struct VmKind {
    connector: Arc<VcdConnector>,
}

impl VmKind {
    pub fn new(connector: Arc<VcdConnector>) -> Self {
        Self { connector }
    }

    async fn power(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        vapp: &str,
        name: &str,
        action: PowerAction,
    ) -> ProviderResult<()> {
        run_task(ctx, &self.connector, client.as_ref(), action.as_str(), || {
            client.power_vm(vdc, vapp, name, action)
        })
        .await?;
        Ok(())
    }

    async fn current(
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        vapp: &str,
        name: &str,
    ) -> ProviderResult<Vm> {
        client
            .find_vm(vdc, vapp, name)
            .await
            .map_err(|e| ProviderError::from(e).context("reading VM"))
    }
}

#[async_trait]
impl ResourceKind for VmKind {
    type Model = VmModel;
    type Client = Arc<dyn VcdApi>;
    const TYPE_NAME: &'static str = "vcd_vapp_vm";

    fn schema(&self) -> ResourceSchema {
        let nic = AttributeType::Object(vec![
            AttributeSchema::new("name", AttributeType::String).required(),
            AttributeSchema::new(
                "ip_allocation_mode",
                AttributeType::Enum(ALLOCATION_MODES.iter().map(|m| m.to_string()).collect()),
            )
            .required(),
            AttributeSchema::new("ip", types::ipv4()).optional_computed(),
            AttributeSchema::new("is_primary", AttributeType::Bool).optional_computed(),
            AttributeSchema::new("connected", AttributeType::Bool).optional_computed(),
            AttributeSchema::new("mac", AttributeType::String).computed(),
            AttributeSchema::new("adapter_type", AttributeType::String).optional_computed(),
        ]);
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Virtual machine in a vApp")
            .attribute(vdc_attribute())
            .attribute(vapp_name_attribute())
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("computer_name", AttributeType::String).optional_computed(),
            )
            .attribute(
                AttributeSchema::new("memory", types::positive_int())
                    .required()
                    .with_description("Memory in MB"),
            )
            .attribute(AttributeSchema::new("cpus", types::positive_int()).required())
            .attribute(AttributeSchema::new("power_on", AttributeType::Bool).optional_computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new(
                "network",
                AttributeType::List(Box::new(nic)),
            ))
    }

    fn validate_plan(&self, plan: &VmModel, _prior: Option<&VmModel>) -> ProviderResult<()> {
        check_network(plan)
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.api().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &VmModel,
    ) -> ProviderResult<VmModel> {
        let vdc = self.connector.vdc(&plan.vdc)?;
        let vapp = require(&plan.vapp_name, "vapp_name")?;
        let name = require(&plan.name, "name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, vapp).await?;

        let vm = plan.to_remote();
        let task = run_task(ctx, &self.connector, client.as_ref(), "creating VM", || {
            client.create_vm(&vdc, vapp, &vm)
        })
        .await?;
        let id = owner_id(&task)?;

        if plan.power_on.as_known() == Some(&true) {
            self.power(ctx, client, &vdc, vapp, name, PowerAction::PowerOn)
                .await?;
        }
        Ok(VmModel {
            vdc: Attr::Known(vdc.clone()),
            id: Attr::Known(id),
            ..plan.clone()
        })
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &VmModel,
    ) -> ReadOutcome<VmModel> {
        let lookup = self.connector.vdc(&state.vdc).and_then(|vdc| {
            let vapp = require(&state.vapp_name, "vapp_name")?;
            let name = require(&state.name, "name")?;
            Ok((vdc, vapp, name))
        });
        let (vdc, vapp, name) = match lookup {
            Ok(found) => found,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.find_vm(&vdc, vapp, name).await,
            state,
            "reading VM",
            |vm| VmModel {
                vdc: Attr::Known(vdc.clone()),
                ..VmModel::from_remote(&vm, state)
            },
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        prior: &VmModel,
        plan: &VmModel,
    ) -> ProviderResult<VmModel> {
        let vdc = self.connector.vdc(&prior.vdc)?;
        let vapp = require(&prior.vapp_name, "vapp_name")?;
        let name = require(&prior.name, "name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, vapp).await?;

        let current = Self::current(client, &vdc, vapp, name).await?;
        let desired = VmModel {
            id: prior.id.clone(),
            ..plan.clone()
        }
        .to_remote();
        let was_on = current.status.as_deref() == Some(POWERED_ON);
        let hardware_changed =
            current.cpus != desired.cpus || current.memory_mb != desired.memory_mb;

        let mut running = was_on;
        if hardware_changed && was_on {
            info!("powering off VM {} to change CPU or memory", name);
            self.power(ctx, client, &vdc, vapp, name, PowerAction::PowerOff)
                .await?;
            running = false;
        }

        // Power is restored even when the reconfiguration fails
        let mut diagnostics = Diagnostics::new();
        diagnostics.collect(
            run_task(ctx, &self.connector, client.as_ref(), "updating VM", || {
                client.update_vm(&vdc, vapp, &desired)
            })
            .await,
        );
        let want_on = plan.power_on.as_known().copied().unwrap_or(was_on);
        if want_on != running {
            let action = if want_on {
                PowerAction::PowerOn
            } else {
                PowerAction::PowerOff
            };
            diagnostics.collect(self.power(ctx, client, &vdc, vapp, name, action).await);
        }
        diagnostics.into_result()?;

        Ok(VmModel {
            vdc: Attr::Known(vdc.clone()),
            id: prior.id.clone(),
            ..plan.clone()
        })
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &VmModel,
    ) -> ProviderResult<()> {
        let vdc = self.connector.vdc(&state.vdc)?;
        let vapp = require(&state.vapp_name, "vapp_name")?;
        let name = require(&state.name, "name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, vapp).await?;

        let current = Self::current(client, &vdc, vapp, name).await?;
        if current.status.as_deref() == Some(POWERED_ON) {
            warn!("VM {} is running, powering off before deletion", name);
            self.power(ctx, client, &vdc, vapp, name, PowerAction::PowerOff)
                .await?;
        }
        run_task(ctx, &self.connector, client.as_ref(), "deleting VM", || {
            client.delete_vm(&vdc, vapp, name)
        })
        .await?;
        Ok(())
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<VmModel> {
        let id = ImportId::parse(import_id, &["vdc", "vapp", "name"], 1)?;
        Ok(VmModel {
            vdc: import_vdc(&id),
            vapp_name: Attr::known(id.require("vapp")?),
            name: Attr::known(id.require("name")?),
            ..Default::default()
        })
    }
}
