//! vcd_vapp - vApp container and its power state

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use stratus_core::attr::{Attr, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::identity::ImportId;
use stratus_core::model::Model;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::Attributes;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::{import_vdc, observe, owner_id, require, run_task, vdc_attribute};
use crate::api::VcdApi;
use crate::client::VcdConnector;
use crate::wire::{POWERED_ON, PowerAction, VApp};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VAppModel {
    pub vdc: Attr<String>,
    pub name: Attr<String>,
    pub id: Attr<String>,
    pub description: Attr<String>,
    pub power_on: Attr<bool>,
    pub status: Attr<String>,
}

impl Model for VAppModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            vdc: get_attr(attributes, "vdc")?,
            name: get_attr(attributes, "name")?,
            id: get_attr(attributes, "id")?,
            description: get_attr(attributes, "description")?,
            power_on: get_attr(attributes, "power_on")?,
            status: get_attr(attributes, "status")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "vdc", &self.vdc);
        put_attr(&mut attrs, "name", &self.name);
        put_attr(&mut attrs, "id", &self.id);
        put_attr(&mut attrs, "description", &self.description);
        put_attr(&mut attrs, "power_on", &self.power_on);
        put_attr(&mut attrs, "status", &self.status);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.id.as_known().cloned()
    }
}

pub struct VAppKind {
    connector: Arc<VcdConnector>,
}

impl VAppKind {
    pub fn new(connector: Arc<VcdConnector>) -> Self {
        Self { connector }
    }

    async fn power(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        name: &str,
        action: PowerAction,
    ) -> ProviderResult<()> {
        run_task(ctx, &self.connector, client.as_ref(), action.as_str(), || {
            client.power_vapp(vdc, name, action)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceKind for VAppKind {
    type Model = VAppModel;
    type Client = Arc<dyn VcdApi>;
    const TYPE_NAME: &'static str = "vcd_vapp";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("vApp grouping VMs and their networks")
            .attribute(vdc_attribute())
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new("power_on", AttributeType::Bool)
                    .optional_computed()
                    .with_description("Whether the vApp should be running"),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
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
        plan: &VAppModel,
    ) -> ProviderResult<VAppModel> {
        let vdc = self.connector.vdc(&plan.vdc)?;
        let name = require(&plan.name, "name")?;
        let vapp = VApp {
            id: None,
            name: name.to_string(),
            description: plan.description.as_known().cloned(),
            status: None,
        };
        let task = run_task(ctx, &self.connector, client.as_ref(), "composing vApp", || {
            client.create_vapp(&vdc, &vapp)
        })
        .await?;
        let id = owner_id(&task)?;

        if plan.power_on.as_known() == Some(&true) {
            self.power(ctx, client, &vdc, name, PowerAction::PowerOn)
                .await?;
        }
        Ok(VAppModel {
            vdc: Attr::Known(vdc),
            id: Attr::Known(id),
            ..plan.clone()
        })
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &VAppModel,
    ) -> ReadOutcome<VAppModel> {
        let (vdc, name) = match (
            self.connector.vdc(&state.vdc),
            require(&state.name, "name"),
        ) {
            (Ok(vdc), Ok(name)) => (vdc, name),
            (Err(e), _) | (_, Err(e)) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.find_vapp(&vdc, name).await,
            state,
            "reading vApp",
            |vapp| VAppModel {
                vdc: Attr::Known(vdc.clone()),
                name: Attr::Known(vapp.name),
                id: Attr::reported(vapp.id, &state.id),
                description: Attr::from_option(vapp.description),
                power_on: Attr::Known(vapp.status.as_deref() == Some(POWERED_ON)),
                status: Attr::from_option(vapp.status),
            },
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        prior: &VAppModel,
        plan: &VAppModel,
    ) -> ProviderResult<VAppModel> {
        let vdc = self.connector.vdc(&prior.vdc)?;
        let name = require(&prior.name, "name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, name).await?;

        if plan.description != prior.description {
            let vapp = VApp {
                id: prior.id.as_known().cloned(),
                name: name.to_string(),
                description: plan.description.as_known().cloned(),
                status: None,
            };
            run_task(ctx, &self.connector, client.as_ref(), "updating vApp", || {
                client.update_vapp(&vdc, &vapp)
            })
            .await?;
        }

        if let Attr::Known(on) = plan.power_on
            && prior.power_on.as_known() != Some(&on)
        {
            let action = if on {
                PowerAction::PowerOn
            } else {
                PowerAction::PowerOff
            };
            self.power(ctx, client, &vdc, name, action).await?;
        }

        Ok(VAppModel {
            vdc: Attr::Known(vdc.clone()),
            id: prior.id.clone(),
            ..plan.clone()
        })
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &VAppModel,
    ) -> ProviderResult<()> {
        let vdc = self.connector.vdc(&state.vdc)?;
        let name = require(&state.name, "name")?;
        let _guard = self.connector.lock_vapp(ctx, &vdc, name).await?;

        let current = client
            .find_vapp(&vdc, name)
            .await
            .map_err(|e| ProviderError::from(e).context("reading vApp"))?;
        if current.status.as_deref() == Some(POWERED_ON) {
            info!("powering off vApp {} before deletion", name);
            self.power(ctx, client, &vdc, name, PowerAction::PowerOff)
                .await?;
        }
        run_task(ctx, &self.connector, client.as_ref(), "deleting vApp", || {
            client.delete_vapp(&vdc, name)
        })
        .await?;
        Ok(())
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<VAppModel> {
        let id = ImportId::parse(import_id, &["vdc", "name"], 1)?;
        Ok(VAppModel {
            vdc: import_vdc(&id),
            name: Attr::known(id.require("name")?),
            ..Default::default()
        })
    }
}
