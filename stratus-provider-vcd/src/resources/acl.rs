//! vcd_vapp_access_control - Sharing settings of a vApp
//!
//! A vApp is shared either with everyone in the org or with a list of users,
//! never both. Deleting the resource makes the vApp private again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use stratus_core::attr::{Attr, AttrValue, field, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::identity::ImportId;
use stratus_core::model::{Model, Translate, stable_order};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::{Attributes, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError, types};

use super::{import_vdc, observe, require, vapp_name_attribute, vdc_attribute};
use crate::api::VcdApi;
use crate::client::VcdConnector;
use crate::wire::{AccessSetting, ControlAccess};

pub const ACCESS_LEVELS: &[&str] = &["ReadOnly", "Change", "FullControl"];

fn access_level_type() -> AttributeType {
    AttributeType::Enum(ACCESS_LEVELS.iter().map(|l| l.to_string()).collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SharedWithBlock {
    pub user_id: Attr<String>,
    pub access_level: Attr<String>,
}

impl AttrValue for SharedWithBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "user_id", &self.user_id);
        put_attr(&mut map, "access_level", &self.access_level);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let Value::Map(map) = value else {
            return Err(TypeError::mismatch("SharedWith", value));
        };
        Ok(Self {
            user_id: field(map, "user_id")?,
            access_level: field(map, "access_level")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessControlModel {
    pub vdc: Attr<String>,
    pub vapp_name: Attr<String>,
    pub shared_with_everyone: Attr<bool>,
    pub everyone_access_level: Attr<String>,
    pub shared_with: Attr<Vec<SharedWithBlock>>,
}

impl Model for AccessControlModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            vdc: get_attr(attributes, "vdc")?,
            vapp_name: get_attr(attributes, "vapp_name")?,
            shared_with_everyone: get_attr(attributes, "shared_with_everyone")?,
            everyone_access_level: get_attr(attributes, "everyone_access_level")?,
            shared_with: get_attr(attributes, "shared_with")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "vdc", &self.vdc);
        put_attr(&mut attrs, "vapp_name", &self.vapp_name);
        put_attr(&mut attrs, "shared_with_everyone", &self.shared_with_everyone);
        put_attr(&mut attrs, "everyone_access_level", &self.everyone_access_level);
        put_attr(&mut attrs, "shared_with", &self.shared_with);
        attrs
    }

    /// `vdc.vapp`, the same form the import id takes
    fn identity(&self) -> Option<String> {
        match (&self.vdc, &self.vapp_name) {
            (Attr::Known(vdc), Attr::Known(vapp)) => Some(format!("{}.{}", vdc, vapp)),
            _ => None,
        }
    }
}

impl Translate for AccessControlModel {
    type Wire = ControlAccess;

    fn to_remote(&self) -> ControlAccess {
        let everyone = self.shared_with_everyone.as_known() == Some(&true);
        let settings = self
            .shared_with
            .as_known()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        Some(AccessSetting {
                            subject: entry.user_id.as_known()?.clone(),
                            access_level: entry.access_level.as_known()?.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        ControlAccess {
            is_shared_to_everyone: everyone,
            everyone_access_level: everyone
                .then(|| self.everyone_access_level.as_known().cloned())
                .flatten(),
            access_settings: settings,
        }
    }

    fn from_remote(wire: &ControlAccess, prior: &Self) -> Self {
        let entries: Vec<SharedWithBlock> = wire
            .access_settings
            .iter()
            .map(|setting| SharedWithBlock {
                user_id: Attr::known(setting.subject.clone()),
                access_level: Attr::known(setting.access_level.clone()),
            })
            .collect();
        let shared_with = match &prior.shared_with {
            Attr::Known(prior_entries) => Attr::Known(stable_order(entries, prior_entries)),
            _ if entries.is_empty() => Attr::Null,
            _ => Attr::Known(entries),
        };
        Self {
            vdc: prior.vdc.clone(),
            vapp_name: prior.vapp_name.clone(),
            shared_with_everyone: Attr::Known(wire.is_shared_to_everyone),
            everyone_access_level: Attr::from_option(wire.everyone_access_level.clone()),
            shared_with,
        }
    }
}

fn check_sharing(model: &AccessControlModel) -> ProviderResult<()> {
    if model.shared_with_everyone.as_known() == Some(&true) && model.everyone_access_level.is_null()
    {
        return Err(ProviderError::validation(
            "'everyone_access_level' is required when 'shared_with_everyone' is true",
        ));
    }
    Ok(())
}

pub struct AccessControlKind {
    connector: Arc<VcdConnector>,
}

impl AccessControlKind {
    pub fn new(connector: Arc<VcdConnector>) -> Self {
        Self { connector }
    }

    async fn write(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        vapp: &str,
        access: &ControlAccess,
    ) -> ProviderResult<()> {
        let _guard = self.connector.lock_vapp(ctx, vdc, vapp).await?;
        ctx.run(client.put_vapp_access(vdc, vapp, access))
            .await?
            .map_err(|e| ProviderError::from(e).context("writing vApp sharing"))
    }
}

#[async_trait]
impl ResourceKind for AccessControlKind {
    type Model = AccessControlModel;
    type Client = Arc<dyn VcdApi>;
    const TYPE_NAME: &'static str = "vcd_vapp_access_control";

    fn schema(&self) -> ResourceSchema {
        let entry = AttributeType::Object(vec![
            AttributeSchema::new("user_id", types::uuid_ref()).required(),
            AttributeSchema::new("access_level", access_level_type()).required(),
        ]);
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Sharing settings of a vApp")
            .attribute(vdc_attribute())
            .attribute(vapp_name_attribute())
            .attribute(
                AttributeSchema::new("shared_with_everyone", AttributeType::Bool)
                    .optional_computed(),
            )
            .attribute(AttributeSchema::new(
                "everyone_access_level",
                access_level_type(),
            ))
            .attribute(AttributeSchema::new(
                "shared_with",
                AttributeType::Set(Box::new(entry)),
            ))
            .conflicting(&["shared_with_everyone", "shared_with"])
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.api().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &AccessControlModel,
    ) -> ProviderResult<AccessControlModel> {
        check_sharing(plan)?;
        let vdc = self.connector.vdc(&plan.vdc)?;
        let vapp = require(&plan.vapp_name, "vapp_name")?;
        self.write(ctx, client, &vdc, vapp, &plan.to_remote()).await?;
        Ok(AccessControlModel {
            vdc: Attr::Known(vdc.clone()),
            ..plan.clone()
        })
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &AccessControlModel,
    ) -> ReadOutcome<AccessControlModel> {
        let (vdc, vapp) = match (
            self.connector.vdc(&state.vdc),
            require(&state.vapp_name, "vapp_name"),
        ) {
            (Ok(vdc), Ok(vapp)) => (vdc, vapp),
            (Err(e), _) | (_, Err(e)) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.get_vapp_access(&vdc, vapp).await,
            state,
            "reading vApp sharing",
            |access| AccessControlModel {
                vdc: Attr::Known(vdc.clone()),
                ..AccessControlModel::from_remote(&access, state)
            },
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        prior: &AccessControlModel,
        plan: &AccessControlModel,
    ) -> ProviderResult<AccessControlModel> {
        check_sharing(plan)?;
        let vdc = self.connector.vdc(&prior.vdc)?;
        let vapp = require(&prior.vapp_name, "vapp_name")?;
        self.write(ctx, client, &vdc, vapp, &plan.to_remote()).await?;
        Ok(AccessControlModel {
            vdc: Attr::Known(vdc.clone()),
            ..plan.clone()
        })
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &AccessControlModel,
    ) -> ProviderResult<()> {
        let vdc = self.connector.vdc(&state.vdc)?;
        let vapp = require(&state.vapp_name, "vapp_name")?;
        info!("removing sharing of vApp {}", vapp);
        self.write(ctx, client, &vdc, vapp, &ControlAccess::default())
            .await
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<AccessControlModel> {
        let id = ImportId::parse(import_id, &["vdc", "vapp"], 1)?;
        Ok(AccessControlModel {
            vdc: import_vdc(&id),
            vapp_name: Attr::known(id.require("vapp")?),
            ..Default::default()
        })
    }
}
