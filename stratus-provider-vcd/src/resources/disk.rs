//! vcd_independent_disk - Independent disk, optionally attached to a VM
//!
//! Attaching and detaching change the VM's hardware, so they run under the
//! lock of the VM's vApp. A move between vApps takes the two locks one after
//! the other, never together.

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
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError, types};

use super::{import_vdc, observe, owner_id, require, run_task, vdc_attribute};
use crate::api::VcdApi;
use crate::client::VcdConnector;
use crate::wire::{Disk, VmReference};

pub const BUS_TYPES: &[&str] = &["IDE", "SCSI", "SATA"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskModel {
    pub vdc: Attr<String>,
    pub name: Attr<String>,
    pub id: Attr<String>,
    pub size_mb: Attr<i64>,
    pub bus_type: Attr<String>,
    pub vapp_name: Attr<String>,
    pub vm_name: Attr<String>,
}

impl Model for DiskModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            vdc: get_attr(attributes, "vdc")?,
            name: get_attr(attributes, "name")?,
            id: get_attr(attributes, "id")?,
            size_mb: get_attr(attributes, "size_mb")?,
            bus_type: get_attr(attributes, "bus_type")?,
            vapp_name: get_attr(attributes, "vapp_name")?,
            vm_name: get_attr(attributes, "vm_name")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "vdc", &self.vdc);
        put_attr(&mut attrs, "name", &self.name);
        put_attr(&mut attrs, "id", &self.id);
        put_attr(&mut attrs, "size_mb", &self.size_mb);
        put_attr(&mut attrs, "bus_type", &self.bus_type);
        put_attr(&mut attrs, "vapp_name", &self.vapp_name);
        put_attr(&mut attrs, "vm_name", &self.vm_name);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.id.as_known().cloned()
    }
}

impl DiskModel {
    /// VM the disk should be attached to
    fn attachment(&self) -> ProviderResult<Option<VmReference>> {
        match (&self.vapp_name, &self.vm_name) {
            (Attr::Known(vapp), Attr::Known(vm)) => Ok(Some(VmReference {
                vapp: vapp.clone(),
                vm: vm.clone(),
            })),
            (Attr::Null, Attr::Null) => Ok(None),
            (Attr::Unknown, _) | (_, Attr::Unknown) => Err(ProviderError::validation(
                "'vapp_name' and 'vm_name' must be known",
            )),
            _ => Err(ProviderError::validation(
                "'vapp_name' and 'vm_name' must be set together",
            )),
        }
    }
}

pub struct DiskKind {
    connector: Arc<VcdConnector>,
}

impl DiskKind {
    pub fn new(connector: Arc<VcdConnector>) -> Self {
        Self { connector }
    }

    async fn attach(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        target: &VmReference,
        disk_id: &str,
    ) -> ProviderResult<()> {
        let _guard = self.connector.lock_vapp(ctx, vdc, &target.vapp).await?;
        run_task(ctx, &self.connector, client.as_ref(), "attaching disk", || {
            client.attach_disk(vdc, &target.vapp, &target.vm, disk_id)
        })
        .await?;
        Ok(())
    }

    async fn detach(
        &self,
        ctx: &OperationContext,
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        from: &VmReference,
        disk_id: &str,
    ) -> ProviderResult<()> {
        info!("detaching disk {} from VM {}", disk_id, from.vm);
        let _guard = self.connector.lock_vapp(ctx, vdc, &from.vapp).await?;
        run_task(ctx, &self.connector, client.as_ref(), "detaching disk", || {
            client.detach_disk(vdc, &from.vapp, &from.vm, disk_id)
        })
        .await?;
        Ok(())
    }

    async fn current(
        client: &Arc<dyn VcdApi>,
        vdc: &str,
        model: &DiskModel,
    ) -> Result<Disk, crate::api::VcdApiError> {
        match model.id.as_known() {
            Some(id) => client.get_disk(vdc, id).await,
            None => client.find_disk(vdc, &model.name.known_or_default()).await,
        }
    }
}

#[async_trait]
impl ResourceKind for DiskKind {
    type Model = DiskModel;
    type Client = Arc<dyn VcdApi>;
    const TYPE_NAME: &'static str = "vcd_independent_disk";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Independent disk")
            .attribute(vdc_attribute())
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("size_mb", types::positive_int()).required())
            .attribute(
                AttributeSchema::new(
                    "bus_type",
                    AttributeType::Enum(BUS_TYPES.iter().map(|b| b.to_string()).collect()),
                )
                .optional_computed()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("vapp_name", AttributeType::String)
                    .with_description("vApp of the VM the disk is attached to"),
            )
            .attribute(AttributeSchema::new("vm_name", AttributeType::String))
    }

    fn validate_plan(&self, plan: &DiskModel, prior: Option<&DiskModel>) -> ProviderResult<()> {
        plan.attachment()?;
        if let (Attr::Known(size), Some(Attr::Known(prior_size))) =
            (&plan.size_mb, prior.map(|p| &p.size_mb))
            && size < prior_size
        {
            return Err(ProviderError::validation(format!(
                "disk size cannot shrink from {} MB to {} MB",
                prior_size, size
            )));
        }
        Ok(())
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.api().await
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &DiskModel,
    ) -> ProviderResult<DiskModel> {
        let attachment = plan.attachment()?;
        let vdc = self.connector.vdc(&plan.vdc)?;
        let disk = Disk {
            id: None,
            name: require(&plan.name, "name")?.to_string(),
            size_mb: plan.size_mb.known_or_default(),
            bus_type: plan.bus_type.as_known().cloned(),
            attached_vm: None,
        };
        let task = run_task(ctx, &self.connector, client.as_ref(), "creating disk", || {
            client.create_disk(&vdc, &disk)
        })
        .await?;
        let id = owner_id(&task)?;

        if let Some(target) = attachment {
            self.attach(ctx, client, &vdc, &target, &id).await?;
        }
        Ok(DiskModel {
            vdc: Attr::Known(vdc),
            id: Attr::Known(id),
            ..plan.clone()
        })
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &DiskModel,
    ) -> ReadOutcome<DiskModel> {
        let vdc = match self.connector.vdc(&state.vdc) {
            Ok(vdc) => vdc,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            Self::current(client, &vdc, state).await,
            state,
            "reading disk",
            |disk| {
                let (vapp_name, vm_name) = match disk.attached_vm {
                    Some(vm) => (Attr::Known(vm.vapp), Attr::Known(vm.vm)),
                    None => (Attr::Null, Attr::Null),
                };
                DiskModel {
                    vdc: Attr::Known(vdc.clone()),
                    name: Attr::Known(disk.name),
                    id: Attr::reported(disk.id, &state.id),
                    size_mb: Attr::Known(disk.size_mb),
                    bus_type: Attr::reported(disk.bus_type, &state.bus_type),
                    vapp_name,
                    vm_name,
                }
            },
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        prior: &DiskModel,
        plan: &DiskModel,
    ) -> ProviderResult<DiskModel> {
        let wanted = plan.attachment()?;
        let vdc = self.connector.vdc(&prior.vdc)?;
        let id = require(&prior.id, "id")?;

        let size = plan.size_mb.known_or_default();
        let prior_size = prior.size_mb.known_or_default();

        let attached = prior.attachment().unwrap_or(None);
        if attached != wanted
            && let Some(from) = &attached
        {
            self.detach(ctx, client, &vdc, from, id).await?;
        }
        if size > prior_size {
            run_task(ctx, &self.connector, client.as_ref(), "resizing disk", || {
                client.resize_disk(&vdc, id, size)
            })
            .await?;
        }
        if attached != wanted
            && let Some(to) = &wanted
        {
            self.attach(ctx, client, &vdc, to, id).await?;
        }

        Ok(DiskModel {
            vdc: Attr::Known(vdc.clone()),
            id: prior.id.clone(),
            ..plan.clone()
        })
    }

    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &DiskModel,
    ) -> ProviderResult<()> {
        let vdc = self.connector.vdc(&state.vdc)?;
        let disk = Self::current(client, &vdc, state)
            .await
            .map_err(|e| ProviderError::from(e).context("reading disk"))?;
        let id = disk
            .id
            .clone()
            .ok_or_else(|| ProviderError::internal("disk without an id"))?;

        // Attached out of band too
        if let Some(from) = &disk.attached_vm {
            self.detach(ctx, client, &vdc, from, &id).await?;
        }
        run_task(ctx, &self.connector, client.as_ref(), "deleting disk", || {
            client.delete_disk(&vdc, &id)
        })
        .await?;
        Ok(())
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<DiskModel> {
        let id = ImportId::parse(import_id, &["vdc", "name"], 1)?;
        Ok(DiskModel {
            vdc: import_vdc(&id),
            name: Attr::known(id.require("name")?),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeVcd, VDC, ctx, provider_with};
    use crate::provider::VcdProvider;
    use crate::wire::Vm;
    use stratus_core::provider::Provider;
    use stratus_core::resource::{Resource, ResourceId, Value};

    async fn setup() -> (Arc<FakeVcd>, VcdProvider) {
        let fake = Arc::new(FakeVcd::new());
        fake.add_vapp(VDC, "web");
        fake.add_vapp(VDC, "db");
        for (vapp, vm) in [("web", "app"), ("db", "pg")] {
            let vm = Vm {
                name: vm.to_string(),
                memory_mb: 1024,
                cpus: 1,
                ..Default::default()
            };
            fake.create_vm(VDC, vapp, &vm).await.unwrap();
        }
        let provider = provider_with(fake.clone());
        (fake, provider)
    }

    fn resource(size: i64) -> Resource {
        Resource::new("vcd_independent_disk", "data")
            .with_attribute("name", "data")
            .with_attribute("size_mb", size)
    }

    fn attached_to(resource: Resource, vapp: &str, vm: &str) -> Resource {
        resource
            .with_attribute("vapp_name", vapp)
            .with_attribute("vm_name", vm)
    }

    fn remote(fake: &FakeVcd, state: &stratus_core::resource::State) -> Disk {
        fake.disk(VDC, state.identifier.as_deref().unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn create_attached_with_remote_bus_type() {
        let (fake, provider) = setup().await;
        let state = provider
            .create(&ctx(), &attached_to(resource(10240), "web", "app"))
            .await
            .unwrap();

        assert_eq!(state.attributes.get("bus_type"), Some(&Value::from("SCSI")));
        assert_eq!(state.attributes.get("vm_name"), Some(&Value::from("app")));
        let disk = remote(&fake, &state);
        assert_eq!(disk.attached_vm.unwrap().vapp, "web");
    }

    #[tokio::test(start_paused = true)]
    async fn half_an_attachment_is_rejected_before_any_call() {
        let (fake, provider) = setup().await;
        let calls = fake.total_calls();
        let err = provider
            .create(&ctx(), &resource(1024).with_attribute("vm_name", "app"))
            .await
            .unwrap_err();
        assert!(err.message.contains("must be set together"));
        assert_eq!(fake.total_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn grow_but_never_shrink() {
        let (fake, provider) = setup().await;
        let state = provider.create(&ctx(), &resource(1024)).await.unwrap();

        let grown = provider
            .update(&ctx(), &state, &resource(2048))
            .await
            .unwrap();
        assert_eq!(remote(&fake, &grown).size_mb, 2048);

        let writes = fake.writes();
        let err = provider
            .update(&ctx(), &grown, &resource(512))
            .await
            .unwrap_err();
        assert!(err.message.contains("cannot shrink"));
        assert_eq!(fake.writes(), writes);
    }

    #[tokio::test]
    async fn shrink_is_rejected_without_a_session() {
        let config = stratus_core::config::ProviderConfig {
            vcd: Some(stratus_core::config::VcdEndpoint {
                url: "http://127.0.0.1:9/api".to_string(),
                org: "acme".to_string(),
                user: "admin".to_string(),
                password: "secret".to_string(),
                vdc: Some(VDC.to_string()),
                allow_unverified_ssl: false,
            }),
            ..Default::default()
        };
        let provider = VcdProvider::new(&config);
        let prior = stratus_core::resource::State::existing(
            ResourceId::new("vcd_independent_disk", "data"),
            [
                ("vdc".to_string(), Value::from(VDC)),
                ("name".to_string(), Value::from("data")),
                ("id".to_string(), Value::from("disk-1")),
                ("size_mb".to_string(), Value::Int(2048)),
            ]
            .into_iter()
            .collect(),
        )
        .with_identifier("disk-1");

        let err = provider
            .update(&ctx(), &prior, &resource(1024))
            .await
            .unwrap_err();
        assert_eq!(err.kind, stratus_core::provider::ErrorKind::Validation);
        assert!(err.message.contains("cannot shrink"));
    }

    #[tokio::test(start_paused = true)]
    async fn move_between_vapps() {
        let (fake, provider) = setup().await;
        let state = provider
            .create(&ctx(), &attached_to(resource(1024), "web", "app"))
            .await
            .unwrap();

        let moved = provider
            .update(&ctx(), &state, &attached_to(resource(1024), "db", "pg"))
            .await
            .unwrap();
        assert_eq!(moved.attributes.get("vapp_name"), Some(&Value::from("db")));
        assert_eq!(remote(&fake, &moved).attached_vm.unwrap().vm, "pg");
        assert_eq!(fake.calls("detach_disk"), 1);

        let detached = provider.update(&ctx(), &moved, &resource(1024)).await.unwrap();
        assert!(remote(&fake, &detached).attached_vm.is_none());
        assert_eq!(detached.attributes.get("vm_name"), Some(&Value::Null));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_detaches_first() {
        let (fake, provider) = setup().await;
        let state = provider
            .create(&ctx(), &attached_to(resource(1024), "web", "app"))
            .await
            .unwrap();
        let id = state.identifier.clone().unwrap();

        provider.delete(&ctx(), &state).await.unwrap();
        assert!(fake.disk(VDC, &id).is_none());
        assert_eq!(fake.calls("detach_disk"), 1);
        provider.delete(&ctx(), &state).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn import_by_name() {
        let (_fake, provider) = setup().await;
        let state = provider
            .create(&ctx(), &resource(4096))
            .await
            .unwrap();

        let rid = ResourceId::new("vcd_independent_disk", "data");
        let imported = provider.import(&ctx(), &rid, "prod.data").await.unwrap();
        assert_eq!(imported.identifier, state.identifier);
        assert_eq!(imported.attributes.get("size_mb"), Some(&Value::Int(4096)));
    }
}
