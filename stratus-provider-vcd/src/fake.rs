//! In-memory control plane for tests
//!
//! Mutations apply immediately and return a task that stays `running` for a
//! configurable number of polls. The fake enforces the remote's own rules
//! (powered-on objects cannot be deleted, attached disks cannot be removed)
//! so tests catch a missing power-off or detach.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use stratus_core::context::{OperationContext, Verb};

use crate::api::{VcdApi, VcdApiError, VcdResult};
use crate::client::VcdConnector;
use crate::provider::VcdProvider;
use crate::wire::{
    ControlAccess, Disk, Network, POWERED_OFF, POWERED_ON, PowerAction, Reference, TASK_ERROR,
    TASK_RUNNING, TASK_SUCCESS, Task, TaskError, VApp, VAppNetwork, Vm, VmReference,
};

pub const VDC: &str = "prod";

pub fn ctx() -> OperationContext {
    let _ = env_logger::builder().is_test(true).try_init();
    OperationContext::new(Verb::Create, Duration::from_secs(3600))
}

pub fn connector(fake: Arc<FakeVcd>) -> VcdConnector {
    let api: Arc<dyn VcdApi> = fake;
    VcdConnector::with_api(api)
        .with_default_vdc(VDC)
        .with_poll_interval(Duration::from_secs(1))
}

pub fn provider_with(fake: Arc<FakeVcd>) -> VcdProvider {
    VcdProvider::with_connector(Arc::new(connector(fake)))
}

fn uuid(n: u64) -> String {
    format!("{:08x}-0000-4000-8000-{:012x}", n, n)
}

fn bad_request(message: impl Into<String>) -> VcdApiError {
    VcdApiError::Status {
        status: 400,
        code: Some("BAD_REQUEST".to_string()),
        message: message.into(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeVApp {
    pub vapp: VApp,
    pub networks: Vec<VAppNetwork>,
    pub vms: Vec<Vm>,
    pub access: ControlAccess,
}

struct FakeTask {
    task: Task,
    remaining: u32,
    fails: bool,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    networks: HashMap<(String, String), Network>,
    vapps: HashMap<(String, String), FakeVApp>,
    disks: HashMap<(String, String), Disk>,
    tasks: HashMap<String, FakeTask>,
    task_polls: u32,
    fail_next_task: Option<String>,
    failures: HashMap<String, VcdApiError>,
    calls: Vec<String>,
    network_writes_active: HashMap<(String, String), u32>,
    max_network_writes: u32,
}

pub struct FakeVcd {
    state: Mutex<FakeState>,
}

impl FakeVcd {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                task_polls: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Record the call and return its scripted failure, if any
    fn enter(&self, op: &str) -> VcdResult<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(op.to_string());
        match state.failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    pub fn set_task_polls(&self, polls: u32) {
        self.lock().task_polls = polls.max(1);
    }

    /// The next task started ends in `error` with `message`
    pub fn fail_next_task(&self, message: &str) {
        self.lock().fail_next_task = Some(message.to_string());
    }

    pub fn fail_next(&self, op: &str, err: VcdApiError) {
        self.lock().failures.insert(op.to_string(), err);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Calls other than reads and task polls
    pub fn writes(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| !c.starts_with("get_") && !c.starts_with("find_") && !c.starts_with("list_"))
            .count()
    }

    pub fn start_task(&self, operation: &str) -> Task {
        let mut state = self.lock();
        Self::task(&mut state, operation, None)
    }

    fn task(state: &mut FakeState, operation: &str, owner: Option<Reference>) -> Task {
        state.next_id += 1;
        let task = Task {
            href: format!("https://vcd.example.com/api/task/{}", uuid(state.next_id)),
            status: TASK_RUNNING.to_string(),
            operation_name: operation.to_string(),
            owner,
            error: None,
        };
        let fails = state.fail_next_task.is_some();
        let mut stored = task.clone();
        if let Some(message) = state.fail_next_task.take() {
            stored.error = Some(TaskError {
                message,
                minor_error_code: None,
            });
        }
        let remaining = state.task_polls;
        state.tasks.insert(
            task.href.clone(),
            FakeTask {
                task: stored,
                remaining,
                fails,
            },
        );
        task
    }

    fn new_id(state: &mut FakeState, kind: &str) -> String {
        state.next_id += 1;
        format!("urn:vcloud:{}:{}", kind, uuid(state.next_id))
    }

    pub fn add_network(&self, vdc: &str, mut network: Network) -> String {
        let mut state = self.lock();
        let id = Self::new_id(&mut state, "network");
        network.id = Some(id.clone());
        state
            .networks
            .insert((vdc.to_string(), id.clone()), network);
        id
    }

    pub fn network(&self, vdc: &str, id: &str) -> Option<Network> {
        self.lock()
            .networks
            .get(&(vdc.to_string(), id.to_string()))
            .cloned()
    }

    pub fn add_vapp(&self, vdc: &str, name: &str) {
        let mut state = self.lock();
        let id = Self::new_id(&mut state, "vapp");
        state.vapps.insert(
            (vdc.to_string(), name.to_string()),
            FakeVApp {
                vapp: VApp {
                    id: Some(id),
                    name: name.to_string(),
                    description: None,
                    status: Some(POWERED_OFF.to_string()),
                },
                ..Default::default()
            },
        );
    }

    pub fn vapp(&self, vdc: &str, name: &str) -> Option<FakeVApp> {
        self.lock()
            .vapps
            .get(&(vdc.to_string(), name.to_string()))
            .cloned()
    }

    pub fn with_vapp<R>(&self, vdc: &str, name: &str, f: impl FnOnce(&mut FakeVApp) -> R) -> R {
        let mut state = self.lock();
        let vapp = state
            .vapps
            .get_mut(&(vdc.to_string(), name.to_string()))
            .unwrap();
        f(vapp)
    }

    pub fn disk(&self, vdc: &str, id: &str) -> Option<Disk> {
        self.lock()
            .disks
            .get(&(vdc.to_string(), id.to_string()))
            .cloned()
    }

    /// Most writes of one vApp's network section seen in flight at once
    pub fn max_concurrent_network_writes(&self) -> u32 {
        self.lock().max_network_writes
    }

    fn vapp_mut<'a>(
        state: &'a mut FakeState,
        vdc: &str,
        name: &str,
    ) -> VcdResult<&'a mut FakeVApp> {
        state
            .vapps
            .get_mut(&(vdc.to_string(), name.to_string()))
            .ok_or_else(|| VcdApiError::not_found(format!("vApp {} not found", name)))
    }

    fn vm_mut<'a>(
        state: &'a mut FakeState,
        vdc: &str,
        vapp: &str,
        name: &str,
    ) -> VcdResult<&'a mut Vm> {
        Self::vapp_mut(state, vdc, vapp)?
            .vms
            .iter_mut()
            .find(|vm| vm.name == name)
            .ok_or_else(|| VcdApiError::not_found(format!("VM {} not found", name)))
    }
}

#[async_trait]
impl VcdApi for FakeVcd {
    async fn get_task(&self, href: &str) -> VcdResult<Task> {
        let mut state = self.enter("get_task")?;
        let entry = state
            .tasks
            .get_mut(href)
            .ok_or_else(|| VcdApiError::not_found("task not found"))?;
        entry.remaining = entry.remaining.saturating_sub(1);
        if entry.remaining == 0 {
            entry.task.status = if entry.fails { TASK_ERROR } else { TASK_SUCCESS }.to_string();
        }
        Ok(entry.task.clone())
    }

    async fn create_network(&self, vdc: &str, network: &Network) -> VcdResult<Task> {
        let mut state = self.enter("create_network")?;
        if state
            .networks
            .iter()
            .any(|((v, _), n)| v == vdc && n.name == network.name)
        {
            return Err(bad_request(format!("network {} already exists", network.name)));
        }
        let id = Self::new_id(&mut state, "network");
        let mut stored = network.clone();
        stored.id = Some(id.clone());
        state.networks.insert((vdc.to_string(), id.clone()), stored);
        let owner = Reference {
            id: Some(id),
            name: network.name.clone(),
            href: None,
        };
        Ok(Self::task(&mut state, "orgVdcNetworkCreate", Some(owner)))
    }

    async fn get_network(&self, vdc: &str, id: &str) -> VcdResult<Network> {
        let state = self.enter("get_network")?;
        state
            .networks
            .get(&(vdc.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| VcdApiError::not_found(format!("network {} not found", id)))
    }

    async fn find_network(&self, vdc: &str, name: &str) -> VcdResult<Network> {
        let state = self.enter("find_network")?;
        state
            .networks
            .iter()
            .find(|((v, _), n)| v == vdc && n.name == name)
            .map(|(_, n)| n.clone())
            .ok_or_else(|| VcdApiError::not_found(format!("network {} not found", name)))
    }

    async fn update_network(&self, vdc: &str, id: &str, network: &Network) -> VcdResult<Task> {
        let mut state = self.enter("update_network")?;
        let stored = state
            .networks
            .get_mut(&(vdc.to_string(), id.to_string()))
            .ok_or_else(|| VcdApiError::not_found(format!("network {} not found", id)))?;
        *stored = Network {
            id: Some(id.to_string()),
            ..network.clone()
        };
        Ok(Self::task(&mut state, "orgVdcNetworkUpdate", None))
    }

    async fn delete_network(&self, vdc: &str, id: &str) -> VcdResult<Task> {
        let mut state = self.enter("delete_network")?;
        state
            .networks
            .remove(&(vdc.to_string(), id.to_string()))
            .ok_or_else(|| VcdApiError::not_found(format!("network {} not found", id)))?;
        Ok(Self::task(&mut state, "orgVdcNetworkDelete", None))
    }

    async fn create_vapp(&self, vdc: &str, vapp: &VApp) -> VcdResult<Task> {
        let mut state = self.enter("create_vapp")?;
        let key = (vdc.to_string(), vapp.name.clone());
        if state.vapps.contains_key(&key) {
            return Err(bad_request(format!("vApp {} already exists", vapp.name)));
        }
        let id = Self::new_id(&mut state, "vapp");
        state.vapps.insert(
            key,
            FakeVApp {
                vapp: VApp {
                    id: Some(id.clone()),
                    status: Some(POWERED_OFF.to_string()),
                    ..vapp.clone()
                },
                ..Default::default()
            },
        );
        let owner = Reference {
            id: Some(id),
            name: vapp.name.clone(),
            href: None,
        };
        Ok(Self::task(&mut state, "vdcComposeVapp", Some(owner)))
    }

    async fn find_vapp(&self, vdc: &str, name: &str) -> VcdResult<VApp> {
        let mut state = self.enter("find_vapp")?;
        Ok(Self::vapp_mut(&mut state, vdc, name)?.vapp.clone())
    }

    async fn update_vapp(&self, vdc: &str, vapp: &VApp) -> VcdResult<Task> {
        let mut state = self.enter("update_vapp")?;
        Self::vapp_mut(&mut state, vdc, &vapp.name)?.vapp.description = vapp.description.clone();
        Ok(Self::task(&mut state, "vappUpdateVapp", None))
    }

    async fn power_vapp(&self, vdc: &str, name: &str, action: PowerAction) -> VcdResult<Task> {
        let mut state = self.enter("power_vapp")?;
        let vapp = Self::vapp_mut(&mut state, vdc, name)?;
        let status = action.resulting_status().to_string();
        vapp.vapp.status = Some(status.clone());
        for vm in vapp.vms.iter_mut() {
            vm.status = Some(status.clone());
        }
        Ok(Self::task(&mut state, action.as_str(), None))
    }

    async fn delete_vapp(&self, vdc: &str, name: &str) -> VcdResult<Task> {
        let mut state = self.enter("delete_vapp")?;
        let vapp = Self::vapp_mut(&mut state, vdc, name)?;
        if vapp.vapp.status.as_deref() == Some(POWERED_ON) {
            return Err(bad_request("vApp must be powered off before deletion"));
        }
        state.vapps.remove(&(vdc.to_string(), name.to_string()));
        Ok(Self::task(&mut state, "vdcDeleteVapp", None))
    }

    async fn list_vapp_networks(&self, vdc: &str, vapp: &str) -> VcdResult<Vec<VAppNetwork>> {
        let mut state = self.enter("list_vapp_networks")?;
        Ok(Self::vapp_mut(&mut state, vdc, vapp)?.networks.clone())
    }

    async fn put_vapp_networks(
        &self,
        vdc: &str,
        vapp: &str,
        networks: &[VAppNetwork],
    ) -> VcdResult<Task> {
        let key = (vdc.to_string(), vapp.to_string());
        {
            let mut state = self.enter("put_vapp_networks")?;
            Self::vapp_mut(&mut state, vdc, vapp)?;
            let active = state.network_writes_active.entry(key.clone()).or_insert(0);
            *active += 1;
            let active = *active;
            state.max_network_writes = state.max_network_writes.max(active);
        }

        // The section is written when the request completes
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut state = self.lock();
        if let Some(active) = state.network_writes_active.get_mut(&key) {
            *active -= 1;
        }
        let mut stored: Vec<VAppNetwork> = Vec::with_capacity(networks.len());
        for network in networks {
            let mut network = network.clone();
            if network.id.is_none() {
                state.next_id += 1;
                network.id = Some(uuid(state.next_id));
            }
            stored.push(network);
        }
        Self::vapp_mut(&mut state, vdc, vapp)?.networks = stored;
        Ok(Self::task(&mut state, "vappUpdateNetworkConfig", None))
    }

    async fn create_vm(&self, vdc: &str, vapp: &str, vm: &Vm) -> VcdResult<Task> {
        let mut state = self.enter("create_vm")?;
        let id = Self::new_id(&mut state, "vm");
        let target = Self::vapp_mut(&mut state, vdc, vapp)?;
        if target.vms.iter().any(|v| v.name == vm.name) {
            return Err(bad_request(format!("VM {} already exists", vm.name)));
        }
        let mut stored = vm.clone();
        stored.id = Some(id.clone());
        stored.status = Some(POWERED_OFF.to_string());
        if stored.computer_name.is_none() {
            stored.computer_name = Some(vm.name.clone());
        }
        for (n, nic) in stored
            .network_connection_section
            .network_connection
            .iter_mut()
            .enumerate()
        {
            nic.mac_address = Some(format!("00:50:56:00:00:{:02x}", n));
            if nic.ip_address.is_none() && nic.ip_address_allocation_mode == "POOL" {
                nic.ip_address = Some(format!("10.0.0.{}", 10 + n));
            }
        }
        target.vms.push(stored);
        let owner = Reference {
            id: Some(id),
            name: vm.name.clone(),
            href: None,
        };
        Ok(Self::task(&mut state, "vappRecompose", Some(owner)))
    }

    async fn find_vm(&self, vdc: &str, vapp: &str, name: &str) -> VcdResult<Vm> {
        let mut state = self.enter("find_vm")?;
        Ok(Self::vm_mut(&mut state, vdc, vapp, name)?.clone())
    }

    async fn update_vm(&self, vdc: &str, vapp: &str, vm: &Vm) -> VcdResult<Task> {
        let mut state = self.enter("update_vm")?;
        let stored = Self::vm_mut(&mut state, vdc, vapp, &vm.name)?;
        let hardware_changed = stored.cpus != vm.cpus || stored.memory_mb != vm.memory_mb;
        if hardware_changed && stored.status.as_deref() == Some(POWERED_ON) {
            return Err(bad_request("hot change of CPU or memory is not enabled"));
        }
        let mut section = vm.network_connection_section.clone();
        for nic in section.network_connection.iter_mut() {
            let prior = stored
                .network_connection_section
                .network_connection
                .iter()
                .find(|p| p.network_connection_index == nic.network_connection_index);
            if nic.mac_address.is_none() {
                nic.mac_address = prior.and_then(|p| p.mac_address.clone());
            }
        }
        stored.cpus = vm.cpus;
        stored.memory_mb = vm.memory_mb;
        stored.network_connection_section = section;
        if vm.computer_name.is_some() {
            stored.computer_name = vm.computer_name.clone();
        }
        Ok(Self::task(&mut state, "vappUpdateVm", None))
    }

    async fn power_vm(
        &self,
        vdc: &str,
        vapp: &str,
        name: &str,
        action: PowerAction,
    ) -> VcdResult<Task> {
        let mut state = self.enter("power_vm")?;
        Self::vm_mut(&mut state, vdc, vapp, name)?.status =
            Some(action.resulting_status().to_string());
        Ok(Self::task(&mut state, action.as_str(), None))
    }

    async fn delete_vm(&self, vdc: &str, vapp: &str, name: &str) -> VcdResult<Task> {
        let mut state = self.enter("delete_vm")?;
        if Self::vm_mut(&mut state, vdc, vapp, name)?.status.as_deref() == Some(POWERED_ON) {
            return Err(bad_request("VM must be powered off before deletion"));
        }
        Self::vapp_mut(&mut state, vdc, vapp)?
            .vms
            .retain(|vm| vm.name != name);
        Ok(Self::task(&mut state, "vappDeleteVm", None))
    }

    async fn create_disk(&self, vdc: &str, disk: &Disk) -> VcdResult<Task> {
        let mut state = self.enter("create_disk")?;
        let id = Self::new_id(&mut state, "disk");
        let mut stored = disk.clone();
        stored.id = Some(id.clone());
        stored.bus_type.get_or_insert_with(|| "SCSI".to_string());
        state.disks.insert((vdc.to_string(), id.clone()), stored);
        let owner = Reference {
            id: Some(id),
            name: disk.name.clone(),
            href: None,
        };
        Ok(Self::task(&mut state, "vdcCreateDisk", Some(owner)))
    }

    async fn get_disk(&self, vdc: &str, id: &str) -> VcdResult<Disk> {
        let state = self.enter("get_disk")?;
        state
            .disks
            .get(&(vdc.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| VcdApiError::not_found(format!("disk {} not found", id)))
    }

    async fn find_disk(&self, vdc: &str, name: &str) -> VcdResult<Disk> {
        let state = self.enter("find_disk")?;
        state
            .disks
            .iter()
            .find(|((v, _), d)| v == vdc && d.name == name)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| VcdApiError::not_found(format!("disk {} not found", name)))
    }

    async fn resize_disk(&self, vdc: &str, id: &str, size_mb: i64) -> VcdResult<Task> {
        let mut state = self.enter("resize_disk")?;
        let disk = state
            .disks
            .get_mut(&(vdc.to_string(), id.to_string()))
            .ok_or_else(|| VcdApiError::not_found(format!("disk {} not found", id)))?;
        disk.size_mb = size_mb;
        Ok(Self::task(&mut state, "vdcUpdateDisk", None))
    }

    async fn attach_disk(
        &self,
        vdc: &str,
        vapp: &str,
        vm: &str,
        disk_id: &str,
    ) -> VcdResult<Task> {
        let mut state = self.enter("attach_disk")?;
        Self::vm_mut(&mut state, vdc, vapp, vm)?;
        let disk = state
            .disks
            .get_mut(&(vdc.to_string(), disk_id.to_string()))
            .ok_or_else(|| VcdApiError::not_found(format!("disk {} not found", disk_id)))?;
        if disk.attached_vm.is_some() {
            return Err(bad_request("disk is already attached"));
        }
        disk.attached_vm = Some(VmReference {
            vapp: vapp.to_string(),
            vm: vm.to_string(),
        });
        Ok(Self::task(&mut state, "vappAttachDisk", None))
    }

    async fn detach_disk(
        &self,
        vdc: &str,
        vapp: &str,
        vm: &str,
        disk_id: &str,
    ) -> VcdResult<Task> {
        let mut state = self.enter("detach_disk")?;
        Self::vm_mut(&mut state, vdc, vapp, vm)?;
        let disk = state
            .disks
            .get_mut(&(vdc.to_string(), disk_id.to_string()))
            .ok_or_else(|| VcdApiError::not_found(format!("disk {} not found", disk_id)))?;
        disk.attached_vm = None;
        Ok(Self::task(&mut state, "vappDetachDisk", None))
    }

    async fn delete_disk(&self, vdc: &str, id: &str) -> VcdResult<Task> {
        let mut state = self.enter("delete_disk")?;
        let key = (vdc.to_string(), id.to_string());
        match state.disks.get(&key) {
            None => return Err(VcdApiError::not_found(format!("disk {} not found", id))),
            Some(disk) if disk.attached_vm.is_some() => {
                return Err(bad_request("disk is attached to a VM"));
            }
            Some(_) => {}
        }
        state.disks.remove(&key);
        Ok(Self::task(&mut state, "vdcDeleteDisk", None))
    }

    async fn get_vapp_access(&self, vdc: &str, vapp: &str) -> VcdResult<ControlAccess> {
        let mut state = self.enter("get_vapp_access")?;
        Ok(Self::vapp_mut(&mut state, vdc, vapp)?.access.clone())
    }

    async fn put_vapp_access(
        &self,
        vdc: &str,
        vapp: &str,
        access: &ControlAccess,
    ) -> VcdResult<()> {
        let mut state = self.enter("put_vapp_access")?;
        Self::vapp_mut(&mut state, vdc, vapp)?.access = access.clone();
        Ok(())
    }
}
