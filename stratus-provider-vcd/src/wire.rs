//! JSON representations exchanged with the control plane
//!
//! Field names follow the API's camelCase. Optional fields are skipped when
//! unset so a request never carries zero values the user did not write.

use serde::{Deserialize, Serialize};

/// Link to another object
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor_error_code: Option<String>,
}

pub const TASK_QUEUED: &str = "queued";
pub const TASK_PRE_RUNNING: &str = "preRunning";
pub const TASK_RUNNING: &str = "running";
pub const TASK_SUCCESS: &str = "success";
pub const TASK_ERROR: &str = "error";
pub const TASK_ABORTED: &str = "aborted";

/// Asynchronous operation started by a mutating call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub href: String,
    /// One of the `TASK_*` labels
    pub status: String,
    #[serde(default)]
    pub operation_name: String,
    /// Object the task created or modified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl Task {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status.as_str(),
            TASK_SUCCESS | TASK_ERROR | TASK_ABORTED
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpRange {
    pub start_address: String,
    pub end_address: String,
}

/// Routed org-VDC network
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub edge_gateway: String,
    pub gateway: String,
    pub prefix_length: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_suffix: Option<String>,
    #[serde(default)]
    pub static_ip_pools: Vec<IpRange>,
}

pub const POWERED_ON: &str = "POWERED_ON";
pub const POWERED_OFF: &str = "POWERED_OFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    PowerOn,
    PowerOff,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::PowerOn => "powerOn",
            PowerAction::PowerOff => "powerOff",
        }
    }

    /// Status reported once the action completed
    pub fn resulting_status(&self) -> &'static str {
        match self {
            PowerAction::PowerOn => POWERED_ON,
            PowerAction::PowerOff => POWERED_OFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VApp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `POWERED_ON`, `POWERED_OFF`, `RESOLVED`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Org network attached to a vApp
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VAppNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub network_name: String,
    /// Parent org network, same as `network_name` for a direct attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_network: Option<String>,
    #[serde(default)]
    pub is_fenced: bool,
    #[serde(default)]
    pub retain_net_info_across_deployments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnection {
    pub network_connection_index: i64,
    pub network: String,
    /// `POOL`, `DHCP`, `MANUAL` or `NONE`
    pub ip_address_allocation_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default = "connected")]
    pub is_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_adapter_type: Option<String>,
}

fn connected() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnectionSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_network_connection_index: Option<i64>,
    #[serde(default)]
    pub network_connection: Vec<NetworkConnection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    pub memory_mb: i64,
    pub cpus: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub network_connection_section: NetworkConnectionSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmReference {
    pub vapp: String,
    pub vm: String,
}

/// Independent disk
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub size_mb: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_vm: Option<VmReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSetting {
    /// User reference (URN or HREF)
    pub subject: String,
    /// `ReadOnly`, `Change` or `FullControl`
    pub access_level: String,
}

/// Sharing settings of a vApp
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlAccess {
    pub is_shared_to_everyone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub everyone_access_level: Option<String>,
    #[serde(default)]
    pub access_settings: Vec<AccessSetting>,
}
