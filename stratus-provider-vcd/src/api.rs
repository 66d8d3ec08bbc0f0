//! Remote API seam of the virtual infrastructure provider
//!
//! Every mutating call returns a task; callers wait for it with
//! `client::wait_task`. Reads return the object or a not-found error.

use async_trait::async_trait;
use stratus_core::provider::{ErrorKind, ProviderError};

use crate::wire::{
    ControlAccess, Disk, Network, PowerAction, Task, VApp, VAppNetwork, Vm,
};

/// Minor error codes meaning the addressed object is absent
const NOT_FOUND_CODES: &[&str] = &["RESOURCE_NOT_FOUND", "ENTITY_NOT_FOUND"];

/// Minor error code returned while another task holds the object
pub const BUSY_ENTITY: &str = "BUSY_ENTITY";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VcdApiError {
    #[error("{status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("task {operation} ended with status {status}: {message}")]
    Task {
        operation: String,
        status: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl VcdApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        VcdApiError::Status {
            status: 404,
            code: Some("RESOURCE_NOT_FOUND".to_string()),
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        VcdApiError::Status {
            status: 400,
            code: Some(BUSY_ENTITY.to_string()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            VcdApiError::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            VcdApiError::Status { status, code, .. } => {
                *status == 404 || code.as_deref().is_some_and(|c| NOT_FOUND_CODES.contains(&c))
            }
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.code() == Some(BUSY_ENTITY)
    }

    pub fn is_transient(&self) -> bool {
        match self {
            VcdApiError::Status { status, .. } => {
                *status >= 500 || *status == 429 || self.is_busy()
            }
            VcdApiError::Transport(_) => true,
            VcdApiError::Task { .. } | VcdApiError::Decode(_) => false,
        }
    }
}

impl From<VcdApiError> for ProviderError {
    fn from(err: VcdApiError) -> Self {
        let kind = if err.is_not_found() {
            ErrorKind::NotFound
        } else if err.is_transient() {
            ErrorKind::Transient
        } else if matches!(err, VcdApiError::Status { status: 400, .. }) {
            ErrorKind::Validation
        } else {
            ErrorKind::Remote
        };
        ProviderError::new("vcd request failed")
            .with_kind(kind)
            .with_cause(err)
    }
}

pub type VcdResult<T> = Result<T, VcdApiError>;

/// Operations of the virtual infrastructure control plane, scoped by VDC name
#[async_trait]
pub trait VcdApi: Send + Sync {
    /// Current status of a task previously returned by a mutating call
    async fn get_task(&self, href: &str) -> VcdResult<Task>;

    async fn create_network(&self, vdc: &str, network: &Network) -> VcdResult<Task>;
    async fn get_network(&self, vdc: &str, id: &str) -> VcdResult<Network>;
    async fn find_network(&self, vdc: &str, name: &str) -> VcdResult<Network>;
    async fn update_network(&self, vdc: &str, id: &str, network: &Network) -> VcdResult<Task>;
    async fn delete_network(&self, vdc: &str, id: &str) -> VcdResult<Task>;

    async fn create_vapp(&self, vdc: &str, vapp: &VApp) -> VcdResult<Task>;
    async fn find_vapp(&self, vdc: &str, name: &str) -> VcdResult<VApp>;
    async fn update_vapp(&self, vdc: &str, vapp: &VApp) -> VcdResult<Task>;
    async fn power_vapp(&self, vdc: &str, name: &str, action: PowerAction) -> VcdResult<Task>;
    async fn delete_vapp(&self, vdc: &str, name: &str) -> VcdResult<Task>;

    /// Network configuration section of a vApp; replaced as a whole
    async fn list_vapp_networks(&self, vdc: &str, vapp: &str) -> VcdResult<Vec<VAppNetwork>>;
    async fn put_vapp_networks(
        &self,
        vdc: &str,
        vapp: &str,
        networks: &[VAppNetwork],
    ) -> VcdResult<Task>;

    async fn create_vm(&self, vdc: &str, vapp: &str, vm: &Vm) -> VcdResult<Task>;
    async fn find_vm(&self, vdc: &str, vapp: &str, name: &str) -> VcdResult<Vm>;
    async fn update_vm(&self, vdc: &str, vapp: &str, vm: &Vm) -> VcdResult<Task>;
    async fn power_vm(
        &self,
        vdc: &str,
        vapp: &str,
        name: &str,
        action: PowerAction,
    ) -> VcdResult<Task>;
    async fn delete_vm(&self, vdc: &str, vapp: &str, name: &str) -> VcdResult<Task>;

    async fn create_disk(&self, vdc: &str, disk: &Disk) -> VcdResult<Task>;
    async fn get_disk(&self, vdc: &str, id: &str) -> VcdResult<Disk>;
    async fn find_disk(&self, vdc: &str, name: &str) -> VcdResult<Disk>;
    async fn resize_disk(&self, vdc: &str, id: &str, size_mb: i64) -> VcdResult<Task>;
    async fn attach_disk(&self, vdc: &str, vapp: &str, vm: &str, disk_id: &str)
    -> VcdResult<Task>;
    async fn detach_disk(&self, vdc: &str, vapp: &str, vm: &str, disk_id: &str)
    -> VcdResult<Task>;
    async fn delete_disk(&self, vdc: &str, id: &str) -> VcdResult<Task>;

    async fn get_vapp_access(&self, vdc: &str, vapp: &str) -> VcdResult<ControlAccess>;
    async fn put_vapp_access(&self, vdc: &str, vapp: &str, access: &ControlAccess)
    -> VcdResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absence_is_not_found() {
        assert!(VcdApiError::not_found("no vApp").is_not_found());
        let by_code = VcdApiError::Status {
            status: 403,
            code: Some("ENTITY_NOT_FOUND".to_string()),
            message: "gone".to_string(),
        };
        assert!(by_code.is_not_found());
        assert!(!VcdApiError::Transport("reset".to_string()).is_not_found());
    }

    #[test]
    fn busy_entity_is_transient() {
        let err = VcdApiError::busy("vApp is busy");
        assert!(err.is_busy());
        let err: ProviderError = err.into();
        assert_eq!(err.kind, ErrorKind::Transient);
    }

    #[test]
    fn task_failure_is_a_remote_error() {
        let err: ProviderError = VcdApiError::Task {
            operation: "vdcComposeVapp".to_string(),
            status: "error".to_string(),
            message: "no capacity".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Remote);
        assert!(err.to_string().contains("no capacity"));
    }
}
