//! Control plane client
//!
//! `VcdClient` logs in once per provider instance and sends JSON requests
//! with the session token, logging in again when the session expires.
//! `VcdConnector` binds it lazily and carries what every resource kind
//! shares: the default VDC, the poll interval and the named locks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use stratus_core::attr::Attr;
use stratus_core::config::{ProviderConfig, VcdEndpoint};
use stratus_core::context::OperationContext;
use stratus_core::mutex::{LockKey, NamedGuard, NamedMutex};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::waiter::{Refresh, StateWaiter};
use tokio::sync::{OnceCell, RwLock};

use crate::api::{VcdApi, VcdApiError, VcdResult};
use crate::wire::{
    ControlAccess, Disk, Network, PowerAction, TASK_ABORTED, TASK_ERROR, TASK_PRE_RUNNING,
    TASK_QUEUED, TASK_RUNNING, TASK_SUCCESS, Task, VApp, VAppNetwork, Vm,
};

const ACCEPT: &str = "application/*+json;version=36.0";

/// Header carrying the session token
const AUTH_HEADER: &str = "x-vcloud-authorization";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound of one HTTP exchange; task waits poll in many short requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Bound of a single task wait when the operation has no shorter deadline
const TASK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    minor_error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Records<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

/// `VcdApi` over HTTP
pub struct VcdClient {
    http: reqwest::Client,
    root: Url,
    login: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl VcdClient {
    pub fn new(endpoint: &VcdEndpoint) -> ProviderResult<Self> {
        let root = Url::parse(endpoint.url.trim_end_matches('/')).map_err(|e| {
            ProviderError::validation(format!("invalid vcd url '{}'", endpoint.url)).with_cause(e)
        })?;
        if root.cannot_be_a_base() {
            return Err(ProviderError::validation(format!(
                "invalid vcd url '{}'",
                endpoint.url
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(endpoint.allow_unverified_ssl)
            .build()
            .map_err(|e| ProviderError::internal("building HTTP client").with_cause(e))?;
        Ok(Self {
            http,
            root,
            login: format!("{}@{}", endpoint.user, endpoint.org),
            password: endpoint.password.clone(),
            token: RwLock::new(None),
        })
    }

    /// Client with an open session
    pub async fn connect(endpoint: &VcdEndpoint) -> ProviderResult<Self> {
        let client = Self::new(endpoint)?;
        client
            .login()
            .await
            .map_err(|e| ProviderError::from(e).context("logging in"))?;
        Ok(client)
    }

    /// URL below the API root; every segment is escaped on its own
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.root.clone();
        // Checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Collection URL filtered on an exact name
    fn filtered(&self, segments: &[&str], name: &str) -> Url {
        let mut url = self.url(segments);
        url.query_pairs_mut()
            .append_pair("filter", &format!("name=={}", name));
        url
    }

    async fn login(&self) -> VcdResult<String> {
        debug!("opening session for {}", self.login);
        let response = self
            .http
            .post(self.url(&["sessions"]))
            .header(reqwest::header::ACCEPT, ACCEPT)
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .await
            .map_err(|e| VcdApiError::Transport(e.to_string()))?;
        let response = Self::check(response).await?;
        let token = response
            .headers()
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| VcdApiError::Decode("session response has no token".to_string()))?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn session(&self) -> VcdResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    async fn check(response: reqwest::Response) -> VcdResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: Option<ErrorBody> = response.json().await.ok();
        let code = body.as_ref().and_then(|b| b.minor_error_code.clone());
        let message = body
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        Err(VcdApiError::Status {
            status: status.as_u16(),
            code,
            message,
        })
    }

    /// Send a request, logging in again once if the session expired
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> VcdResult<reqwest::Response> {
        let mut relogged = false;
        loop {
            let token = self.session().await?;
            debug!("{} {}", method, url);
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header(reqwest::header::ACCEPT, ACCEPT)
                .header(AUTH_HEADER, token);
            if let Some(ref body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .map_err(|e| VcdApiError::Transport(e.to_string()))?;

            if response.status() == StatusCode::UNAUTHORIZED && !relogged {
                warn!("session expired, logging in again");
                relogged = true;
                self.login().await?;
                continue;
            }
            return Self::check(response).await;
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> VcdResult<T> {
        response
            .json()
            .await
            .map_err(|e| VcdApiError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> VcdResult<T> {
        Self::decode(self.send(Method::GET, url, None).await?).await
    }

    async fn task(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> VcdResult<Task> {
        Self::decode(self.send(method, url, body).await?).await
    }

    /// First record of a name-filtered query
    async fn find<T: DeserializeOwned>(&self, segments: &[&str], name: &str) -> VcdResult<T> {
        let records: Records<T> = self.get(self.filtered(segments, name)).await?;
        records
            .values
            .into_iter()
            .next()
            .ok_or_else(|| VcdApiError::not_found(format!("'{}' not found", name)))
    }
}

fn body<T: serde::Serialize>(value: &T) -> VcdResult<Option<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| VcdApiError::Decode(e.to_string()))
}

#[async_trait]
impl VcdApi for VcdClient {
    async fn get_task(&self, href: &str) -> VcdResult<Task> {
        let url = Url::parse(href)
            .map_err(|e| VcdApiError::Decode(format!("task href '{}': {}", href, e)))?;
        self.get(url).await
    }

    async fn create_network(&self, vdc: &str, network: &Network) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "networks"]);
        self.task(Method::POST, url, body(network)?).await
    }

    async fn get_network(&self, vdc: &str, id: &str) -> VcdResult<Network> {
        self.get(self.url(&["vdc", vdc, "networks", id])).await
    }

    async fn find_network(&self, vdc: &str, name: &str) -> VcdResult<Network> {
        self.find(&["vdc", vdc, "networks"], name).await
    }

    async fn update_network(&self, vdc: &str, id: &str, network: &Network) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "networks", id]);
        self.task(Method::PUT, url, body(network)?).await
    }

    async fn delete_network(&self, vdc: &str, id: &str) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "networks", id]);
        self.task(Method::DELETE, url, None).await
    }

    async fn create_vapp(&self, vdc: &str, vapp: &VApp) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "action", "composeVApp"]);
        self.task(Method::POST, url, body(vapp)?).await
    }

    async fn find_vapp(&self, vdc: &str, name: &str) -> VcdResult<VApp> {
        self.get(self.url(&["vdc", vdc, "vapps", name])).await
    }

    async fn update_vapp(&self, vdc: &str, vapp: &VApp) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", &vapp.name]);
        self.task(Method::PUT, url, body(vapp)?).await
    }

    async fn power_vapp(&self, vdc: &str, name: &str, action: PowerAction) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", name, "power", "action", action.as_str()]);
        self.task(Method::POST, url, None).await
    }

    async fn delete_vapp(&self, vdc: &str, name: &str) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", name]);
        self.task(Method::DELETE, url, None).await
    }

    async fn list_vapp_networks(&self, vdc: &str, vapp: &str) -> VcdResult<Vec<VAppNetwork>> {
        let records: Records<VAppNetwork> = self
            .get(self.url(&["vdc", vdc, "vapps", vapp, "networkConfigSection"]))
            .await?;
        Ok(records.values)
    }

    async fn put_vapp_networks(
        &self,
        vdc: &str,
        vapp: &str,
        networks: &[VAppNetwork],
    ) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", vapp, "networkConfigSection"]);
        let section = serde_json::json!({ "values": networks });
        self.task(Method::PUT, url, Some(section)).await
    }

    async fn create_vm(&self, vdc: &str, vapp: &str, vm: &Vm) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", vapp, "action", "recomposeVApp"]);
        self.task(Method::POST, url, body(vm)?).await
    }

    async fn find_vm(&self, vdc: &str, vapp: &str, name: &str) -> VcdResult<Vm> {
        self.get(self.url(&["vdc", vdc, "vapps", vapp, "vms", name]))
            .await
    }

    async fn update_vm(&self, vdc: &str, vapp: &str, vm: &Vm) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", vapp, "vms", &vm.name]);
        self.task(Method::PUT, url, body(vm)?).await
    }

    async fn power_vm(
        &self,
        vdc: &str,
        vapp: &str,
        name: &str,
        action: PowerAction,
    ) -> VcdResult<Task> {
        let url = self.url(&[
            "vdc",
            vdc,
            "vapps",
            vapp,
            "vms",
            name,
            "power",
            "action",
            action.as_str(),
        ]);
        self.task(Method::POST, url, None).await
    }

    async fn delete_vm(&self, vdc: &str, vapp: &str, name: &str) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", vapp, "vms", name]);
        self.task(Method::DELETE, url, None).await
    }

    async fn create_disk(&self, vdc: &str, disk: &Disk) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "disks"]);
        self.task(Method::POST, url, body(disk)?).await
    }

    async fn get_disk(&self, vdc: &str, id: &str) -> VcdResult<Disk> {
        self.get(self.url(&["vdc", vdc, "disks", id])).await
    }

    async fn find_disk(&self, vdc: &str, name: &str) -> VcdResult<Disk> {
        self.find(&["vdc", vdc, "disks"], name).await
    }

    async fn resize_disk(&self, vdc: &str, id: &str, size_mb: i64) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "disks", id]);
        let patch = serde_json::json!({ "sizeMb": size_mb });
        self.task(Method::PUT, url, Some(patch)).await
    }

    async fn attach_disk(
        &self,
        vdc: &str,
        vapp: &str,
        vm: &str,
        disk_id: &str,
    ) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", vapp, "vms", vm, "disk", "action", "attach"]);
        let params = serde_json::json!({ "disk": { "id": disk_id } });
        self.task(Method::POST, url, Some(params)).await
    }

    async fn detach_disk(
        &self,
        vdc: &str,
        vapp: &str,
        vm: &str,
        disk_id: &str,
    ) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "vapps", vapp, "vms", vm, "disk", "action", "detach"]);
        let params = serde_json::json!({ "disk": { "id": disk_id } });
        self.task(Method::POST, url, Some(params)).await
    }

    async fn delete_disk(&self, vdc: &str, id: &str) -> VcdResult<Task> {
        let url = self.url(&["vdc", vdc, "disks", id]);
        self.task(Method::DELETE, url, None).await
    }

    async fn get_vapp_access(&self, vdc: &str, vapp: &str) -> VcdResult<ControlAccess> {
        self.get(self.url(&["vdc", vdc, "vapps", vapp, "controlAccess"]))
            .await
    }

    async fn put_vapp_access(
        &self,
        vdc: &str,
        vapp: &str,
        access: &ControlAccess,
    ) -> VcdResult<()> {
        let url = self.url(&["vdc", vdc, "vapps", vapp, "action", "controlAccess"]);
        self.send(Method::POST, url, body(access)?).await?;
        Ok(())
    }
}

/// Wait until `task` finishes and return its final form.
///
/// `error` and `aborted` tasks fail with the task's own message.
pub async fn wait_task(
    ctx: &OperationContext,
    api: &dyn VcdApi,
    task: Task,
    poll_interval: Option<Duration>,
) -> ProviderResult<Task> {
    let operation = task.operation_name.clone();
    let fail = |task: &Task| VcdApiError::Task {
        operation: task.operation_name.clone(),
        status: task.status.clone(),
        message: task
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default(),
    };
    match task.status.as_str() {
        TASK_SUCCESS => return Ok(task),
        TASK_ERROR | TASK_ABORTED => return Err(fail(&task).into()),
        _ => {}
    }

    let waiter = StateWaiter::new(
        &[TASK_QUEUED, TASK_PRE_RUNNING, TASK_RUNNING],
        &[TASK_SUCCESS],
        TASK_TIMEOUT,
    )
    .not_found_checks(3);
    let waiter = match poll_interval {
        Some(interval) => waiter.poll_interval(interval),
        None => waiter.min_interval(Duration::from_secs(1)),
    };

    let href = task.href.as_str();
    let fail = &fail;
    let finished = waiter
        .wait(ctx, move || async move {
            match api.get_task(href).await {
                Ok(t) if matches!(t.status.as_str(), TASK_ERROR | TASK_ABORTED) => Err(fail(&t)),
                Ok(t) => {
                    let status = t.status.clone();
                    Ok(Refresh::observed(t, status))
                }
                Err(e) if e.is_not_found() => Ok(Refresh::NotFound),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| ProviderError::from(e).context(format!("waiting for task {}", operation)))?;

    finished.ok_or_else(|| ProviderError::internal(format!("task {} vanished", operation)))
}

/// Lazily bound control plane client shared by every VCD resource
pub struct VcdConnector {
    endpoint: Option<VcdEndpoint>,
    api: OnceCell<Arc<dyn VcdApi>>,
    default_vdc: Option<String>,
    poll_interval: Option<Duration>,
    locks: Arc<NamedMutex>,
}

impl VcdConnector {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            endpoint: config.vcd.clone(),
            api: OnceCell::new(),
            default_vdc: config.vcd.as_ref().and_then(|v| v.vdc.clone()),
            poll_interval: config.poll_interval,
            locks: Arc::new(NamedMutex::new()),
        }
    }

    /// Connector with a pre-bound client
    pub fn with_api(api: Arc<dyn VcdApi>) -> Self {
        Self {
            endpoint: None,
            api: OnceCell::new_with(Some(api)),
            default_vdc: None,
            poll_interval: None,
            locks: Arc::new(NamedMutex::new()),
        }
    }

    pub fn with_default_vdc(mut self, vdc: impl Into<String>) -> Self {
        self.default_vdc = Some(vdc.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    pub async fn api(&self) -> ProviderResult<Arc<dyn VcdApi>> {
        self.api
            .get_or_try_init(|| async {
                let endpoint = self.endpoint.as_ref().ok_or_else(|| {
                    ProviderError::validation("provider block has no vcd configuration")
                })?;
                let client: Arc<dyn VcdApi> = Arc::new(VcdClient::connect(endpoint).await?);
                Ok::<_, ProviderError>(client)
            })
            .await
            .cloned()
    }

    /// VDC named by the resource, or the provider's default
    pub fn vdc(&self, configured: &Attr<String>) -> ProviderResult<String> {
        match configured {
            Attr::Known(vdc) => Ok(vdc.clone()),
            _ => self.default_vdc.clone().ok_or_else(|| {
                ProviderError::validation("'vdc' is not set and the provider has no default vdc")
            }),
        }
    }

    /// Hold the lock of a vApp for the rest of the caller's scope
    pub async fn lock_vapp(
        &self,
        ctx: &OperationContext,
        vdc: &str,
        vapp: &str,
    ) -> ProviderResult<NamedGuard> {
        let key = LockKey::vapp(vdc, vapp)?;
        self.locks.lock(ctx, &key).await
    }

    pub async fn wait(
        &self,
        ctx: &OperationContext,
        api: &dyn VcdApi,
        task: Task,
    ) -> ProviderResult<Task> {
        wait_task(ctx, api, task, self.poll_interval).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeVcd, ctx};

    fn endpoint() -> VcdEndpoint {
        VcdEndpoint {
            url: "https://vcd.example.com/api/".to_string(),
            org: "acme".to_string(),
            user: "admin".to_string(),
            password: "secret".to_string(),
            vdc: Some("prod".to_string()),
            allow_unverified_ssl: false,
        }
    }

    #[test]
    fn urls_are_relative_to_the_api_root() {
        let client = VcdClient::new(&endpoint()).unwrap();
        assert_eq!(client.login, "admin@acme");
        assert_eq!(
            client.url(&["vdc", "prod", "disks"]).as_str(),
            "https://vcd.example.com/api/vdc/prod/disks"
        );

        let bare = VcdClient::new(&VcdEndpoint {
            url: "https://vcd.example.com".to_string(),
            ..endpoint()
        })
        .unwrap();
        assert_eq!(
            bare.url(&["sessions"]).as_str(),
            "https://vcd.example.com/sessions"
        );
    }

    #[test]
    fn names_are_escaped_in_paths_and_filters() {
        let client = VcdClient::new(&endpoint()).unwrap();
        let path = client.url(&["vdc", "prod", "vapps", "a/b#c?d"]);
        assert_eq!(
            path.as_str(),
            "https://vcd.example.com/api/vdc/prod/vapps/a%2Fb%23c%3Fd"
        );

        let query = client.filtered(&["vdc", "prod", "disks"], "x&y;z#w");
        assert_eq!(query.path(), "/api/vdc/prod/disks");
        assert_eq!(query.query(), Some("filter=name%3D%3Dx%26y%3Bz%23w"));
        let pairs: Vec<(String, String)> = query.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("filter".to_string(), "name==x&y;z#w".to_string())]);
    }

    #[test]
    fn malformed_url_is_a_configuration_error() {
        let err = match VcdClient::new(&VcdEndpoint {
            url: "not a url".to_string(),
            ..endpoint()
        }) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert_eq!(err.kind, stratus_core::provider::ErrorKind::Validation);
    }

    #[test]
    fn vdc_falls_back_to_provider_default() {
        let mut config = ProviderConfig::default();
        config.vcd = Some(endpoint());
        let connector = VcdConnector::new(&config);
        assert_eq!(connector.vdc(&Attr::Null).unwrap(), "prod");
        assert_eq!(connector.vdc(&Attr::known("test")).unwrap(), "test");

        let bare = VcdConnector::new(&ProviderConfig::default());
        assert!(bare.vdc(&Attr::Null).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn task_is_polled_until_success() {
        let fake = FakeVcd::new();
        fake.set_task_polls(3);
        let task = fake.start_task("vdcUpdateNetwork");

        let done = wait_task(&ctx(), &fake, task, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(done.status, TASK_SUCCESS);
        assert_eq!(fake.calls("get_task"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_reports_its_message() {
        let fake = FakeVcd::new();
        fake.fail_next_task("disk is busy");
        let task = fake.start_task("vdcDeleteDisk");

        let err = wait_task(&ctx(), &fake, task, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk is busy"));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn unconfigured_connector_fails_to_bind() {
        let connector = VcdConnector::new(&ProviderConfig::default());
        let err = match connector.api().await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.message.contains("no vcd configuration"));
    }
}
