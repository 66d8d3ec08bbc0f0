//! In-memory object storage used by the resource tests
//!
//! Counts every call, can fail the next calls of an operation with scripted
//! errors and can replay stale reads to simulate eventual consistency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stratus_core::context::{OperationContext, Verb};

use crate::api::{ApiResult, CredentialApi, ObjectStorageApi, S3ApiError};
use crate::client::S3Connector;
use crate::provider::S3Provider;
use crate::wire::{
    AccessControlPolicy, AclRequest, BucketInfo, CorsRule, Credential, Grant, Grantee,
    LifecycleRule, Owner, WebsiteConfiguration,
};

pub(crate) const OWNER_ID: &str = "owner-canonical-id";

pub(crate) fn ctx() -> OperationContext {
    let _ = env_logger::builder().is_test(true).try_init();
    OperationContext::new(Verb::Create, Duration::from_secs(3600))
}

pub(crate) fn provider_with(storage: Arc<FakeStorage>) -> S3Provider {
    provider_with_credentials(storage, Arc::new(FakeCredentials::new()))
}

pub(crate) fn provider_with_credentials(
    storage: Arc<FakeStorage>,
    credentials: Arc<FakeCredentials>,
) -> S3Provider {
    let credentials: Arc<dyn CredentialApi> = credentials;
    let connector = S3Connector::with_clients(storage, Some(credentials))
        .with_poll_interval(Duration::from_secs(1));
    S3Provider::with_connector(Arc::new(connector))
}

fn missing(code: &str) -> S3ApiError {
    S3ApiError::Service {
        code: code.to_string(),
        message: "not found".to_string(),
        status: Some(404),
    }
}

fn owner_grant() -> Grant {
    Grant {
        grantee: Grantee {
            grantee_type: "CanonicalUser".to_string(),
            id: Some(OWNER_ID.to_string()),
            ..Default::default()
        },
        permission: "FULL_CONTROL".to_string(),
    }
}

fn private_acl() -> AccessControlPolicy {
    AccessControlPolicy {
        owner: Owner {
            id: Some(OWNER_ID.to_string()),
            display_name: Some("owner".to_string()),
        },
        grants: vec![owner_grant()],
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeBucket {
    pub object_lock: bool,
    pub hidden_reads: usize,
    pub canned_acl: Option<String>,
    pub acl: AccessControlPolicy,
    pub cors: Option<Vec<CorsRule>>,
    pub lifecycle: Option<Vec<LifecycleRule>>,
    pub policy: Option<String>,
    pub versioning: Option<String>,
    pub website: Option<WebsiteConfiguration>,
    pub ownership: Option<String>,
}

#[derive(Default)]
struct FakeState {
    buckets: HashMap<String, FakeBucket>,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<S3ApiError>>,
    hide_new_buckets: usize,
    lifecycle_reads: VecDeque<ApiResult<Vec<LifecycleRule>>>,
}

#[derive(Default)]
pub(crate) struct FakeStorage {
    state: Mutex<FakeState>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket created out of band, visible immediately
    pub fn add_bucket(&self, name: &str) {
        self.state.lock().unwrap().buckets.insert(
            name.to_string(),
            FakeBucket {
                acl: private_acl(),
                ..Default::default()
            },
        );
    }

    /// New buckets report not-found to their first `reads` head requests
    pub fn hide_new_buckets_for(&self, reads: usize) {
        self.state.lock().unwrap().hide_new_buckets = reads;
    }

    /// Fail the next call of `operation` with `error`
    pub fn fail_next(&self, operation: &'static str, error: S3ApiError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Answer the next lifecycle reads from `reads` before the stored rules
    pub fn queue_lifecycle_reads(&self, reads: Vec<ApiResult<Vec<LifecycleRule>>>) {
        self.state.lock().unwrap().lifecycle_reads.extend(reads);
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    /// Calls of operations that change the remote
    pub fn writes(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(op, _)| !op.starts_with("get_") && !op.starts_with("head_"))
            .map(|(_, n)| n)
            .sum()
    }

    pub fn has_bucket(&self, name: &str) -> bool {
        self.state.lock().unwrap().buckets.contains_key(name)
    }

    /// Inspect or modify a bucket out of band
    pub fn with_bucket<R>(&self, name: &str, f: impl FnOnce(&mut FakeBucket) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        let bucket = state.buckets.get_mut(name).expect("bucket exists");
        f(bucket)
    }

    fn enter(&self, operation: &'static str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_default() += 1;
        match state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn on_bucket<R>(
        &self,
        operation: &'static str,
        name: &str,
        f: impl FnOnce(&mut FakeBucket) -> ApiResult<R>,
    ) -> ApiResult<R> {
        self.enter(operation)?;
        let mut state = self.state.lock().unwrap();
        match state.buckets.get_mut(name) {
            Some(bucket) => f(bucket),
            None => Err(missing("NoSuchBucket")),
        }
    }
}

#[async_trait]
impl ObjectStorageApi for FakeStorage {
    async fn create_bucket(&self, bucket: &str, object_lock: bool) -> ApiResult<()> {
        self.enter("create_bucket")?;
        let mut state = self.state.lock().unwrap();
        if state.buckets.contains_key(bucket) {
            return Err(S3ApiError::service("BucketAlreadyOwnedByYou", "exists"));
        }
        let hidden_reads = state.hide_new_buckets;
        state.buckets.insert(
            bucket.to_string(),
            FakeBucket {
                object_lock,
                hidden_reads,
                acl: private_acl(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> ApiResult<BucketInfo> {
        self.on_bucket("head_bucket", bucket, |b| {
            if b.hidden_reads > 0 {
                b.hidden_reads -= 1;
                return Err(missing("NotFound"));
            }
            Ok(BucketInfo {
                name: bucket.to_string(),
                region: Some("us-east-1".to_string()),
                object_lock_enabled: b.object_lock,
            })
        })
        .map_err(|e| if e.is_not_found() { missing("NotFound") } else { e })
    }

    async fn delete_bucket(&self, bucket: &str) -> ApiResult<()> {
        self.enter("delete_bucket")?;
        match self.state.lock().unwrap().buckets.remove(bucket) {
            Some(_) => Ok(()),
            None => Err(missing("NoSuchBucket")),
        }
    }

    async fn get_bucket_acl(&self, bucket: &str) -> ApiResult<AccessControlPolicy> {
        self.on_bucket("get_bucket_acl", bucket, |b| Ok(b.acl.clone()))
    }

    async fn put_bucket_acl(&self, bucket: &str, acl: &AclRequest) -> ApiResult<()> {
        self.on_bucket("put_bucket_acl", bucket, |b| {
            match acl {
                AclRequest::Canned(canned) => {
                    b.canned_acl = Some(canned.clone());
                    let mut policy = private_acl();
                    if canned == "public-read" {
                        policy.grants.push(Grant {
                            grantee: Grantee {
                                grantee_type: "Group".to_string(),
                                uri: Some(
                                    "http://acs.amazonaws.com/groups/global/AllUsers".to_string(),
                                ),
                                ..Default::default()
                            },
                            permission: "READ".to_string(),
                        });
                    }
                    b.acl = policy;
                }
                AclRequest::Policy(policy) => {
                    b.canned_acl = None;
                    b.acl = policy.clone();
                }
            }
            Ok(())
        })
    }

    async fn get_bucket_cors(&self, bucket: &str) -> ApiResult<Vec<CorsRule>> {
        self.on_bucket("get_bucket_cors", bucket, |b| {
            b.cors.clone().ok_or_else(|| missing("NoSuchCORSConfiguration"))
        })
    }

    async fn put_bucket_cors(&self, bucket: &str, rules: &[CorsRule]) -> ApiResult<()> {
        self.on_bucket("put_bucket_cors", bucket, |b| {
            b.cors = Some(rules.to_vec());
            Ok(())
        })
    }

    async fn delete_bucket_cors(&self, bucket: &str) -> ApiResult<()> {
        self.on_bucket("delete_bucket_cors", bucket, |b| {
            b.cors = None;
            Ok(())
        })
    }

    async fn get_bucket_lifecycle(&self, bucket: &str) -> ApiResult<Vec<LifecycleRule>> {
        self.enter("get_bucket_lifecycle")?;
        let mut state = self.state.lock().unwrap();
        if let Some(read) = state.lifecycle_reads.pop_front() {
            return read;
        }
        match state.buckets.get(bucket) {
            Some(b) => b
                .lifecycle
                .clone()
                .ok_or_else(|| missing("NoSuchLifecycleConfiguration")),
            None => Err(missing("NoSuchBucket")),
        }
    }

    async fn put_bucket_lifecycle(&self, bucket: &str, rules: &[LifecycleRule]) -> ApiResult<()> {
        self.on_bucket("put_bucket_lifecycle", bucket, |b| {
            b.lifecycle = Some(rules.to_vec());
            Ok(())
        })
    }

    async fn delete_bucket_lifecycle(&self, bucket: &str) -> ApiResult<()> {
        self.on_bucket("delete_bucket_lifecycle", bucket, |b| {
            b.lifecycle = None;
            Ok(())
        })
    }

    async fn get_bucket_policy(&self, bucket: &str) -> ApiResult<String> {
        self.on_bucket("get_bucket_policy", bucket, |b| {
            b.policy.clone().ok_or_else(|| missing("NoSuchBucketPolicy"))
        })
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> ApiResult<()> {
        self.on_bucket("put_bucket_policy", bucket, |b| {
            // The remote stores its own serialization of the document
            let parsed: serde_json::Value = serde_json::from_str(policy)
                .map_err(|e| S3ApiError::service("MalformedPolicy", e.to_string()))?;
            b.policy = Some(parsed.to_string());
            Ok(())
        })
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> ApiResult<()> {
        self.on_bucket("delete_bucket_policy", bucket, |b| {
            b.policy = None;
            Ok(())
        })
    }

    async fn get_bucket_versioning(&self, bucket: &str) -> ApiResult<Option<String>> {
        self.on_bucket("get_bucket_versioning", bucket, |b| Ok(b.versioning.clone()))
    }

    async fn put_bucket_versioning(&self, bucket: &str, status: &str) -> ApiResult<()> {
        self.on_bucket("put_bucket_versioning", bucket, |b| {
            b.versioning = Some(status.to_string());
            Ok(())
        })
    }

    async fn get_bucket_website(&self, bucket: &str) -> ApiResult<WebsiteConfiguration> {
        self.on_bucket("get_bucket_website", bucket, |b| {
            b.website.clone().ok_or_else(|| missing("NoSuchWebsiteConfiguration"))
        })
    }

    async fn put_bucket_website(
        &self,
        bucket: &str,
        website: &WebsiteConfiguration,
    ) -> ApiResult<()> {
        self.on_bucket("put_bucket_website", bucket, |b| {
            b.website = Some(website.clone());
            Ok(())
        })
    }

    async fn delete_bucket_website(&self, bucket: &str) -> ApiResult<()> {
        self.on_bucket("delete_bucket_website", bucket, |b| {
            b.website = None;
            Ok(())
        })
    }

    async fn get_ownership_controls(&self, bucket: &str) -> ApiResult<String> {
        self.on_bucket("get_ownership_controls", bucket, |b| {
            b.ownership
                .clone()
                .ok_or_else(|| missing("OwnershipControlsNotFoundError"))
        })
    }

    async fn put_ownership_controls(&self, bucket: &str, ownership: &str) -> ApiResult<()> {
        self.on_bucket("put_ownership_controls", bucket, |b| {
            b.ownership = Some(ownership.to_string());
            Ok(())
        })
    }

    async fn delete_ownership_controls(&self, bucket: &str) -> ApiResult<()> {
        self.on_bucket("delete_ownership_controls", bucket, |b| {
            b.ownership = None;
            Ok(())
        })
    }

    fn website_endpoint(&self, bucket: &str) -> String {
        format!("{}.s3-website.us-east-1.amazonaws.com", bucket)
    }
}

#[derive(Default)]
struct CredentialState {
    users: HashMap<String, Vec<Credential>>,
    issued: usize,
    calls: usize,
}

#[derive(Default)]
pub(crate) struct FakeCredentials {
    state: Mutex<CredentialState>,
}

impl FakeCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn keys_of(&self, username: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(username)
            .map(|keys| keys.iter().map(|c| c.access_key.clone()).collect())
            .unwrap_or_default()
    }

    /// Key created out of band
    pub fn add_key(&self, username: &str, access_key: &str) {
        self.state
            .lock()
            .unwrap()
            .users
            .entry(username.to_string())
            .or_default()
            .push(Credential {
                username: username.to_string(),
                access_key: access_key.to_string(),
                secret_key: None,
            });
    }
}

#[async_trait]
impl CredentialApi for FakeCredentials {
    async fn create_credential(&self, username: &str) -> ApiResult<Credential> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state.issued += 1;
        let issued = Credential {
            username: username.to_string(),
            access_key: format!("K{:03}EXAMPLEKEY", state.issued),
            secret_key: Some(format!("secret-{}", state.issued)),
        };
        state
            .users
            .entry(username.to_string())
            .or_default()
            .push(Credential {
                secret_key: None,
                ..issued.clone()
            });
        Ok(issued)
    }

    async fn list_credentials(&self, username: &str) -> ApiResult<Vec<Credential>> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        state
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| missing("NoSuchCredential"))
    }

    async fn delete_credential(&self, username: &str, access_key: &str) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        let keys = state
            .users
            .get_mut(username)
            .ok_or_else(|| missing("NoSuchCredential"))?;
        let before = keys.len();
        keys.retain(|c| c.access_key != access_key);
        if keys.len() == before {
            return Err(missing("NoSuchCredential"));
        }
        Ok(())
    }
}
