//! s3_credential - Access key of an object storage user
//!
//! The secret is returned only when the key is created, so it is carried over
//! from state on every read. Imported keys have no secret.

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use stratus_core::attr::{Attr, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::identity::{credential_identity, parse_credential_identity};
use stratus_core::model::Model;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::Attributes;
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::require;
use crate::api::CredentialApi;
use crate::client::S3Connector;
use crate::wire::Credential;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialModel {
    pub username: Attr<String>,
    /// Full key, or only its leading characters right after an import
    pub access_key: Attr<String>,
    pub secret_key: Attr<String>,
}

impl Model for CredentialModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            username: get_attr(attributes, "username")?,
            access_key: get_attr(attributes, "access_key")?,
            secret_key: get_attr(attributes, "secret_key")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "username", &self.username);
        put_attr(&mut attrs, "access_key", &self.access_key);
        put_attr(&mut attrs, "secret_key", &self.secret_key);
        attrs
    }

    fn identity(&self) -> Option<String> {
        match (&self.username, &self.access_key) {
            (Attr::Known(user), Attr::Known(key)) => Some(credential_identity(user, key)),
            _ => None,
        }
    }
}

/// The key designated by `key`: an exact match, or the only key starting
/// with it
fn select<'a>(keys: &'a [Credential], key: &str) -> Result<Option<&'a Credential>, usize> {
    if let Some(exact) = keys.iter().find(|c| c.access_key == key) {
        return Ok(Some(exact));
    }
    let candidates: Vec<&Credential> = keys
        .iter()
        .filter(|c| c.access_key.starts_with(key))
        .collect();
    match candidates.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only)),
        many => Err(many.len()),
    }
}

pub struct CredentialKind {
    connector: Arc<S3Connector>,
}

impl CredentialKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ResourceKind for CredentialKind {
    type Model = CredentialModel;
    type Client = Arc<dyn CredentialApi>;
    const TYPE_NAME: &'static str = "s3_credential";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Access key of an object storage user")
            .attribute(
                AttributeSchema::new("username", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("access_key", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("secret_key", AttributeType::String)
                    .computed()
                    .sensitive(),
            )
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.credentials().await
    }

    async fn create(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        plan: &CredentialModel,
    ) -> ProviderResult<CredentialModel> {
        let username = require(&plan.username, "username")?;
        let issued = client
            .create_credential(username)
            .await
            .map_err(|e| ProviderError::from(e).context("creating access key"))?;
        Ok(CredentialModel {
            username: plan.username.clone(),
            access_key: Attr::Known(issued.access_key),
            secret_key: Attr::from_option(issued.secret_key),
        })
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &CredentialModel,
    ) -> ReadOutcome<CredentialModel> {
        let (username, key) = match (
            require(&state.username, "username"),
            require(&state.access_key, "access_key"),
        ) {
            (Ok(user), Ok(key)) => (user, key),
            (Err(e), _) | (_, Err(e)) => return ReadOutcome::from_error(state, e),
        };
        let keys = match client.list_credentials(username).await {
            Ok(keys) => keys,
            Err(e) => {
                return ReadOutcome::from_error(
                    state,
                    ProviderError::from(e).context("listing access keys"),
                );
            }
        };
        match select(&keys, key) {
            Ok(Some(found)) => ReadOutcome::Found(CredentialModel {
                username: Attr::known(found.username.clone()),
                access_key: Attr::known(found.access_key.clone()),
                secret_key: Attr::reported(found.secret_key.clone(), &state.secret_key),
            }),
            Ok(None) => ReadOutcome::NotFound,
            Err(count) => {
                warn!("{} access keys of {} start with {}", count, username, key);
                ReadOutcome::Indeterminate {
                    prior: state.clone(),
                    error: ProviderError::validation(format!(
                        "'{}' matches {} access keys of {}",
                        key, count, username
                    )),
                }
            }
        }
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &CredentialModel,
    ) -> ProviderResult<()> {
        let username = require(&state.username, "username")?;
        let key = require(&state.access_key, "access_key")?;
        client
            .delete_credential(username, key)
            .await
            .map_err(|e| ProviderError::from(e).context("deleting access key"))
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<CredentialModel> {
        let (username, prefix) = parse_credential_identity(import_id)?;
        Ok(CredentialModel {
            username: Attr::known(username),
            access_key: Attr::known(prefix),
            secret_key: Attr::Null,
        })
    }
}
