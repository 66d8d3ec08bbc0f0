//! Credential endpoint client
//!
//! The platform manages object storage users' access keys over a small JSON
//! API next to the S3 endpoint, authenticated with the provider's own keys.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use stratus_core::config::S3Endpoint;
use stratus_core::provider::{ProviderError, ProviderResult};

use crate::api::{ApiResult, CredentialApi, S3ApiError};
use crate::wire::Credential;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// `CredentialApi` over HTTP
pub struct OseCredentialClient {
    client: reqwest::Client,
    base_url: Url,
    access_key: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialList {
    credentials: Vec<Credential>,
}

impl OseCredentialClient {
    pub fn new(base_url: &str, endpoint: &S3Endpoint) -> ProviderResult<Self> {
        let parsed = Url::parse(base_url.trim_end_matches('/'))
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                ProviderError::validation(format!("invalid credentials url '{}'", base_url))
            })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::internal("building HTTP client").with_cause(e))?;
        Ok(Self {
            client,
            base_url: parsed,
            access_key: endpoint.access_key.clone(),
            secret_key: endpoint.secret_key.clone(),
        })
    }

    /// Credentials of `username`, or one key of them; names are escaped
    fn user_url(&self, username: &str, access_key: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["users", username, "credentials"])
                .extend(access_key);
        }
        url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = request
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| S3ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: Option<ErrorBody> = response.json().await.ok();
        let code = body
            .as_ref()
            .and_then(|b| b.code.clone())
            .unwrap_or_else(|| match status {
                StatusCode::NOT_FOUND => "NoSuchCredential".to_string(),
                other => other.as_str().to_string(),
            });
        let message = body
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        Err(S3ApiError::Service {
            code,
            message,
            status: Some(status.as_u16()),
        })
    }
}

#[async_trait]
impl CredentialApi for OseCredentialClient {
    async fn create_credential(&self, username: &str) -> ApiResult<Credential> {
        debug!("creating access key for {}", username);
        let response = self.send(self.client.post(self.user_url(username, None))).await?;
        response
            .json::<Credential>()
            .await
            .map_err(|e| S3ApiError::Transport(e.to_string()))
    }

    async fn list_credentials(&self, username: &str) -> ApiResult<Vec<Credential>> {
        let response = self.send(self.client.get(self.user_url(username, None))).await?;
        let list: CredentialList = response
            .json()
            .await
            .map_err(|e| S3ApiError::Transport(e.to_string()))?;
        Ok(list.credentials)
    }

    async fn delete_credential(&self, username: &str, access_key: &str) -> ApiResult<()> {
        debug!("deleting access key of {}", username);
        let url = self.user_url(username, Some(access_key));
        self.send(self.client.delete(url)).await?;
        Ok(())
    }
}
