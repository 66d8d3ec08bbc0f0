//! Provider configuration
//!
//! Built once from the provider block (or the environment) and passed by
//! reference to every resource kind.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{Attributes, Value};
use crate::timeouts::parse_duration;

const DEFAULT_S3_REGION: &str = "us-east-1";

/// Virtual-infrastructure control plane connection
#[derive(Clone, PartialEq, Deserialize)]
pub struct VcdEndpoint {
    /// API root, e.g. `https://vcd.example.com/api`
    pub url: String,
    pub org: String,
    pub user: String,
    pub password: String,
    /// Default VDC for resources that do not name one
    #[serde(default)]
    pub vdc: Option<String>,
    #[serde(default)]
    pub allow_unverified_ssl: bool,
}

impl fmt::Debug for VcdEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VcdEndpoint")
            .field("url", &self.url)
            .field("org", &self.org)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("vdc", &self.vdc)
            .field("allow_unverified_ssl", &self.allow_unverified_ssl)
            .finish()
    }
}

/// S3-compatible object storage connection
#[derive(Clone, PartialEq, Deserialize)]
pub struct S3Endpoint {
    /// Custom endpoint; the SDK default is used when absent
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Platform endpoint managing user credentials
    #[serde(default)]
    pub credentials_url: Option<String>,
}

impl fmt::Debug for S3Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Endpoint")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("credentials_url", &self.credentials_url)
            .finish()
    }
}

fn default_region() -> String {
    DEFAULT_S3_REGION.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub vcd: Option<VcdEndpoint>,
    #[serde(default)]
    pub s3: Option<S3Endpoint>,
    /// Fixed pause between polls, replacing the waiter's backoff
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub poll_interval: Option<Duration>,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

impl ProviderConfig {
    /// Build from the provider block attributes
    pub fn from_attributes(attributes: &Attributes) -> ProviderResult<Self> {
        let json = serde_json::Value::from(Value::Map(attributes.clone()));
        serde_json::from_value(json).map_err(|e| {
            ProviderError::validation(format!("invalid provider configuration: {}", e))
        })
    }

    /// Build from `STRATUS_*` environment variables
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable lookup; a block is configured only when its
    /// mandatory variables are all present.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ProviderResult<Self> {
        let vcd = match (
            lookup("STRATUS_VCD_URL"),
            lookup("STRATUS_VCD_ORG"),
            lookup("STRATUS_VCD_USER"),
            lookup("STRATUS_VCD_PASSWORD"),
        ) {
            (Some(url), Some(org), Some(user), Some(password)) => Some(VcdEndpoint {
                url,
                org,
                user,
                password,
                vdc: lookup("STRATUS_VCD_VDC"),
                allow_unverified_ssl: false,
            }),
            _ => None,
        };

        let s3 = match (
            lookup("STRATUS_S3_ACCESS_KEY"),
            lookup("STRATUS_S3_SECRET_KEY"),
        ) {
            (Some(access_key), Some(secret_key)) => Some(S3Endpoint {
                endpoint: lookup("STRATUS_S3_ENDPOINT"),
                region: lookup("STRATUS_S3_REGION").unwrap_or_else(default_region),
                access_key,
                secret_key,
                credentials_url: lookup("STRATUS_S3_CREDENTIALS_URL"),
            }),
            _ => None,
        };

        let poll_interval = lookup("STRATUS_POLL_INTERVAL")
            .map(|s| parse_duration(&s))
            .transpose()
            .map_err(|e| ProviderError::validation(format!("STRATUS_POLL_INTERVAL: {}", e)))?;

        Ok(Self {
            vcd,
            s3,
            poll_interval,
        })
    }

    /// Fill every block missing from `self` from `fallback`
    pub fn or(self, fallback: ProviderConfig) -> Self {
        Self {
            vcd: self.vcd.or(fallback.vcd),
            s3: self.s3.or(fallback.s3),
            poll_interval: self.poll_interval.or(fallback.poll_interval),
        }
    }

    pub fn vcd(&self) -> ProviderResult<&VcdEndpoint> {
        self.vcd
            .as_ref()
            .ok_or_else(|| ProviderError::validation("provider block has no vcd configuration"))
    }

    pub fn s3(&self) -> ProviderResult<&S3Endpoint> {
        self.s3
            .as_ref()
            .ok_or_else(|| ProviderError::validation("provider block has no s3 configuration"))
    }
}
