//! s3_bucket_acl - Canned ACL or explicit access-control policy of a bucket
//!
//! The two representations are exclusive. When the canned form is configured
//! the state keeps it as written and leaves the grant list unset, since the
//! remote only ever reports the grants a canned ACL expands to.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stratus_core::attr::{Attr, AttrValue, field, get_attr, put_attr};
use stratus_core::context::OperationContext;
use stratus_core::model::{Model, Translate, stable_order};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::reconcile::{ReadOutcome, ResourceKind};
use stratus_core::resource::{Attributes, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError};

use super::{bucket_attribute, observe, require};
use crate::api::ObjectStorageApi;
use crate::client::S3Connector;
use crate::wire::{AccessControlPolicy, AclRequest, Grant, Grantee, Owner};

const CANNED_ACLS: &[&str] = &[
    "private",
    "public-read",
    "public-read-write",
    "authenticated-read",
    "aws-exec-read",
    "bucket-owner-read",
    "bucket-owner-full-control",
    "log-delivery-write",
];

const PERMISSIONS: &[&str] = &["FULL_CONTROL", "READ", "READ_ACP", "WRITE", "WRITE_ACP"];

const GRANTEE_TYPES: &[&str] = &["CanonicalUser", "Group", "AmazonCustomerByEmail"];

/// ACL applied when the resource is deleted
const DEFAULT_ACL: &str = "private";

fn enum_of(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|v| v.to_string()).collect())
}

fn object_of(value: &Value, what: &str) -> Result<HashMap<String, Value>, TypeError> {
    match value {
        Value::Map(map) => Ok(map.clone()),
        other => Err(TypeError::mismatch(what, other)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GranteeBlock {
    pub grantee_type: Attr<String>,
    pub id: Attr<String>,
    pub uri: Attr<String>,
    pub email_address: Attr<String>,
    pub display_name: Attr<String>,
}

impl AttrValue for GranteeBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "type", &self.grantee_type);
        put_attr(&mut map, "id", &self.id);
        put_attr(&mut map, "uri", &self.uri);
        put_attr(&mut map, "email_address", &self.email_address);
        put_attr(&mut map, "display_name", &self.display_name);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = object_of(value, "Grantee")?;
        Ok(Self {
            grantee_type: field(&map, "type")?,
            id: field(&map, "id")?,
            uri: field(&map, "uri")?,
            email_address: field(&map, "email_address")?,
            display_name: field(&map, "display_name")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GrantBlock {
    pub grantee: Attr<GranteeBlock>,
    pub permission: Attr<String>,
}

impl AttrValue for GrantBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "grantee", &self.grantee);
        put_attr(&mut map, "permission", &self.permission);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = object_of(value, "Grant")?;
        Ok(Self {
            grantee: field(&map, "grantee")?,
            permission: field(&map, "permission")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OwnerBlock {
    pub id: Attr<String>,
    pub display_name: Attr<String>,
}

impl AttrValue for OwnerBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "id", &self.id);
        put_attr(&mut map, "display_name", &self.display_name);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = object_of(value, "Owner")?;
        Ok(Self {
            id: field(&map, "id")?,
            display_name: field(&map, "display_name")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessControlPolicyBlock {
    pub owner: Attr<OwnerBlock>,
    pub grant: Attr<Vec<GrantBlock>>,
}

impl AttrValue for AccessControlPolicyBlock {
    fn to_value(&self) -> Value {
        let mut map = HashMap::new();
        put_attr(&mut map, "owner", &self.owner);
        put_attr(&mut map, "grant", &self.grant);
        Value::Map(map)
    }

    fn from_value(value: &Value) -> Result<Self, TypeError> {
        let map = object_of(value, "AccessControlPolicy")?;
        Ok(Self {
            owner: field(&map, "owner")?,
            grant: field(&map, "grant")?,
        })
    }
}

impl Translate for GrantBlock {
    type Wire = Grant;

    fn to_remote(&self) -> Grant {
        let grantee = self.grantee.as_known().cloned().unwrap_or_default();
        Grant {
            grantee: Grantee {
                grantee_type: grantee.grantee_type.known_or_default(),
                id: grantee.id.into_option(),
                uri: grantee.uri.into_option(),
                email_address: grantee.email_address.into_option(),
                display_name: grantee.display_name.into_option(),
            },
            permission: self.permission.known_or_default(),
        }
    }

    fn from_remote(wire: &Grant, prior: &Self) -> Self {
        let prior_grantee = prior.grantee.as_known().cloned().unwrap_or_default();
        let g = &wire.grantee;
        GrantBlock {
            grantee: Attr::Known(GranteeBlock {
                grantee_type: Attr::known(g.grantee_type.clone()),
                id: Attr::from_option(g.id.clone()),
                uri: Attr::from_option(g.uri.clone()),
                // Email grantees come back as canonical users
                email_address: Attr::reported(
                    g.email_address.clone(),
                    &prior_grantee.email_address,
                ),
                display_name: Attr::from_option(g.display_name.clone()),
            }),
            permission: Attr::known(wire.permission.clone()),
        }
    }
}

impl Translate for AccessControlPolicyBlock {
    type Wire = AccessControlPolicy;

    fn to_remote(&self) -> AccessControlPolicy {
        let owner = self.owner.as_known().cloned().unwrap_or_default();
        AccessControlPolicy {
            owner: Owner {
                id: owner.id.into_option(),
                display_name: owner.display_name.into_option(),
            },
            grants: self
                .grant
                .as_known()
                .map(|grants| grants.iter().map(Translate::to_remote).collect())
                .unwrap_or_default(),
        }
    }

    fn from_remote(wire: &AccessControlPolicy, prior: &Self) -> Self {
        let prior_grants = prior.grant.as_known().cloned().unwrap_or_default();
        let grants: Vec<GrantBlock> = wire
            .grants
            .iter()
            .map(|grant| {
                let matching = prior_grants
                    .iter()
                    .find(|p| p.permission.as_known() == Some(&grant.permission))
                    .cloned()
                    .unwrap_or_default();
                GrantBlock::from_remote(grant, &matching)
            })
            .collect();

        AccessControlPolicyBlock {
            owner: Attr::Known(OwnerBlock {
                id: Attr::from_option(wire.owner.id.clone()),
                display_name: Attr::from_option(wire.owner.display_name.clone()),
            }),
            grant: Attr::Known(stable_order(grants, &prior_grants)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketAclModel {
    pub bucket: Attr<String>,
    pub acl: Attr<String>,
    pub access_control_policy: Attr<AccessControlPolicyBlock>,
}

impl Model for BucketAclModel {
    fn from_attributes(attributes: &Attributes) -> Result<Self, TypeError> {
        Ok(Self {
            bucket: get_attr(attributes, "bucket")?,
            acl: get_attr(attributes, "acl")?,
            access_control_policy: get_attr(attributes, "access_control_policy")?,
        })
    }

    fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        put_attr(&mut attrs, "bucket", &self.bucket);
        put_attr(&mut attrs, "acl", &self.acl);
        put_attr(&mut attrs, "access_control_policy", &self.access_control_policy);
        attrs
    }

    fn identity(&self) -> Option<String> {
        self.bucket.as_known().cloned()
    }
}

impl BucketAclModel {
    /// The request for whichever representation is configured
    fn request(&self) -> ProviderResult<AclRequest> {
        match (&self.acl, &self.access_control_policy) {
            (Attr::Known(canned), _) => Ok(AclRequest::Canned(canned.clone())),
            (_, Attr::Known(policy)) => Ok(AclRequest::Policy(policy.to_remote())),
            _ => Err(ProviderError::validation(
                "one of 'acl' or 'access_control_policy' must be set",
            )),
        }
    }

    fn observed(&self, wire: &AccessControlPolicy) -> Self {
        if self.acl.is_known() {
            return Self {
                bucket: self.bucket.clone(),
                acl: self.acl.clone(),
                access_control_policy: Attr::Null,
            };
        }
        let prior = self
            .access_control_policy
            .as_known()
            .cloned()
            .unwrap_or_default();
        Self {
            bucket: self.bucket.clone(),
            acl: Attr::Null,
            access_control_policy: Attr::Known(AccessControlPolicyBlock::from_remote(
                wire, &prior,
            )),
        }
    }
}

fn grantee_schema() -> AttributeType {
    AttributeType::Object(vec![
        AttributeSchema::new("type", enum_of(GRANTEE_TYPES)).required(),
        AttributeSchema::new("id", AttributeType::String),
        AttributeSchema::new("uri", AttributeType::String),
        AttributeSchema::new("email_address", AttributeType::String),
        AttributeSchema::new("display_name", AttributeType::String).computed(),
    ])
}

fn policy_schema() -> AttributeType {
    AttributeType::Object(vec![
        AttributeSchema::new(
            "owner",
            AttributeType::Object(vec![
                AttributeSchema::new("id", AttributeType::String).required(),
                AttributeSchema::new("display_name", AttributeType::String),
            ]),
        )
        .required(),
        AttributeSchema::new(
            "grant",
            AttributeType::Set(Box::new(AttributeType::Object(vec![
                AttributeSchema::new("grantee", grantee_schema()).required(),
                AttributeSchema::new("permission", enum_of(PERMISSIONS)).required(),
            ]))),
        ),
    ])
}

pub struct BucketAclKind {
    connector: Arc<S3Connector>,
}

impl BucketAclKind {
    pub fn new(connector: Arc<S3Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ResourceKind for BucketAclKind {
    type Model = BucketAclModel;
    type Client = Arc<dyn ObjectStorageApi>;
    const TYPE_NAME: &'static str = "s3_bucket_acl";

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(Self::TYPE_NAME)
            .with_description("Access control list of a bucket")
            .attribute(bucket_attribute())
            .attribute(
                AttributeSchema::new("acl", enum_of(CANNED_ACLS))
                    .with_description("Canned ACL applied to the bucket"),
            )
            .attribute(
                AttributeSchema::new("access_control_policy", policy_schema())
                    .with_description("Explicit owner and grants"),
            )
            .exactly_one_of(&["acl", "access_control_policy"])
    }

    async fn init(&self, _ctx: &OperationContext) -> ProviderResult<Self::Client> {
        self.connector.storage().await
    }

    async fn create(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        plan: &BucketAclModel,
    ) -> ProviderResult<BucketAclModel> {
        let bucket = require(&plan.bucket, "bucket")?;
        client
            .put_bucket_acl(bucket, &plan.request()?)
            .await
            .map_err(|e| ProviderError::from(e).context("putting bucket ACL"))?;
        Ok(plan.clone())
    }

    async fn read(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &BucketAclModel,
    ) -> ReadOutcome<BucketAclModel> {
        let bucket = match require(&state.bucket, "bucket") {
            Ok(b) => b,
            Err(e) => return ReadOutcome::from_error(state, e),
        };
        observe(
            client.get_bucket_acl(bucket).await,
            state,
            "reading bucket ACL",
            |wire| state.observed(&wire),
        )
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        _prior: &BucketAclModel,
        plan: &BucketAclModel,
    ) -> ProviderResult<BucketAclModel> {
        self.create(ctx, client, plan).await
    }

    async fn delete(
        &self,
        _ctx: &OperationContext,
        client: &Self::Client,
        state: &BucketAclModel,
    ) -> ProviderResult<()> {
        let bucket = require(&state.bucket, "bucket")?;
        client
            .put_bucket_acl(bucket, &AclRequest::Canned(DEFAULT_ACL.to_string()))
            .await
            .map_err(|e| ProviderError::from(e).context("resetting bucket ACL"))
    }

    fn import_model(&self, import_id: &str) -> ProviderResult<BucketAclModel> {
        // `bucket,canned-acl` keeps the canned form on import
        let (bucket, acl) = match import_id.split_once(',') {
            Some((bucket, acl)) => (bucket, Attr::<String>::known(acl)),
            None => (import_id, Attr::Null),
        };
        if let Attr::Known(canned) = &acl
            && !CANNED_ACLS.contains(&canned.as_str())
        {
            return Err(ProviderError::validation(format!(
                "import id '{}' names unknown canned ACL '{}', expected one of: {}",
                import_id,
                canned,
                CANNED_ACLS.join(", ")
            )));
        }
        Ok(BucketAclModel {
            bucket: Attr::known(bucket),
            acl,
            access_control_policy: Attr::Null,
        })
    }
}
