//! Reconcile - Generic CRUD driver for typed resource kinds
//!
//! A `ResourceKind` implements the remote side of one resource type on typed
//! models. `Reconciler` wraps it with everything every kind shares: schema
//! validation before any remote call, per-verb timeouts, client binding,
//! the read-after-write that fills computed attributes, drift detection on
//! update and absence-tolerant delete. `Registry` exposes a set of
//! reconcilers through the dynamic `Provider` interface.

use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::OnceCell;

use crate::context::{OperationContext, Verb};
use crate::differ::{self, Diff};
use crate::model::Model;
use crate::provider::{
    BoxFuture, Provider, ProviderError, ProviderResult, ResourceType,
};
use crate::resource::{Attributes, Resource, ResourceId, State};
use crate::schema::ResourceSchema;
use crate::timeouts::{TIMEOUTS_ATTRIBUTE, Timeouts};

/// Outcome of reading a remote object
#[derive(Debug)]
pub enum ReadOutcome<M> {
    /// The object exists; the model reflects what the remote reports
    Found(M),
    /// The object is definitely gone
    NotFound,
    /// The read failed while the object may still exist; state must be kept
    Indeterminate { prior: M, error: ProviderError },
}

impl<M> ReadOutcome<M> {
    /// Classify a failed read: not-found errors mean absence, anything else
    /// leaves the object's existence undecided.
    pub fn from_error(prior: &M, error: ProviderError) -> Self
    where
        M: Clone,
    {
        if error.is_not_found() {
            ReadOutcome::NotFound
        } else {
            ReadOutcome::Indeterminate {
                prior: prior.clone(),
                error,
            }
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ReadOutcome::Found(_))
    }
}

/// Remote behaviour of one resource type
#[async_trait]
pub trait ResourceKind: Send + Sync + 'static {
    type Model: Model;
    type Client: Send + Sync + 'static;

    /// Resource type name (e.g. "s3_bucket_cors_configuration")
    const TYPE_NAME: &'static str;

    fn schema(&self) -> ResourceSchema;

    fn default_timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Whether the kind can be read as a data source
    fn has_data_source(&self) -> bool {
        false
    }

    /// Local checks on a plan that need no remote call. Runs before the
    /// client is bound; `prior` is set on update.
    fn validate_plan(
        &self,
        _plan: &Self::Model,
        _prior: Option<&Self::Model>,
    ) -> ProviderResult<()> {
        Ok(())
    }

    /// Bind the configured remote client. Runs once per reconciler.
    async fn init(&self, ctx: &OperationContext) -> ProviderResult<Self::Client>;

    /// Create the remote object and return the plan with its identity set.
    ///
    /// Computed attributes are filled in by the read that follows.
    async fn create(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        plan: &Self::Model,
    ) -> ProviderResult<Self::Model>;

    async fn read(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &Self::Model,
    ) -> ReadOutcome<Self::Model>;

    /// Apply `plan` in place. Kinds whose remote object is immutable keep the
    /// default, which asks for replacement.
    async fn update(
        &self,
        _ctx: &OperationContext,
        _client: &Self::Client,
        _prior: &Self::Model,
        _plan: &Self::Model,
    ) -> ProviderResult<Self::Model> {
        Err(ProviderError::validation(format!(
            "{} cannot be updated in place; it must be replaced",
            Self::TYPE_NAME
        )))
    }

    /// Delete the remote object. A not-found error counts as success.
    async fn delete(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        state: &Self::Model,
    ) -> ProviderResult<()>;

    /// Model holding only the identity encoded in an import id
    fn import_model(&self, import_id: &str) -> ProviderResult<Self::Model>;

    /// Find an existing object for a data source query
    async fn lookup(
        &self,
        ctx: &OperationContext,
        client: &Self::Client,
        query: &Self::Model,
    ) -> ProviderResult<Self::Model> {
        match self.read(ctx, client, query).await {
            ReadOutcome::Found(model) => Ok(model),
            ReadOutcome::NotFound => Err(ProviderError::not_found(format!(
                "no {} matches the query",
                Self::TYPE_NAME
            ))),
            ReadOutcome::Indeterminate { error, .. } => Err(error),
        }
    }
}

/// Object-safe view of a reconciler, keyed by resource type name
#[async_trait]
pub trait DynamicResource: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn has_data_source(&self) -> bool;

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<State>;

    async fn read(&self, ctx: &OperationContext, state: &State) -> ProviderResult<State>;

    async fn read_data_source(
        &self,
        ctx: &OperationContext,
        resource: &Resource,
    ) -> ProviderResult<State>;

    async fn update(
        &self,
        ctx: &OperationContext,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State>;

    async fn delete(&self, ctx: &OperationContext, state: &State) -> ProviderResult<()>;

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &ResourceId,
        import_id: &str,
    ) -> ProviderResult<State>;
}

/// Drives one `ResourceKind` through the reconciliation verbs
pub struct Reconciler<K: ResourceKind> {
    kind: K,
    client: OnceCell<K::Client>,
}

impl<K: ResourceKind> Reconciler<K> {
    pub fn new(kind: K) -> Self {
        Self {
            kind,
            client: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Bound client, initializing it on first use
    async fn client(&self, ctx: &OperationContext) -> ProviderResult<&K::Client> {
        self.client
            .get_or_try_init(|| async {
                debug!("initializing client for {}", K::TYPE_NAME);
                ctx.bounded(self.kind.init(ctx)).await
            })
            .await
            .map_err(|e| e.context(format!("configuring {}", K::TYPE_NAME)))
    }

    fn timeouts(&self, attributes: &Attributes) -> ProviderResult<Timeouts> {
        Ok(Timeouts::from_attributes(
            attributes,
            self.kind.default_timeouts(),
        )?)
    }

    fn validate(&self, resource: &Resource) -> ProviderResult<()> {
        self.kind
            .schema()
            .validate(&resource.attributes)
            .map_err(|errors| ProviderError::from(errors).for_resource(resource.id.clone()))
    }

    /// Read the object back and require that it exists
    async fn read_back(
        &self,
        ctx: &OperationContext,
        client: &K::Client,
        model: &K::Model,
    ) -> ProviderResult<K::Model> {
        let read_ctx = ctx.for_verb(Verb::Read);
        let outcome = read_ctx
            .run(self.kind.read(&read_ctx, client, model))
            .await?;
        match outcome {
            ReadOutcome::Found(model) => Ok(model),
            ReadOutcome::NotFound => Err(ProviderError::new(format!(
                "{} not found right after {}",
                K::TYPE_NAME,
                ctx.verb()
            ))),
            ReadOutcome::Indeterminate { error, .. } => Err(error),
        }
    }

    /// Build the state from a model, carrying over operation settings that
    /// live only in configuration
    fn state_from_model(id: &ResourceId, model: &K::Model, carried: &Attributes) -> State {
        let mut attributes = model.to_attributes();
        if let Some(timeouts) = carried.get(TIMEOUTS_ATTRIBUTE) {
            attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), timeouts.clone());
        }
        let state = State::existing(id.clone(), attributes);
        match model.identity() {
            Some(identity) => state.with_identifier(identity),
            None => state,
        }
    }
}

#[async_trait]
impl<K: ResourceKind> DynamicResource for Reconciler<K> {
    fn type_name(&self) -> &'static str {
        K::TYPE_NAME
    }

    fn schema(&self) -> ResourceSchema {
        self.kind.schema().attribute(Timeouts::schema())
    }

    fn has_data_source(&self) -> bool {
        self.kind.has_data_source()
    }

    async fn create(&self, ctx: &OperationContext, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        self.validate(resource)?;
        let plan = K::Model::from_attributes(&resource.attributes)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        self.kind
            .validate_plan(&plan, None)
            .map_err(|e| e.for_resource(id.clone()))?;
        let timeouts = self
            .timeouts(&resource.attributes)
            .map_err(|e| e.for_resource(id.clone()))?;

        let op = ctx.child(timeouts.create);
        let client = self.client(&op).await.map_err(|e| e.for_resource(id.clone()))?;

        debug!("creating {}", id);
        let created = op
            .bounded(self.kind.create(&op, client, &plan))
            .await
            .map_err(|e| e.context("creating").for_resource(id.clone()))?;
        let observed = self
            .read_back(&op, client, &created)
            .await
            .map_err(|e| e.context("reading after create").for_resource(id.clone()))?;

        info!("created {}", id);
        Ok(Self::state_from_model(id, &observed, &resource.attributes))
    }

    async fn read(&self, ctx: &OperationContext, state: &State) -> ProviderResult<State> {
        if !state.exists {
            return Ok(state.clone());
        }
        let id = &state.id;
        let prior = K::Model::from_attributes(&state.attributes)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        let timeouts = self
            .timeouts(&state.attributes)
            .map_err(|e| e.for_resource(id.clone()))?;

        let op = ctx.child(timeouts.read);
        let client = self.client(&op).await.map_err(|e| e.for_resource(id.clone()))?;

        let outcome = op
            .run(self.kind.read(&op, client, &prior))
            .await
            .map_err(|e| ProviderError::from(e).context("reading").for_resource(id.clone()))?;
        match outcome {
            ReadOutcome::Found(model) => Ok(Self::state_from_model(id, &model, &state.attributes)),
            ReadOutcome::NotFound => {
                warn!("{} no longer exists, removing from state", id);
                Ok(State::not_found(id.clone()))
            }
            ReadOutcome::Indeterminate { error, .. } => {
                Err(error.context("reading").for_resource(id.clone()))
            }
        }
    }

    async fn read_data_source(
        &self,
        ctx: &OperationContext,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let id = &resource.id;
        if !self.kind.has_data_source() {
            return Err(ProviderError::validation(format!(
                "{} has no data source",
                K::TYPE_NAME
            ))
            .for_resource(id.clone()));
        }
        let query = K::Model::from_attributes(&resource.attributes)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        let timeouts = self
            .timeouts(&resource.attributes)
            .map_err(|e| e.for_resource(id.clone()))?;

        let op = ctx.child(timeouts.read);
        let client = self.client(&op).await.map_err(|e| e.for_resource(id.clone()))?;

        let found = op
            .bounded(self.kind.lookup(&op, client, &query))
            .await
            .map_err(|e| e.context("looking up").for_resource(id.clone()))?;
        Ok(Self::state_from_model(id, &found, &resource.attributes))
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let id = &to.id;
        self.validate(to)?;

        match differ::diff(to, from, &self.kind.schema()) {
            Diff::Create(_) => return self.create(ctx, to).await,
            Diff::NoChange(_) => {
                debug!("{} is up to date", id);
                let mut state = from.clone();
                match to.attributes.get(TIMEOUTS_ATTRIBUTE) {
                    Some(t) => state.attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), t.clone()),
                    None => state.attributes.remove(TIMEOUTS_ATTRIBUTE),
                };
                return Ok(state);
            }
            Diff::Replace {
                changed_attributes, ..
            } => {
                return Err(ProviderError::validation(format!(
                    "changing {} requires replacing the resource",
                    changed_attributes.join(", ")
                ))
                .for_resource(id.clone()));
            }
            Diff::Update {
                changed_attributes, ..
            } => debug!("updating {}: {}", id, changed_attributes.join(", ")),
        }

        let prior = K::Model::from_attributes(&from.attributes)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        let plan = K::Model::from_attributes(&to.attributes)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        self.kind
            .validate_plan(&plan, Some(&prior))
            .map_err(|e| e.for_resource(id.clone()))?;
        let timeouts = self
            .timeouts(&to.attributes)
            .map_err(|e| e.for_resource(id.clone()))?;

        let op = ctx.child(timeouts.update);
        let client = self.client(&op).await.map_err(|e| e.for_resource(id.clone()))?;

        let updated = op
            .bounded(self.kind.update(&op, client, &prior, &plan))
            .await
            .map_err(|e| e.context("updating").for_resource(id.clone()))?;
        let observed = self
            .read_back(&op, client, &updated)
            .await
            .map_err(|e| e.context("reading after update").for_resource(id.clone()))?;

        info!("updated {}", id);
        Ok(Self::state_from_model(id, &observed, &to.attributes))
    }

    async fn delete(&self, ctx: &OperationContext, state: &State) -> ProviderResult<()> {
        if !state.exists {
            return Ok(());
        }
        let id = &state.id;
        let model = K::Model::from_attributes(&state.attributes)
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        let timeouts = self
            .timeouts(&state.attributes)
            .map_err(|e| e.for_resource(id.clone()))?;

        let op = ctx.child(timeouts.delete);
        let client = self.client(&op).await.map_err(|e| e.for_resource(id.clone()))?;

        match op.bounded(self.kind.delete(&op, client, &model)).await {
            Ok(()) => {
                info!("deleted {}", id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} already gone", id);
                Ok(())
            }
            Err(e) => Err(e.context("deleting").for_resource(id.clone())),
        }
    }

    async fn import(
        &self,
        ctx: &OperationContext,
        id: &ResourceId,
        import_id: &str,
    ) -> ProviderResult<State> {
        let model = self
            .kind
            .import_model(import_id)
            .map_err(|e| e.for_resource(id.clone()))?;

        let op = ctx.child(self.kind.default_timeouts().read);
        let client = self.client(&op).await.map_err(|e| e.for_resource(id.clone()))?;

        let outcome = op
            .run(self.kind.read(&op, client, &model))
            .await
            .map_err(|e| ProviderError::from(e).context("importing").for_resource(id.clone()))?;
        match outcome {
            ReadOutcome::Found(found) => {
                info!("imported {} from '{}'", id, import_id);
                Ok(Self::state_from_model(id, &found, &Attributes::new()))
            }
            ReadOutcome::NotFound => Err(ProviderError::not_found(format!(
                "cannot import '{}': remote object does not exist",
                import_id
            ))
            .for_resource(id.clone())),
            ReadOutcome::Indeterminate { error, .. } => {
                Err(error.context("importing").for_resource(id.clone()))
            }
        }
    }
}

/// Resource type descriptor backed by a reconciler's schema
struct SchemaType {
    name: &'static str,
    schema: ResourceSchema,
    data_source: bool,
}

impl ResourceType for SchemaType {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schema(&self) -> ResourceSchema {
        self.schema.clone()
    }

    fn has_data_source(&self) -> bool {
        self.data_source
    }
}

/// Resource types of one provider, dispatched by type name
pub struct Registry {
    name: &'static str,
    resources: HashMap<&'static str, Box<dyn DynamicResource>>,
}

impl Registry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            resources: HashMap::new(),
        }
    }

    /// Register a kind under its type name
    pub fn register<K: ResourceKind>(mut self, kind: K) -> Self {
        self.resources
            .insert(K::TYPE_NAME, Box::new(Reconciler::new(kind)));
        self
    }

    pub fn get(&self, resource_type: &str) -> ProviderResult<&dyn DynamicResource> {
        self.resources
            .get(resource_type)
            .map(|r| r.as_ref())
            .ok_or_else(|| {
                ProviderError::validation(format!(
                    "provider '{}' has no resource type '{}'",
                    self.name, resource_type
                ))
            })
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.resources.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Provider for Registry {
    fn name(&self) -> &'static str {
        self.name
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        self.type_names()
            .into_iter()
            .filter_map(|name| self.resources.get(name))
            .map(|r| {
                Box::new(SchemaType {
                    name: r.type_name(),
                    schema: r.schema(),
                    data_source: r.has_data_source(),
                }) as Box<dyn ResourceType>
            })
            .collect()
    }

    fn read<'a>(
        &'a self,
        ctx: &'a OperationContext,
        state: &'a State,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move { self.get(&state.id.resource_type)?.read(ctx, state).await })
    }

    fn read_data_source<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            self.get(&resource.id.resource_type)?
                .read_data_source(ctx, resource)
                .await
        })
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OperationContext,
        resource: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            self.get(&resource.id.resource_type)?
                .create(ctx, resource)
                .await
        })
    }

    fn update<'a>(
        &'a self,
        ctx: &'a OperationContext,
        from: &'a State,
        to: &'a Resource,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move { self.get(&to.id.resource_type)?.update(ctx, from, to).await })
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a OperationContext,
        state: &'a State,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move { self.get(&state.id.resource_type)?.delete(ctx, state).await })
    }

    fn import<'a>(
        &'a self,
        ctx: &'a OperationContext,
        id: &'a ResourceId,
        import_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move {
            self.get(&id.resource_type)?
                .import(ctx, id, import_id)
                .await
        })
    }
}
