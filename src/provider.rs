//! The provider: a fixed registry of resources and the operations that drive
//! them against the remote API.
//!
//! Every operation follows the same sequence: expand locally, make the remote
//! call, flatten the response. Configuration problems are reported before
//! anything is sent, and the remote part of each operation runs under the
//! deadline configured for it.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::client::ApiClient;
use crate::config::ProviderConfig;
use crate::diff;
use crate::error::ReconcileError;
use crate::resources::{self, Resource};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, PlanResult, ReadOutcome, ReadResult};
use crate::validation::validate;
use crate::value::ConfigValue;

/// Manages the resources in [`resources::all`] through an [`ApiClient`].
pub struct Provider<C: ApiClient> {
    config: ProviderConfig,
    client: C,
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
}

impl<C: ApiClient> Provider<C> {
    /// Create a provider without checking the configuration.
    pub fn new(config: ProviderConfig, client: C) -> Self {
        let resources = resources::all()
            .into_iter()
            .map(|resource| (resource.type_name(), resource))
            .collect();
        Self {
            config,
            client,
            resources,
        }
    }

    /// Create a provider, rejecting an invalid configuration.
    pub fn try_new(config: ProviderConfig, client: C) -> Result<Self, ReconcileError> {
        config.validate()?;
        Ok(Self::new(config, client))
    }

    /// The provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The API client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Names of every managed resource type, sorted.
    pub fn resource_types(&self) -> Vec<&'static str> {
        self.resources.keys().copied().collect()
    }

    /// Schemas for the provider configuration and every resource type.
    pub fn schema(&self) -> ProviderSchema {
        self.resources.iter().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, (name, resource)| schema.with_resource(*name, resource.schema()),
        )
    }

    /// Look up a resource type.
    pub fn resource(&self, resource_type: &str) -> Result<&dyn Resource, ReconcileError> {
        self.resources
            .get(resource_type)
            .map(|resource| resource.as_ref())
            .ok_or_else(|| ReconcileError::UnknownResource(resource_type.to_string()))
    }

    /// Every problem with a resource configuration, as diagnostics.
    ///
    /// Problems with the configuration are diagnostics, not errors; only an
    /// unknown resource type fails.
    pub fn validate_resource_config(
        &self,
        resource_type: &str,
        config: &ConfigValue,
    ) -> Result<Vec<Diagnostic>, ReconcileError> {
        let resource = self.resource(resource_type)?;
        let mut diagnostics = validate(&resource.schema(), config);
        if !diagnostics.iter().any(Diagnostic::is_error) {
            if let Err(err) = resource.resource_id(config, &self.config) {
                diagnostics.push(err.into());
            } else if let Err(err) = resource.expand(config) {
                diagnostics.push(err.into());
            }
        }
        Ok(diagnostics)
    }

    /// Plan `desired` against `observed`, or a creation when there is no
    /// observed state.
    pub fn plan(
        &self,
        resource_type: &str,
        desired: &ConfigValue,
        observed: Option<&ConfigValue>,
    ) -> Result<PlanResult, ReconcileError> {
        let schema = self.resource(resource_type)?.schema();
        match observed {
            Some(observed) => diff::plan(desired, observed, &schema),
            None => diff::plan_create(desired, &schema),
        }
    }

    /// Create a resource.
    ///
    /// Fails with [`ReconcileError::AlreadyExists`] when the remote resource is
    /// already there; it has to be imported instead.
    #[instrument(skip(self, desired))]
    pub async fn create(
        &self,
        resource_type: &str,
        desired: &ConfigValue,
    ) -> Result<ReadResult, ReconcileError> {
        let resource = self.resource(resource_type)?;
        let id = resource.resource_id(desired, &self.config)?;
        let body = resource.expand(desired)?;
        debug!(%id, "creating");

        let response = with_timeout("create", self.config.timeouts.create(), async {
            match self.client.get(&id).await {
                Ok(_) => return Err(ReconcileError::AlreadyExists(id.clone())),
                Err(ReconcileError::NotFound(_)) => {},
                Err(err) => return Err(err),
            }
            self.client.put(&id, body).await
        })
        .await?;

        let flattened = resource.flatten(&id, &response)?;
        info!(%id, "created");
        Ok(ReadResult {
            id,
            state: flattened.config,
            diagnostics: flattened.diagnostics,
        })
    }

    /// Read a resource.
    ///
    /// A resource that no longer exists is [`ReadOutcome::Gone`], not an
    /// error.
    #[instrument(skip(self))]
    pub async fn read(&self, resource_type: &str, id: &str) -> Result<ReadOutcome, ReconcileError> {
        let resource = self.resource(resource_type)?;
        let fetched = with_timeout("read", self.config.timeouts.read(), self.client.get(id)).await;
        let response = match fetched {
            Ok(response) => response,
            Err(ReconcileError::NotFound(_)) => {
                info!(%id, "resource is gone, removing from state");
                return Ok(ReadOutcome::Gone);
            },
            Err(err) => return Err(err),
        };

        let flattened = resource.flatten(id, &response)?;
        for diagnostic in &flattened.diagnostics {
            warn!(%id, attribute = ?diagnostic.attribute, "{}", diagnostic.summary);
        }
        Ok(ReadOutcome::Found(ReadResult {
            id: id.to_string(),
            state: flattened.config,
            diagnostics: flattened.diagnostics,
        }))
    }

    /// Update a resource in place.
    ///
    /// Refuses with [`ReconcileError::RequiresReplace`] when the plan needs a
    /// replacement; nothing is sent in that case. A plan without changes
    /// returns the planned state without calling the API.
    #[instrument(skip(self, desired, observed))]
    pub async fn update(
        &self,
        resource_type: &str,
        desired: &ConfigValue,
        observed: &ConfigValue,
    ) -> Result<ReadResult, ReconcileError> {
        let resource = self.resource(resource_type)?;
        let plan = diff::plan(desired, observed, &resource.schema())?;
        if plan.requires_replace() {
            let fields: Vec<&str> = plan
                .changes
                .iter()
                .filter(|change| change.requires_replace())
                .map(|change| change.path.as_str())
                .collect();
            return Err(ReconcileError::RequiresReplace(fields.join(", ")));
        }

        let id = resource.resource_id(&plan.planned_state, &self.config)?;
        if plan.is_noop() {
            debug!(%id, "nothing to update");
            return Ok(ReadResult {
                id,
                state: plan.planned_state,
                diagnostics: Vec::new(),
            });
        }

        // planned state carries computed fields such as the etag
        let body = resource.expand(&plan.planned_state)?;
        let response = with_timeout(
            "update",
            self.config.timeouts.update(),
            self.client.put(&id, body),
        )
        .await?;

        let flattened = resource.flatten(&id, &response)?;
        info!(%id, changes = plan.changes.len(), "updated");
        Ok(ReadResult {
            id,
            state: flattened.config,
            diagnostics: flattened.diagnostics,
        })
    }

    /// Delete a resource. Deleting one that is already gone succeeds.
    #[instrument(skip(self))]
    pub async fn delete(&self, resource_type: &str, id: &str) -> Result<(), ReconcileError> {
        let resource = self.resource(resource_type)?;
        resource.importer_check(id)?;
        let deleted = with_timeout(
            "delete",
            self.config.timeouts.delete(),
            self.client.delete(id),
        )
        .await;
        match deleted {
            Ok(()) => {
                info!(%id, "deleted");
                Ok(())
            },
            Err(ReconcileError::NotFound(_)) => {
                debug!(%id, "already deleted");
                Ok(())
            },
            Err(err) => Err(err),
        }
    }

    /// Import an existing resource by id.
    #[instrument(skip(self))]
    pub async fn import(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<ImportedResource, ReconcileError> {
        self.resource(resource_type)?.importer_check(id)?;
        match self.read(resource_type, id).await? {
            ReadOutcome::Found(result) => {
                info!(%id, "imported");
                Ok(ImportedResource::new(resource_type, result.id, result.state))
            },
            ReadOutcome::Gone => Err(ReconcileError::NotFound(id.to_string())),
        }
    }
}

async fn with_timeout<T, F>(operation: &str, limit: Duration, future: F) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, ReconcileError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ReconcileError::DeadlineExceeded(format!(
            "{} did not complete within {}s",
            operation,
            limit.as_secs()
        ))),
    }
}
