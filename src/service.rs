//! The host-facing operation set.
//!
//! One method per protocol call the host makes. The wire encoding is owned
//! by the host SDK; an adapter maps its messages onto this trait.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::diff::Plan;
use crate::error::{ApplyError, ProviderError};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, ProviderMetadata};

/// Operations a provider serves to the host.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Schemas of the provider config, every resource and every data source.
    fn schema(&self) -> ProviderSchema;

    /// Names of resources and data sources. Derived from the schema by default.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Check the options map without configuring.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// One-time configuration.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Cancel everything in flight.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// ValidateResourceConfig.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// PlanResourceChange. `desired` is `Null` when the resource is being destroyed.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        desired: Value,
    ) -> Result<Plan, ProviderError>;

    /// ApplyResourceChange. Returns `None` once the resource is gone.
    async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        desired: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ApplyError>;

    /// ReadResource. Returns `None` when the object was deleted out of band.
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ProviderError>;

    /// ImportResource.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ImportedResource>, ProviderError>;

    /// Create through [`ProviderService::apply`].
    async fn create(
        &self,
        resource_type: &str,
        desired: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ApplyError> {
        self.apply(resource_type, None, Some(desired), cancel)
            .await?
            .ok_or_else(|| {
                ApplyError::clean(ProviderError::NotFound(format!(
                    "{} disappeared during create",
                    resource_type
                )))
            })
    }

    /// Update through [`ProviderService::apply`].
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        desired: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ApplyError> {
        let prior = prior_state.clone();
        self.apply(resource_type, Some(prior_state), Some(desired), cancel)
            .await?
            .ok_or_else(|| {
                ApplyError::partial(
                    ProviderError::NotFound(format!("{} disappeared during update", resource_type)),
                    prior,
                )
            })
    }

    /// Delete through [`ProviderService::apply`].
    async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
        cancel: &CancellationToken,
    ) -> Result<(), ApplyError> {
        self.apply(resource_type, Some(current_state), None, cancel)
            .await
            .map(|_| ())
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's arguments.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError>;

    /// ReadDataSource.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ProviderError>;
}
