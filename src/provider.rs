//! The provider envelope.
//!
//! [`LinodeProvider`] parses the Configure options once, builds the single
//! shared [`Client`] and serves every later call through the [`Engine`].
//! Every operation is linked to a root cancellation token that
//! [`ProviderService::stop`] fires.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{Client, HttpTransport, Transport};
use crate::config::{ProviderConfig, TOKEN_ENV};
use crate::diff::Plan;
use crate::engine::{check_config, plan_change, Engine};
use crate::error::{ApplyError, ProviderError};
use crate::registry::Registry;
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, ProviderMetadata};
use crate::validation::validate;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// The Linode provider.
pub struct LinodeProvider {
    registry: Arc<Registry>,
    transport: Option<Arc<dyn Transport>>,
    env: EnvLookup,
    engine: OnceLock<Engine>,
    root: CancellationToken,
}

impl std::fmt::Debug for LinodeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinodeProvider")
            .field("registry", &self.registry)
            .field("configured", &self.engine.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Default for LinodeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LinodeProvider {
    /// Every resource kind and data source, talking HTTP once configured.
    pub fn new() -> Self {
        Self::with_registry(crate::resources::registry())
    }

    /// A provider over a custom registry.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            transport: None,
            env: Arc::new(|key| std::env::var(key).ok()),
            engine: OnceLock::new(),
            root: CancellationToken::new(),
        }
    }

    /// Send requests through `transport` instead of HTTP.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolve environment fallbacks through `env`.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// The engine, once configured.
    pub fn engine(&self) -> Result<&Engine, ProviderError> {
        self.engine.get().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }

    fn resolve(&self, options: &Value) -> Result<ProviderConfig, ProviderError> {
        let env = self.env.clone();
        ProviderConfig::from_options_with_env(options, move |key| env(key))
    }

    /// Run `op` with a token that fires when either the caller's token or
    /// the provider's root token does.
    async fn linked<F, Fut, T>(&self, cancel: &CancellationToken, op: F) -> T
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let token = cancel.child_token();
        if self.root.is_cancelled() {
            token.cancel();
        }
        let fut = op(token.clone());
        tokio::pin!(fut);
        tokio::select! {
            out = &mut fut => out,
            _ = self.root.cancelled() => {
                token.cancel();
                fut.await
            },
        }
    }
}

fn config_diagnostic(err: ProviderError) -> Vec<Diagnostic> {
    match err {
        ProviderError::Configuration(message) if message.contains(TOKEN_ENV) => {
            vec![Diagnostic::error(message).with_attribute("token")]
        },
        other => other.into_diagnostics(),
    }
}

#[async_trait::async_trait]
impl ProviderService for LinodeProvider {
    fn schema(&self) -> ProviderSchema {
        self.registry.provider_schema()
    }

    fn metadata(&self) -> ProviderMetadata {
        self.registry.metadata()
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validate(&crate::config::provider_schema(), &config);
        if diagnostics.is_empty() {
            if let Err(e) = self.resolve(&config) {
                diagnostics.extend(config_diagnostic(e));
            }
        }
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        if self.engine.get().is_some() {
            return Err(ProviderError::Configuration(
                "provider is already configured".to_string(),
            ));
        }
        let diagnostics = validate(&crate::config::provider_schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }
        let resolved = match self.resolve(&config) {
            Ok(resolved) => resolved,
            Err(e) => return Ok(config_diagnostic(e)),
        };

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(
                HttpTransport::new(resolved.transport_config())
                    .map_err(|e| ProviderError::Configuration(e.to_string()))?,
            ),
        };
        let client = Client::new(transport).with_paging(resolved.page_size, resolved.max_pages);

        let mut warnings = Vec::new();
        if resolved.skip_instance_ready_poll {
            warnings.push(
                Diagnostic::warning("instances will not be polled until ready")
                    .with_attribute("skip_instance_ready_poll"),
            );
        }

        info!(
            base_url = %resolved.base_url(),
            user_agent = %resolved.user_agent(),
            "Configured provider"
        );
        let engine = Engine::new(self.registry.clone(), client, Arc::new(resolved));
        self.engine.set(engine).map_err(|_| {
            ProviderError::Configuration("provider is already configured".to_string())
        })?;
        Ok(warnings)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        warn!("Stop requested; cancelling in-flight operations");
        self.root.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        Ok(check_config(resource.as_ref(), &config))
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        desired: Value,
    ) -> Result<Plan, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        if desired.is_null() {
            return Ok(match prior_state {
                Some(prior) => Plan::destroy(&resource.schema(), &prior),
                None => Plan {
                    entries: Vec::new(),
                    requires_replace: false,
                    planned_state: Value::Null,
                },
            });
        }
        plan_change(resource.as_ref(), prior_state.as_ref(), &desired)
    }

    async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        desired: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ApplyError> {
        let engine = self.engine()?;
        self.linked(cancel, |token| async move {
            engine
                .apply(resource_type, prior_state.as_ref(), desired.as_ref(), &token)
                .await
        })
        .await
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ProviderError> {
        let engine = self.engine()?;
        self.linked(cancel, |token| async move {
            engine.read(resource_type, &current_state, &token).await
        })
        .await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let engine = self.engine()?;
        self.linked(cancel, |token| async move {
            engine.import(resource_type, id, &token).await
        })
        .await
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let source = self.registry.data_source(data_source_type)?;
        Ok(validate(&source.schema(), &config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ProviderError> {
        let engine = self.engine()?;
        self.linked(cancel, |token| async move {
            engine.read_data_source(data_source_type, &config, &token).await
        })
        .await
    }
}
