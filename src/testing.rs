//! Testing utilities.
//!
//! [`MockTransport`] replays scripted responses for unit tests of client,
//! resource and data source code. [`ProviderTester`] drives any
//! [`ProviderService`] the way the host would, without a wire protocol.
//!
//! # Example
//!
//! ```ignore
//! use linode_provider::testing::{MockTransport, ProviderTester};
//! use linode_provider::LinodeProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_sshkey() {
//!     let api = MockTransport::new();
//!     let tester = ProviderTester::new(LinodeProvider::new().with_transport(Arc::new(api)));
//!     tester.configure(json!({"token": "test"})).await.unwrap();
//!
//!     let state = tester
//!         .create("linode_sshkey", json!({"label": "laptop", "ssh_key": "ssh-ed25519 AAAA"}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["label"], "laptop");
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiRequest, ApiResponse, ClientError, Method, Transport};
use crate::diff::{Plan, PlanAction};
use crate::error::{ApplyError, ProviderError};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::types::ImportedResource;

#[derive(Default)]
struct Script {
    responses: HashMap<(Method, String), VecDeque<ApiResponse>>,
    requests: Vec<ApiRequest>,
}

/// A transport that answers from a script and records every request.
///
/// Responses queue per `(method, path)`; the last one for a key repeats.
/// Unscripted requests get a 404.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

impl MockTransport {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn respond(&self, method: Method, path: &str, response: ApiResponse) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script
            .responses
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        let script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.requests.clone()
    }

    /// Requests matching `method path`.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let key = (request.method, request.path.clone());
        script.requests.push(request);
        let response = match script.responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| ApiResponse::error(404, "Not found")))
    }
}

/// A test harness for provider implementations.
///
/// Wraps a [`ProviderService`] and supplies a fresh cancellation token per
/// call, mirroring what the host does.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        desired: Value,
    ) -> Result<Plan, ProviderError> {
        self.provider.plan(resource_type, None, desired).await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        desired: Value,
    ) -> Result<Plan, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), desired)
            .await
    }

    /// Apply a change the way the host does.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        desired: Option<Value>,
    ) -> Result<Option<Value>, ApplyError> {
        self.provider
            .apply(resource_type, prior_state, desired, &CancellationToken::new())
            .await
    }

    /// Create a new resource.
    pub async fn create(&self, resource_type: &str, desired: Value) -> Result<Value, ApplyError> {
        self.provider
            .create(resource_type, desired, &CancellationToken::new())
            .await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider
            .read(resource_type, current_state, &CancellationToken::new())
            .await
    }

    /// Update an existing resource in place.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        desired: Value,
    ) -> Result<Value, ApplyError> {
        self.provider
            .update(resource_type, prior_state, desired, &CancellationToken::new())
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ApplyError> {
        self.provider
            .delete(resource_type, current_state, &CancellationToken::new())
            .await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider
            .import_resource(resource_type, id, &CancellationToken::new())
            .await
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config, &CancellationToken::new())
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Plan, apply and read back a new resource.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        let plan = self.plan_create(resource_type, config.clone()).await?;
        assert_plan_creates(&plan);
        let created = self.create(resource_type, config).await?;
        self.read(resource_type, created)
            .await?
            .ok_or_else(|| TestError::Provider(ProviderError::NotFound(resource_type.to_string())))
    }

    /// Apply a change to an existing resource and read it back.
    ///
    /// Replacing plans go through delete-then-create, like the host.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        desired: Value,
    ) -> Result<Value, TestError> {
        self.plan_update(resource_type, prior_state.clone(), desired.clone())
            .await?;
        let applied = self
            .apply(resource_type, Some(prior_state), Some(desired))
            .await?
            .ok_or_else(|| {
                TestError::Provider(ProviderError::NotFound(resource_type.to_string()))
            })?;
        self.read(resource_type, applied)
            .await?
            .ok_or_else(|| TestError::Provider(ProviderError::NotFound(resource_type.to_string())))
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config.clone())
            .await?;
        let plan = self
            .plan_update(resource_type, updated.clone(), updated_config)
            .await?;
        assert_plan_no_changes(&plan);
        self.delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
    /// An apply failed; the partial state is kept.
    Apply(ApplyError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
            TestError::Apply(e) => write!(f, "Apply error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

impl From<ApplyError> for TestError {
    fn from(e: ApplyError) -> Self {
        TestError::Apply(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

fn changed_paths(plan: &Plan) -> Vec<&str> {
    plan.changes().map(|c| c.path.as_str()).collect()
}

/// Assert that a plan creates the resource.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &Plan) {
    assert!(
        !plan.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan changes nothing.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &Plan) {
    assert!(
        plan.is_empty(),
        "Expected no changes, but got:\n{}",
        plan.render()
    );
}

/// Assert that a plan requires replacement with a single force-new entry.
///
/// # Panics
///
/// Panics if the plan updates in place.
pub fn assert_plan_replaces(plan: &Plan) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not:\n{}",
        plan.render()
    );
    let actions: Vec<_> = plan.changes().map(|c| c.action).collect();
    assert_eq!(actions, vec![PlanAction::ForceNew]);
}

/// Assert that a plan updates in place.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &Plan) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the attribute at `path`.
///
/// # Panics
///
/// Panics if the attribute is unchanged.
pub fn assert_plan_changes_attribute(plan: &Plan, path: &str) {
    assert!(
        plan.has_change(path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        changed_paths(plan)
    );
}

/// Assert that a plan leaves the attribute at `path` alone.
///
/// # Panics
///
/// Panics if the attribute changes.
pub fn assert_plan_does_not_change_attribute(plan: &Plan, path: &str) {
    assert!(
        !plan.has_change(path),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.is_error() && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Schema};
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_replays_in_order_then_repeats() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "/volumes/1", ApiResponse::json(200, json!({"status": "creating"})));
        mock.respond(Method::Get, "/volumes/1", ApiResponse::json(200, json!({"status": "active"})));

        let get = || mock.execute(ApiRequest::new(Method::Get, "/volumes/1"));
        assert_eq!(get().await.unwrap().body["status"], "creating");
        assert_eq!(get().await.unwrap().body["status"], "active");
        assert_eq!(get().await.unwrap().body["status"], "active");

        let missing = mock
            .execute(ApiRequest::new(Method::Get, "/volumes/2"))
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(mock.requests_to(Method::Get, "/volumes/1").len(), 3);
    }

    fn plan_with(requires_replace: bool) -> Plan {
        let schema = Schema::v0()
            .with_attribute("label", Attribute::required_string())
            .with_attribute("region", Attribute::required_string().with_force_new());
        let prior = json!({"id": "1", "label": "a", "region": "us-east"});
        let desired = if requires_replace {
            json!({"label": "a", "region": "eu-west"})
        } else {
            json!({"label": "b", "region": "us-east"})
        };
        crate::diff::plan(&schema, Some(&prior), &desired).unwrap()
    }

    #[test]
    fn test_plan_assertions() {
        let update = plan_with(false);
        assert_plan_updates_in_place(&update);
        assert_plan_changes_attribute(&update, "label");
        assert_plan_does_not_change_attribute(&update, "region");

        assert_plan_replaces(&plan_with(true));
    }

    #[test]
    #[should_panic(expected = "Expected no changes")]
    fn test_assert_plan_no_changes_fails() {
        assert_plan_no_changes(&plan_with(false));
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("Just a warning")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("An error")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid configuration value")];
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "Invalid");
        assert_error_contains(&diagnostics, "configuration");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
    }
}
