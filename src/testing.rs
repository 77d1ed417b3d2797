//! Testing utilities for resources and the provider.
//!
//! [`FakeApiClient`] is an in-memory stand-in for the management API, and
//! [`ResourceTester`] drives a [`Provider`] backed by it through whole
//! resource lifecycles.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_azurerm::testing::{assert_plan_creates, ResourceTester};
//!
//! #[tokio::test]
//! async fn test_create_budget() {
//!     let tester = ResourceTester::new();
//!     let plan = tester.plan_create("azurerm_consumption_budget_subscription", &config).unwrap();
//!     assert_plan_creates(&plan);
//!
//!     let state = tester
//!         .lifecycle_create("azurerm_consumption_budget_subscription", &config)
//!         .await
//!         .unwrap();
//!     assert_eq!(state.state.get_str("name"), Some("monthly"));
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::ApiClient;
use crate::config::ProviderConfig;
use crate::error::ReconcileError;
use crate::provider::Provider;
use crate::schema::{Diagnostic, DiagnosticSeverity};
use crate::types::{PlanResult, ReadOutcome, ReadResult, ResourceAction};
use crate::value::ConfigValue;

/// Subscription the tester's provider is configured with.
pub const TEST_SUBSCRIPTION_ID: &str = "12345678-1234-9876-4563-123456789012";

/// A request made against a [`FakeApiClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// A read.
    Get(String),
    /// A create or update, with the body as sent.
    Put(String, serde_json::Value),
    /// A delete.
    Delete(String),
}

type PutHook =
    Box<dyn Fn(&str, serde_json::Value) -> Result<serde_json::Value, ReconcileError> + Send + Sync>;

#[derive(Default)]
struct FakeState {
    resources: BTreeMap<String, serde_json::Value>,
    calls: Vec<Call>,
    failures: VecDeque<ReconcileError>,
}

/// An in-memory management API.
///
/// Stores whatever is put, echoing it back with its `id`, and returns
/// [`ReconcileError::NotFound`] for anything it does not hold. Every call is
/// recorded.
#[derive(Default)]
pub struct FakeApiClient {
    state: Mutex<FakeState>,
    put_hook: Option<PutHook>,
    latency: Option<Duration>,
}

impl FakeApiClient {
    /// An empty API.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a stored resource.
    pub fn with_resource(self, id: impl Into<String>, body: serde_json::Value) -> Self {
        self.seed(id, body);
        self
    }

    /// Rewrite every put body before it is stored, the way the real API
    /// fills in computed fields or normalises values. An error from the hook
    /// fails the put.
    pub fn with_put_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, serde_json::Value) -> Result<serde_json::Value, ReconcileError>
            + Send
            + Sync
            + 'static,
    {
        self.put_hook = Some(Box::new(hook));
        self
    }

    /// Delay every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store a resource.
    pub fn seed(&self, id: impl Into<String>, body: serde_json::Value) {
        self.lock().resources.insert(id.into(), body);
    }

    /// Fail the next call with `err`. Queued failures are used in order.
    pub fn fail_next(&self, err: ReconcileError) {
        self.lock().failures.push_back(err);
    }

    /// The stored body for `id`.
    pub fn stored(&self, id: &str) -> Option<serde_json::Value> {
        self.lock().resources.get(id).cloned()
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// The number of puts made so far.
    pub fn put_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Put(..)))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin(&self, call: Call) -> Result<(), ReconcileError> {
        let failure = {
            let mut state = self.lock();
            state.calls.push(call);
            state.failures.pop_front()
        };
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ApiClient for FakeApiClient {
    async fn get(&self, id: &str) -> Result<serde_json::Value, ReconcileError> {
        self.begin(Call::Get(id.to_string())).await?;
        self.stored(id)
            .ok_or_else(|| ReconcileError::NotFound(id.to_string()))
    }

    async fn put(
        &self,
        id: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ReconcileError> {
        self.begin(Call::Put(id.to_string(), body.clone())).await?;
        let mut stored = match &self.put_hook {
            Some(hook) => hook(id, body)?,
            None => body,
        };
        if let serde_json::Value::Object(map) = &mut stored {
            map.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        }
        self.seed(id, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: &str) -> Result<(), ReconcileError> {
        self.begin(Call::Delete(id.to_string())).await?;
        self.lock()
            .resources
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ReconcileError::NotFound(id.to_string()))
    }
}

/// A test harness driving a [`Provider`] backed by a [`FakeApiClient`].
pub struct ResourceTester {
    provider: Provider<Arc<FakeApiClient>>,
    client: Arc<FakeApiClient>,
}

impl Default for ResourceTester {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTester {
    /// A tester with an empty API and [`TEST_SUBSCRIPTION_ID`] configured.
    pub fn new() -> Self {
        let client = Arc::new(FakeApiClient::new());
        let config = ProviderConfig::new().with_subscription_id(TEST_SUBSCRIPTION_ID);
        Self {
            provider: Provider::new(config, client.clone()),
            client,
        }
    }

    /// A tester over a prepared API.
    pub fn with_client(config: ProviderConfig, client: FakeApiClient) -> Result<Self, ReconcileError> {
        let client = Arc::new(client);
        Ok(Self {
            provider: Provider::try_new(config, client.clone())?,
            client,
        })
    }

    /// The provider under test.
    pub fn provider(&self) -> &Provider<Arc<FakeApiClient>> {
        &self.provider
    }

    /// The fake API behind the provider.
    pub fn client(&self) -> &FakeApiClient {
        &self.client
    }

    /// Validate a configuration, failing on error diagnostics only.
    pub fn validate_resource_config(
        &self,
        resource_type: &str,
        config: &ConfigValue,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)?;
        check_diagnostics(diagnostics)
    }

    /// Plan a creation.
    pub fn plan_create(
        &self,
        resource_type: &str,
        desired: &ConfigValue,
    ) -> Result<PlanResult, ReconcileError> {
        self.provider.plan(resource_type, desired, None)
    }

    /// Plan an update from `observed`.
    pub fn plan_update(
        &self,
        resource_type: &str,
        desired: &ConfigValue,
        observed: &ConfigValue,
    ) -> Result<PlanResult, ReconcileError> {
        self.provider.plan(resource_type, desired, Some(observed))
    }

    /// Read a resource that must exist.
    pub async fn read_existing(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<ReadResult, ReconcileError> {
        self.provider
            .read(resource_type, id)
            .await?
            .found()
            .ok_or_else(|| ReconcileError::NotFound(id.to_string()))
    }

    /// Plan, create, then read back.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: &ConfigValue,
    ) -> Result<ReadResult, ReconcileError> {
        let plan = self.plan_create(resource_type, config)?;
        let created = self
            .provider
            .create(resource_type, &plan.planned_state)
            .await?;
        self.read_existing(resource_type, &created.id).await
    }

    /// Plan, update, then read back.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        observed: &ConfigValue,
        desired: &ConfigValue,
    ) -> Result<ReadResult, ReconcileError> {
        self.plan_update(resource_type, desired, observed)?;
        let updated = self
            .provider
            .update(resource_type, desired, observed)
            .await?;
        self.read_existing(resource_type, &updated.id).await
    }

    /// Delete, then check the resource reads as gone.
    pub async fn lifecycle_delete(&self, resource_type: &str, id: &str) -> Result<(), ReconcileError> {
        self.provider.delete(resource_type, id).await?;
        match self.provider.read(resource_type, id).await? {
            ReadOutcome::Gone => Ok(()),
            ReadOutcome::Found(_) => Err(ReconcileError::Remote(format!(
                "{} still exists after delete",
                id
            ))),
        }
    }

    /// Create, update, then delete. Returns the state read after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial: &ConfigValue,
        updated: &ConfigValue,
    ) -> Result<ReadResult, ReconcileError> {
        let created = self.lifecycle_create(resource_type, initial).await?;
        let result = self
            .lifecycle_update(resource_type, &created.state, updated)
            .await?;
        self.lifecycle_delete(resource_type, &result.id).await?;
        Ok(result)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation itself failed.
    Provider(ReconcileError),
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
        }
    }
}

impl std::error::Error for TestError {}

impl From<ReconcileError> for TestError {
    fn from(e: ReconcileError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan creates the resource.
///
/// # Panics
///
/// Panics if the plan is not a create or has no changes.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert_eq!(
        plan.action,
        ResourceAction::Create,
        "Expected plan to create, got {:?}",
        plan.action
    );
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
}

/// Assert that a plan changes nothing.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.is_noop() && plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace(),
        "Expected plan to require replacement, but it does not: {:?}",
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan changes the resource in place.
///
/// # Panics
///
/// Panics if the plan requires replacement or changes nothing.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert_eq!(
        plan.action,
        ResourceAction::Update,
        "Expected plan to update in place, got {:?}",
        plan.action
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.change(path).is_some(),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.change(path).is_none(),
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

/// Assert that diagnostics contain an error for the given attribute path.
///
/// # Panics
///
/// Panics if no error diagnostic names `attribute`.
pub fn assert_error_at(diagnostics: &[Diagnostic], attribute: &str) {
    let found = diagnostics.iter().any(|d| {
        d.severity == DiagnosticSeverity::Error && d.attribute.as_deref() == Some(attribute)
    });

    assert!(
        found,
        "Expected an error at '{}', but got: {:?}",
        attribute,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| (&d.attribute, &d.summary))
            .collect::<Vec<_>>()
    );
}
