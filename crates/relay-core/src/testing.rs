//! In-memory stores and scripted providers shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_types::credential::{Credential, CredentialHandle, Redacted};
use relay_types::dispatch::ActionResult;
use relay_types::error::{ActionError, RefreshError, RepositoryError};
use relay_types::event::InboundEvent;
use relay_types::value::{ConfigMap, ConfigValue, config_map_from_json};
use relay_types::workflow::{ActionConfig, TriggerConfig, Workflow, WorkflowRun};
use uuid::Uuid;

use crate::invoker::ActionProvider;
use crate::repository::{CredentialStore, WorkflowStore};

pub fn event(provider: &str, kind: &str, fields: serde_json::Value) -> InboundEvent {
    InboundEvent::new(provider, kind, config_map_from_json(fields))
}

pub fn workflow(provider: &str, trigger_id: &str, config: serde_json::Value) -> Workflow {
    workflow_with_action(provider, trigger_id, config, "noop", "noop", serde_json::json!({}))
}

pub fn workflow_with_action(
    provider: &str,
    trigger_id: &str,
    trigger_config: serde_json::Value,
    action_provider: &str,
    action_id: &str,
    action_config: serde_json::Value,
) -> Workflow {
    let now = Utc::now();
    Workflow {
        id: Uuid::now_v7(),
        user_id: Uuid::now_v7(),
        name: format!("{provider}/{trigger_id}"),
        trigger: TriggerConfig::new(provider, trigger_id)
            .with_config(config_map_from_json(trigger_config)),
        action: ActionConfig::new(action_provider, action_id)
            .with_config(config_map_from_json(action_config)),
        is_active: true,
        activated_at: Some(now),
        last_fired_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn secret_handle(provider: &str) -> CredentialHandle {
    Credential::secret(Uuid::now_v7(), provider, "test-secret").handle()
}

// ---------------------------------------------------------------------------
// Workflow store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: Mutex<Vec<Workflow>>,
    runs: Mutex<Vec<WorkflowRun>>,
    fail_loads: AtomicBool,
}

impl InMemoryWorkflowStore {
    pub fn insert(&self, workflow: Workflow) {
        self.workflows.lock().unwrap().push(workflow);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn runs(&self) -> Vec<WorkflowRun> {
        self.runs.lock().unwrap().clone()
    }

    pub fn find(&self, id: &Uuid) -> Option<Workflow> {
        self.workflows
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.id == *id)
            .cloned()
    }
}

impl WorkflowStore for InMemoryWorkflowStore {
    async fn list_active_by_provider(&self, provider: &str) -> Result<Vec<Workflow>, RepositoryError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.is_active && w.trigger.provider == provider)
            .cloned()
            .collect())
    }

    async fn mark_fired(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.lock().unwrap();
        let workflow = workflows
            .iter_mut()
            .find(|w| w.id == *id)
            .ok_or(RepositoryError::NotFound)?;
        workflow.last_fired_at = Some(at);
        Ok(())
    }

    async fn record_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.runs.lock().unwrap().push(run.clone());
        Ok(())
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut workflows = self.workflows.lock().unwrap();
        workflows.retain(|w| w.id != workflow.id);
        workflows.push(workflow.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.find(id))
    }

    async fn list(&self, user_id: Option<&Uuid>) -> Result<Vec<Workflow>, RepositoryError> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .iter()
            .filter(|w| user_id.is_none_or(|u| w.user_id == *u))
            .cloned()
            .collect())
    }

    async fn set_active(&self, id: &Uuid, active: bool, at: DateTime<Utc>) -> Result<Workflow, RepositoryError> {
        let mut workflows = self.workflows.lock().unwrap();
        let workflow = workflows
            .iter_mut()
            .find(|w| w.id == *id)
            .ok_or(RepositoryError::NotFound)?;
        if active && !workflow.is_active {
            workflow.activated_at = Some(at);
        }
        workflow.is_active = active;
        workflow.updated_at = at;
        Ok(workflow.clone())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut workflows = self.workflows.lock().unwrap();
        let before = workflows.len();
        workflows.retain(|w| w.id != *id);
        Ok(workflows.len() != before)
    }

    async fn list_runs(&self, workflow_id: &Uuid, limit: u32) -> Result<Vec<WorkflowRun>, RepositoryError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.workflow_id == *workflow_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

type RefreshFailure = Box<dyn Fn() -> RefreshError + Send + Sync>;

#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<Uuid, Credential>>,
    refresh_calls: AtomicUsize,
    refresh_delay: Option<Duration>,
    refresh_failure: Option<RefreshFailure>,
}

impl InMemoryCredentialStore {
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    pub fn with_refresh_failure(mut self, failure: impl Fn() -> RefreshError + Send + Sync + 'static) -> Self {
        self.refresh_failure = Some(Box::new(failure));
        self
    }

    pub fn insert(&self, credential: Credential) {
        self.credentials
            .lock()
            .unwrap()
            .insert(credential.id, credential);
    }

    pub fn get(&self, id: &Uuid) -> Option<Credential> {
        self.credentials.lock().unwrap().get(id).cloned()
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

impl CredentialStore for InMemoryCredentialStore {
    async fn get_credential(&self, user_id: &Uuid, provider: &str) -> Result<Option<Credential>, RepositoryError> {
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .values()
            .find(|c| c.user_id == *user_id && c.service_provider == provider)
            .cloned())
    }

    async fn mark_invalid(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let mut credentials = self.credentials.lock().unwrap();
        let credential = credentials.get_mut(id).ok_or(RepositoryError::NotFound)?;
        credential.is_valid = false;
        Ok(())
    }

    async fn refresh(&self, id: &Uuid) -> Result<Credential, RefreshError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.refresh_failure {
            return Err(failure());
        }

        let mut credentials = self.credentials.lock().unwrap();
        let credential = credentials
            .get_mut(id)
            .ok_or_else(|| RefreshError::Storage("unknown credential".to_string()))?;
        credential.token = Redacted::new(format!("refreshed-{n}"));
        credential.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        credential.updated_at = Utc::now();
        Ok(credential.clone())
    }

    async fn save(&self, credential: &Credential) -> Result<(), RepositoryError> {
        self.insert(credential.clone());
        Ok(())
    }

    async fn list(&self, user_id: &Uuid) -> Result<Vec<Credential>, RepositoryError> {
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == *user_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Scripted action provider
// ---------------------------------------------------------------------------

enum Script {
    Succeed,
    Fail(ActionError),
    Panic,
}

/// An action provider whose behavior is fixed up front. Successful calls
/// echo the rendered config back as `{"echo": config}`.
pub struct ScriptedProvider {
    name: String,
    actions: &'static [&'static str],
    script: Script,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<ConfigMap>>>,
}

impl ScriptedProvider {
    fn new(name: &str, actions: &'static [&'static str], script: Script) -> Self {
        Self {
            name: name.to_string(),
            actions,
            script,
            delay: None,
            calls: Arc::default(),
            in_flight: Arc::default(),
            peak: Arc::default(),
            seen: Arc::default(),
        }
    }

    pub fn ok(name: &str, actions: &'static [&'static str]) -> Self {
        Self::new(name, actions, Script::Succeed)
    }

    pub fn failing(name: &str, actions: &'static [&'static str], error: ActionError) -> Self {
        Self::new(name, actions, Script::Fail(error))
    }

    pub fn panicking(name: &str, actions: &'static [&'static str]) -> Self {
        Self::new(name, actions, Script::Panic)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn peak_concurrency(&self) -> Arc<AtomicUsize> {
        self.peak.clone()
    }

    pub fn seen_configs(&self) -> Arc<Mutex<Vec<ConfigMap>>> {
        self.seen.clone()
    }
}

impl ActionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn actions(&self) -> &[&'static str] {
        self.actions
    }

    async fn call(
        &self,
        _action_id: &str,
        config: &ConfigMap,
        _credential: &CredentialHandle,
    ) -> Result<ActionResult, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(config.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.script {
            Script::Succeed => Ok(ActionResult::new(serde_json::json!({
                "echo": serde_json::Value::from(ConfigValue::Map(config.clone()))
            }))),
            Script::Fail(error) => Err(error.clone()),
            Script::Panic => panic!("scripted provider panic"),
        }
    }
}
