//! SQLite workflow store implementation.
//!
//! Implements `WorkflowStore` from `relay-core` using sqlx with split
//! read/write pools. Trigger and action configs are stored as JSON text; the
//! trigger provider is a separate indexed column so the dispatch lookup never
//! decodes workflows for other providers.

use chrono::{DateTime, SecondsFormat, Utc};
use relay_core::repository::WorkflowStore;
use relay_types::dispatch::{FailureKind, OutcomeStatus};
use relay_types::error::RepositoryError;
use relay_types::value::ConfigMap;
use relay_types::workflow::{ActionConfig, TriggerConfig, Workflow, WorkflowRun};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowStore`.
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

const WORKFLOW_COLUMNS: &str = "id, user_id, name, trigger_provider, trigger_id, trigger_config, \
     action_provider, action_id, action_config, is_active, activated_at, last_fired_at, \
     created_at, updated_at";

const RUN_COLUMNS: &str = "id, workflow_id, workflow_name, status, event_provider, event_kind, \
     error, error_kind, output, duration_ms, recorded_at";

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    user_id: String,
    name: String,
    trigger_provider: String,
    trigger_id: String,
    trigger_config: String,
    action_provider: String,
    action_id: String,
    action_config: String,
    is_active: bool,
    activated_at: Option<String>,
    last_fired_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            trigger_provider: row.try_get("trigger_provider")?,
            trigger_id: row.try_get("trigger_id")?,
            trigger_config: row.try_get("trigger_config")?,
            action_provider: row.try_get("action_provider")?,
            action_id: row.try_get("action_id")?,
            action_config: row.try_get("action_config")?,
            is_active: row.try_get("is_active")?,
            activated_at: row.try_get("activated_at")?,
            last_fired_at: row.try_get("last_fired_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, RepositoryError> {
        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            name: self.name,
            trigger: TriggerConfig::new(self.trigger_provider, self.trigger_id)
                .with_config(parse_config(&self.trigger_config, "trigger_config")?),
            action: ActionConfig::new(self.action_provider, self.action_id)
                .with_config(parse_config(&self.action_config, "action_config")?),
            is_active: self.is_active,
            activated_at: self.activated_at.as_deref().map(parse_datetime).transpose()?,
            last_fired_at: self.last_fired_at.as_deref().map(parse_datetime).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct RunRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    status: String,
    event_provider: String,
    event_kind: String,
    error: Option<String>,
    error_kind: Option<String>,
    output: Option<String>,
    duration_ms: i64,
    recorded_at: String,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            event_provider: row.try_get("event_provider")?,
            event_kind: row.try_get("event_kind")?,
            error: row.try_get("error")?,
            error_kind: row.try_get("error_kind")?,
            output: row.try_get("output")?,
            duration_ms: row.try_get("duration_ms")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun, RepositoryError> {
        let status: OutcomeStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let error_kind = self
            .error_kind
            .as_deref()
            .map(|k| k.parse::<FailureKind>().map_err(RepositoryError::Query))
            .transpose()?;
        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid run output: {e}")))
            })
            .transpose()?;

        Ok(WorkflowRun {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_name: self.workflow_name,
            status,
            event_provider: self.event_provider,
            event_kind: self.event_kind,
            error: self.error,
            error_kind,
            output,
            duration_ms: self.duration_ms.max(0) as u64,
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_config(s: &str, column: &str) -> Result<ConfigMap, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn encode_config(config: &ConfigMap) -> Result<String, RepositoryError> {
    serde_json::to_string(config).map_err(|e| RepositoryError::Query(format!("serialize config: {e}")))
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn decode_workflows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Workflow>, RepositoryError> {
    rows.iter()
        .map(|row| WorkflowRow::from_row(row).map_err(query_err)?.into_workflow())
        .collect()
}

/// Decode dispatch candidates. A row whose stored data no longer decodes is
/// logged and left out; the remaining rows are still returned.
fn decode_candidates(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Workflow>, RepositoryError> {
    let mut workflows = Vec::with_capacity(rows.len());
    for row in rows {
        let row = WorkflowRow::from_row(row).map_err(query_err)?;
        let id = row.id.clone();
        match row.into_workflow() {
            Ok(workflow) => workflows.push(workflow),
            Err(e) => {
                tracing::error!(workflow_id = %id, error = %e, "skipping undecodable workflow row");
            }
        }
    }
    Ok(workflows)
}

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteWorkflowStore {
    async fn list_active_by_provider(&self, provider: &str) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows \
             WHERE trigger_provider = ? AND is_active = 1 ORDER BY created_at ASC"
        ))
        .bind(provider)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        decode_candidates(&rows)
    }

    async fn mark_fired(&self, id: &Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflows SET last_fired_at = ? WHERE id = ?")
            .bind(format_datetime(&at))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn record_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let output = run
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(&format!(
            "INSERT INTO workflow_runs ({RUN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(&run.workflow_name)
        .bind(run.status.to_string())
        .bind(&run.event_provider)
        .bind(&run.event_kind)
        .bind(&run.error)
        .bind(run.error_kind.map(|k| k.as_str()))
        .bind(&output)
        .bind(run.duration_ms as i64)
        .bind(format_datetime(&run.recorded_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let trigger_config = encode_config(&workflow.trigger.config)?;
        let action_config = encode_config(&workflow.action.config)?;

        sqlx::query(&format!(
            r#"INSERT INTO workflows ({WORKFLOW_COLUMNS})
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 trigger_provider = excluded.trigger_provider,
                 trigger_id = excluded.trigger_id,
                 trigger_config = excluded.trigger_config,
                 action_provider = excluded.action_provider,
                 action_id = excluded.action_id,
                 action_config = excluded.action_config,
                 is_active = excluded.is_active,
                 activated_at = excluded.activated_at,
                 last_fired_at = excluded.last_fired_at,
                 updated_at = excluded.updated_at"#
        ))
        .bind(workflow.id.to_string())
        .bind(workflow.user_id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.trigger.provider)
        .bind(&workflow.trigger.trigger_id)
        .bind(&trigger_config)
        .bind(&workflow.action.provider)
        .bind(&workflow.action.action_id)
        .bind(&action_config)
        .bind(workflow.is_active)
        .bind(workflow.activated_at.as_ref().map(format_datetime))
        .bind(workflow.last_fired_at.as_ref().map(format_datetime))
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| WorkflowRow::from_row(&row).map_err(query_err)?.into_workflow())
            .transpose()
    }

    async fn list(&self, user_id: Option<&Uuid>) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE user_id = ? ORDER BY created_at DESC"
                ))
                .bind(user_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at DESC"
                ))
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_err)?;

        decode_workflows(&rows)
    }

    async fn set_active(&self, id: &Uuid, active: bool, at: DateTime<Utc>) -> Result<Workflow, RepositoryError> {
        let at = format_datetime(&at);
        let result = sqlx::query(
            r#"UPDATE workflows SET
                 activated_at = CASE WHEN ?1 = 1 AND is_active = 0 THEN ?2 ELSE activated_at END,
                 is_active = ?1,
                 updated_at = ?2
               WHERE id = ?3"#,
        )
        .bind(active)
        .bind(&at)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        // Read back through the writer so the update is visible immediately.
        let row = sqlx::query(&format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"))
            .bind(id.to_string())
            .fetch_one(&self.pool.writer)
            .await
            .map_err(query_err)?;
        WorkflowRow::from_row(&row).map_err(query_err)?.into_workflow()
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_runs(&self, workflow_id: &Uuid, limit: u32) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE workflow_id = ? \
             ORDER BY recorded_at DESC, id DESC LIMIT ?"
        ))
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| RunRow::from_row(row).map_err(query_err)?.into_run())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relay_types::dispatch::WorkflowOutcome;
    use relay_types::value::{ConfigValue, config_map_from_json};
    use relay_types::workflow::WorkflowDraft;
    use serde_json::json;

    async fn test_store() -> (SqliteWorkflowStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open_in(dir.path()).await.unwrap();
        (SqliteWorkflowStore::new(pool), dir)
    }

    fn make_workflow(provider: &str, trigger_id: &str, active: bool) -> Workflow {
        let draft = WorkflowDraft {
            name: format!("{provider} {trigger_id}"),
            trigger: TriggerConfig::new(provider, trigger_id)
                .with_config(config_map_from_json(json!({"from": "a@b.com"}))),
            action: ActionConfig::new("gmail", "send-email").with_config(config_map_from_json(
                json!({"to": "{{from}}", "subject": "Re: {{subject}}", "retries": 2, "cc": ["x@y.z"]}),
            )),
            active,
        };
        draft.into_workflow(Uuid::now_v7(), Utc::now())
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let (store, _dir) = test_store().await;
        let wf = make_workflow("gmail", "receive-email", true);
        store.save(&wf).await.unwrap();

        let loaded = store.get(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, wf.id);
        assert_eq!(loaded.user_id, wf.user_id);
        assert_eq!(loaded.trigger, wf.trigger);
        assert_eq!(loaded.action, wf.action);
        assert!(loaded.is_active);
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            wf.created_at.timestamp_micros()
        );
        assert_eq!(
            loaded.action.config.get("retries"),
            Some(&ConfigValue::from(2i64))
        );
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (store, _dir) = test_store().await;
        assert!(store.get(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_row_does_not_hide_siblings() {
        let (store, _dir) = test_store().await;
        let good = make_workflow("gmail", "receive-email", true);
        let broken = make_workflow("gmail", "receive-email", true);
        store.save(&good).await.unwrap();
        store.save(&broken).await.unwrap();

        sqlx::query("UPDATE workflows SET trigger_config = '{not json' WHERE id = ?")
            .bind(broken.id.to_string())
            .execute(&store.pool.writer)
            .await
            .unwrap();

        let candidates = store.list_active_by_provider("gmail").await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, good.id);

        // Direct lookups still surface the corruption.
        assert!(store.get(&broken.id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_active_by_provider_filters() {
        let (store, _dir) = test_store().await;
        let active = make_workflow("gmail", "receive-email", true);
        let inactive = make_workflow("gmail", "receive-email", false);
        let other = make_workflow("discord", "new-message", true);
        for wf in [&active, &inactive, &other] {
            store.save(wf).await.unwrap();
        }

        let loaded = store.list_active_by_provider("gmail").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, active.id);
        assert!(store.list_active_by_provider("webhook").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_user() {
        let (store, _dir) = test_store().await;
        let a = make_workflow("gmail", "receive-email", true);
        let b = make_workflow("gmail", "receive-email", true);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 2);
        let mine = store.list(Some(&a.user_id)).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, a.id);
    }

    #[tokio::test]
    async fn test_set_active_stamps_activation_edge_only() {
        let (store, _dir) = test_store().await;
        let wf = make_workflow("scheduler", "on-activation", false);
        store.save(&wf).await.unwrap();

        let t1 = Utc::now();
        let activated = store.set_active(&wf.id, true, t1).await.unwrap();
        assert!(activated.is_active);
        assert_eq!(
            activated.activated_at.map(|t| t.timestamp_micros()),
            Some(t1.timestamp_micros())
        );

        // Already active: no new edge.
        let t2 = t1 + Duration::minutes(1);
        let again = store.set_active(&wf.id, true, t2).await.unwrap();
        assert_eq!(
            again.activated_at.map(|t| t.timestamp_micros()),
            Some(t1.timestamp_micros())
        );

        let t3 = t2 + Duration::minutes(1);
        store.set_active(&wf.id, false, t3).await.unwrap();
        let t4 = t3 + Duration::minutes(1);
        let reactivated = store.set_active(&wf.id, true, t4).await.unwrap();
        assert_eq!(
            reactivated.activated_at.map(|t| t.timestamp_micros()),
            Some(t4.timestamp_micros())
        );
    }

    #[tokio::test]
    async fn test_set_active_unknown_is_not_found() {
        let (store, _dir) = test_store().await;
        let err = store
            .set_active(&Uuid::now_v7(), true, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_mark_fired() {
        let (store, _dir) = test_store().await;
        let wf = make_workflow("scheduler", "cron", true);
        store.save(&wf).await.unwrap();

        let at = Utc::now();
        store.mark_fired(&wf.id, at).await.unwrap();
        let loaded = store.get(&wf.id).await.unwrap().unwrap();
        assert_eq!(
            loaded.last_fired_at.map(|t| t.timestamp_micros()),
            Some(at.timestamp_micros())
        );

        assert!(matches!(
            store.mark_fired(&Uuid::now_v7(), at).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_record_and_list_runs_newest_first() {
        let (store, _dir) = test_store().await;
        let wf = make_workflow("gmail", "receive-email", true);
        store.save(&wf).await.unwrap();

        let base = Utc::now();
        let ok = WorkflowOutcome::succeeded(
            wf.id,
            wf.name.clone(),
            relay_types::dispatch::ActionResult::new(json!({"messageId": "m1"})),
            12,
        );
        let failed = WorkflowOutcome::failed(wf.id, &wf.name, FailureKind::AuthRejected, "401", 3);

        store
            .record_run(&WorkflowRun::from_outcome(&ok, "gmail", "receive-email", base))
            .await
            .unwrap();
        store
            .record_run(&WorkflowRun::from_outcome(
                &failed,
                "gmail",
                "receive-email",
                base + Duration::seconds(1),
            ))
            .await
            .unwrap();

        let runs = store.list_runs(&wf.id, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, OutcomeStatus::Failed);
        assert_eq!(runs[0].error_kind, Some(FailureKind::AuthRejected));
        assert_eq!(runs[1].status, OutcomeStatus::Succeeded);
        assert_eq!(runs[1].output, Some(json!({"messageId": "m1"})));
        assert_eq!(runs[1].duration_ms, 12);

        assert_eq!(store.list_runs(&wf.id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_runs() {
        let (store, _dir) = test_store().await;
        let wf = make_workflow("gmail", "receive-email", true);
        store.save(&wf).await.unwrap();
        let outcome = WorkflowOutcome::failed(wf.id, &wf.name, FailureKind::Cancelled, "cancelled", 0);
        store
            .record_run(&WorkflowRun::from_outcome(&outcome, "gmail", "receive-email", Utc::now()))
            .await
            .unwrap();

        assert!(store.delete(&wf.id).await.unwrap());
        assert!(!store.delete(&wf.id).await.unwrap());
        assert!(store.list_runs(&wf.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let (store, _dir) = test_store().await;
        let mut wf = make_workflow("gmail", "receive-email", true);
        store.save(&wf).await.unwrap();

        wf.name = "renamed".to_string();
        wf.trigger.config = ConfigMap::new();
        store.save(&wf).await.unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "renamed");
        assert!(all[0].trigger.config.is_empty());
    }
}
