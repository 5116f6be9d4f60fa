//! CLI workflow management subcommands.
//!
//! Provides create, list, activate, deactivate, runs, and delete operations
//! for stored workflows.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use uuid::Uuid;

use relay_core::repository::WorkflowStore;
use relay_core::scheduler::{parse_schedule, schedule_timezone};
use relay_types::dispatch::OutcomeStatus;
use relay_types::workflow::{
    CRON_TRIGGER, ON_ACTIVATION_TRIGGER, SCHEDULER_PROVIDER, Workflow, WorkflowDraft,
};

use crate::state::AppState;

/// Workflow management subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Create a workflow from a YAML or JSON file.
    Create {
        /// Path to the workflow file.
        #[arg(long)]
        file: PathBuf,

        /// Owning user; credentials are resolved in this user's scope.
        #[arg(long)]
        user: Uuid,

        /// Activate immediately, regardless of the file's `active` flag.
        #[arg(long)]
        activate: bool,
    },

    /// List stored workflows.
    #[command(alias = "ls")]
    List {
        /// Filter by owning user.
        #[arg(long)]
        user: Option<Uuid>,
    },

    /// Activate a workflow.
    Activate { id: Uuid },

    /// Deactivate a workflow.
    Deactivate { id: Uuid },

    /// Show recent runs for a workflow.
    Runs {
        id: Uuid,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "10")]
        limit: u32,
    },

    /// Delete a workflow and its run log.
    #[command(alias = "rm")]
    Delete {
        id: Uuid,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(
    cmd: WorkflowCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        WorkflowCommand::Create { file, user, activate } => {
            handle_create(&file, user, activate, state, json).await
        }
        WorkflowCommand::List { user } => handle_list(user.as_ref(), state, json).await,
        WorkflowCommand::Activate { id } => handle_set_active(id, true, state, json).await,
        WorkflowCommand::Deactivate { id } => handle_set_active(id, false, state, json).await,
        WorkflowCommand::Runs { id, limit } => handle_runs(id, limit, state, json).await,
        WorkflowCommand::Delete { id, force } => handle_delete(id, force, state, json).await,
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

async fn handle_create(
    file: &Path,
    user: Uuid,
    activate: bool,
    state: &AppState,
    json: bool,
) -> Result<()> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut draft = WorkflowDraft::from_yaml(&source)
        .with_context(|| format!("Failed to parse workflow file {}", file.display()))?;
    draft.active |= activate;

    validate_draft(&draft, &state.actions)?;

    let workflow = draft.into_workflow(user, chrono::Utc::now());
    state
        .workflows
        .save(&workflow)
        .await
        .context("Failed to save workflow")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        println!();
        println!(
            "  {} Created workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  ID: {}", workflow.id);
        println!("  Trigger: {}", trigger_label(&workflow));
        println!("  Action: {}", action_label(&workflow));
        println!("  Active: {}", workflow.is_active);
        println!();
    }

    Ok(())
}

/// Reject drafts that could never execute.
fn validate_draft(draft: &WorkflowDraft, actions: &[(String, String)]) -> Result<()> {
    if draft.name.trim().is_empty() {
        bail!("Workflow name must not be empty");
    }
    if draft.trigger.provider.trim().is_empty() || draft.trigger.trigger_id.trim().is_empty() {
        bail!("Trigger provider and triggerId are required");
    }

    let action = (draft.action.provider.clone(), draft.action.action_id.clone());
    if !actions.contains(&action) {
        let known: Vec<String> = actions.iter().map(|(p, a)| format!("{p}/{a}")).collect();
        bail!(
            "Unknown action '{}/{}' (available: {})",
            action.0,
            action.1,
            known.join(", ")
        );
    }

    if draft.trigger.provider == SCHEDULER_PROVIDER {
        match draft.trigger.trigger_id.as_str() {
            CRON_TRIGGER => {
                let expression = draft
                    .trigger
                    .config
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .context("Cron triggers require a string 'expression'")?;
                parse_schedule(expression)?;
                schedule_timezone(&draft.trigger.config)?;
            }
            ON_ACTIVATION_TRIGGER => {}
            other => bail!("Unknown scheduler trigger '{other}'"),
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(user: Option<&Uuid>, state: &AppState, json: bool) -> Result<()> {
    let workflows = state
        .workflows
        .list(user)
        .await
        .context("Failed to list workflows")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Create one with: {}",
            style("relay workflow create --file <workflow.yaml> --user <uuid>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("ID"),
            Cell::new("Trigger"),
            Cell::new("Action"),
            Cell::new("Active"),
            Cell::new("Last fired"),
        ]);

    for w in &workflows {
        let active = if w.is_active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&w.name),
            Cell::new(w.id.to_string()),
            Cell::new(trigger_label(w)),
            Cell::new(action_label(w)),
            active,
            Cell::new(
                w.last_fired_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Activate / deactivate
// ---------------------------------------------------------------------------

async fn handle_set_active(id: Uuid, active: bool, state: &AppState, json: bool) -> Result<()> {
    let workflow = state
        .workflows
        .set_active(&id, active, chrono::Utc::now())
        .await
        .with_context(|| format!("Failed to update workflow {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        let verb = if active { "Activated" } else { "Deactivated" };
        println!(
            "  {} {verb} workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

async fn handle_runs(id: Uuid, limit: u32, state: &AppState, json: bool) -> Result<()> {
    let workflow = state
        .workflows
        .get(&id)
        .await?
        .with_context(|| format!("Workflow {id} not found"))?;
    let runs = state.workflows.list_runs(&id, limit.max(1)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    println!();
    println!("  Runs for '{}'", style(&workflow.name).cyan());
    if runs.is_empty() {
        println!("  No runs recorded yet.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Recorded").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Event"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for run in &runs {
        let status = match run.status {
            OutcomeStatus::Succeeded => Cell::new("succeeded").fg(Color::Green),
            OutcomeStatus::Failed => Cell::new("failed").fg(Color::Red),
        };
        let error = match (&run.error_kind, &run.error) {
            (Some(kind), Some(msg)) => format!("{kind}: {msg}"),
            (_, Some(msg)) => msg.clone(),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(run.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            status,
            Cell::new(format!("{}/{}", run.event_provider, run.event_kind)),
            Cell::new(format!("{}ms", run.duration_ms)),
            Cell::new(error),
        ]);
    }

    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn handle_delete(id: Uuid, force: bool, state: &AppState, json: bool) -> Result<()> {
    let workflow = state
        .workflows
        .get(&id)
        .await?
        .with_context(|| format!("Workflow {id} not found"))?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete workflow '{}' and its run log?",
                workflow.name
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let deleted = state.workflows.delete(&id).await?;

    if json {
        println!("{}", serde_json::json!({"deleted": deleted, "id": id}));
    } else {
        println!(
            "  {} Deleted workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn trigger_label(w: &Workflow) -> String {
    format!("{}/{}", w.trigger.provider, w.trigger.trigger_id)
}

fn action_label(w: &Workflow) -> String {
    format!("{}/{}", w.action.provider, w.action.action_id)
}
