//! Manual dispatch and scheduler tick commands.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use relay_types::dispatch::{DispatchReport, OutcomeStatus};
use relay_types::event::InboundEvent;
use relay_types::value::{ConfigMap, config_map_from_json};
use relay_types::workflow::SCHEDULER_PROVIDER;

use crate::state::AppState;

/// Dispatch one hand-built event through the engine.
pub async fn run_dispatch(
    state: &AppState,
    provider: &str,
    trigger: &str,
    fields: Option<&str>,
    json: bool,
) -> Result<()> {
    if provider == SCHEDULER_PROVIDER {
        bail!("Scheduler events are synthesized by the scheduler; use `relay tick` instead");
    }
    let fields = parse_fields(fields)?;
    let event = InboundEvent::new(provider, trigger, fields);

    tracing::info!(provider, trigger, "manual dispatch");
    let report = state.engine.dispatch(&event).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&format!("{provider}/{trigger}"), &report);
    }
    Ok(())
}

/// Run one scheduler tick at the current time.
pub async fn run_tick(state: &AppState, json: bool) -> Result<()> {
    let tick = state
        .scheduler
        .tick(chrono::Utc::now())
        .await
        .context("Scheduler tick failed")?;

    if json {
        let skipped: Vec<serde_json::Value> = tick
            .skipped
            .iter()
            .map(|(id, reason)| serde_json::json!({"workflowId": id, "reason": reason}))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "fired": tick.fired,
                "skipped": skipped,
                "report": tick.report,
            }))?
        );
        return Ok(());
    }

    for (id, reason) in &tick.skipped {
        println!(
            "  {} Skipped workflow {id}: {reason}",
            style("!").yellow().bold()
        );
    }
    if tick.fired.is_empty() {
        println!();
        println!("  {} No scheduled workflows due.", style("i").blue().bold());
        println!();
        return Ok(());
    }
    print_report("scheduler", &tick.report);
    Ok(())
}

fn parse_fields(fields: Option<&str>) -> Result<ConfigMap> {
    let Some(raw) = fields else {
        return Ok(ConfigMap::new());
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--fields must be valid JSON")?;
    if !value.is_object() {
        bail!("--fields must be a JSON object");
    }
    Ok(config_map_from_json(value))
}

fn print_report(label: &str, report: &DispatchReport) {
    println!();
    let headline = if !report.success {
        style("dispatch fault").red().bold()
    } else if report.failed > 0 {
        style("completed with failures").yellow().bold()
    } else {
        style("completed").green().bold()
    };
    println!(
        "  {} {headline}: {} triggered, {} failed, {} candidate workflow{}",
        style(label).cyan(),
        report.triggered,
        report.failed,
        report.total_workflows,
        if report.total_workflows == 1 { "" } else { "s" }
    );

    if report.outcomes.is_empty() {
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Workflow").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Detail"),
        ]);

    for outcome in &report.outcomes {
        let (status, detail) = match outcome.status {
            OutcomeStatus::Succeeded => (
                Cell::new("succeeded").fg(Color::Green),
                outcome
                    .output
                    .as_ref()
                    .map(|o| o.to_string())
                    .unwrap_or_default(),
            ),
            OutcomeStatus::Failed => (
                Cell::new("failed").fg(Color::Red),
                match (&outcome.error_kind, &outcome.error) {
                    (Some(kind), Some(msg)) => format!("{kind}: {msg}"),
                    (_, Some(msg)) => msg.clone(),
                    _ => String::new(),
                },
            ),
        };
        table.add_row(vec![
            Cell::new(&outcome.workflow_name),
            status,
            Cell::new(format!("{}ms", outcome.duration_ms)),
            Cell::new(detail),
        ]);
    }

    println!("{table}");
    println!();
}
