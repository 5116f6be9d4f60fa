//! CLI command definitions for the `relay` binary.
//!
//! Uses clap derive macros for argument parsing. Resource commands follow a
//! noun-verb pattern (e.g., `relay workflow list`, `relay credential revoke`).

pub mod credential;
pub mod dispatch;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Trigger-to-action automation engine.
#[derive(Parser)]
#[command(name = "relay", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "RELAY_LOG_JSON")]
    pub log_json: bool,

    /// Export tracing spans via OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "RELAY_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server and the scheduler.
    Serve {
        /// Port to listen on (default from config.toml, else 3000).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (default from config.toml, else 127.0.0.1).
        #[arg(long)]
        host: Option<String>,

        /// Do not start the scheduler.
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Manage workflows (create, list, activate, deactivate, runs, delete).
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Manage service credentials (add-secret, add-oauth, list, revoke).
    Credential {
        #[command(subcommand)]
        action: credential::CredentialCommand,
    },

    /// Dispatch one event by hand and print the report.
    Dispatch {
        /// Event provider (e.g. gmail, webhook).
        #[arg(long)]
        provider: String,

        /// Trigger kind (e.g. receive-email, incoming-webhook).
        #[arg(long)]
        trigger: String,

        /// Event fields as a JSON object.
        #[arg(long)]
        fields: Option<String>,
    },

    /// Run one scheduler tick now.
    Tick,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dispatch() {
        let cli = Cli::try_parse_from([
            "relay",
            "--json",
            "dispatch",
            "--provider",
            "gmail",
            "--trigger",
            "receive-email",
            "--fields",
            r#"{"from":"a@b.com"}"#,
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Dispatch { provider, trigger, fields } => {
                assert_eq!(provider, "gmail");
                assert_eq!(trigger, "receive-email");
                assert!(fields.is_some());
            }
            _ => panic!("expected dispatch"),
        }
    }

    #[test]
    fn test_parse_workflow_runs() {
        let cli = Cli::try_parse_from([
            "relay",
            "workflow",
            "runs",
            "0190a0b0-0000-7000-8000-000000000000",
            "--limit",
            "5",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Workflow {
                action: workflow::WorkflowCommand::Runs { limit: 5, .. }
            }
        ));
    }
}
