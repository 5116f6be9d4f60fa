//! Relay CLI and REST API entry point.
//!
//! Binary name: `relay`
//!
//! Parses CLI arguments, initializes the database and dispatch services, then
//! runs the requested command or starts the REST API server with the
//! scheduler.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use relay_observe::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "relay", &mut std::io::stdout());
        return Ok(());
    }

    let mut tracing_options = TracingOptions::from_verbosity(cli.verbose, cli.quiet);
    if cli.log_json {
        tracing_options.format = LogFormat::Json;
    }
    tracing_options.otel = cli.otel;
    if let Err(e) = init_tracing(&tracing_options) {
        eprintln!("warning: failed to initialize tracing: {e}");
    }

    let state = AppState::init().await?;

    let result = run(cli.command, &state, cli.json).await;
    shutdown_tracing();
    result
}

async fn run(command: Commands, state: &AppState, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            port,
            host,
            no_scheduler,
        } => serve(state, host, port, no_scheduler).await,

        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, state, json).await
        }

        Commands::Credential { action } => {
            cli::credential::handle_credential_command(action, state, json).await
        }

        Commands::Dispatch {
            provider,
            trigger,
            fields,
        } => cli::dispatch::run_dispatch(state, &provider, &trigger, fields.as_deref(), json).await,

        Commands::Tick => cli::dispatch::run_tick(state, json).await,

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

async fn serve(
    state: &AppState,
    host: Option<String>,
    port: Option<u16>,
    no_scheduler: bool,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let run_scheduler = state.config.scheduler.enabled && !no_scheduler;
    if run_scheduler {
        state.scheduler.start(&state.config.scheduler.tick).await?;
    }

    println!(
        "  {} Relay API listening on {}",
        console::style("*").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!(
        "  {} Data directory: {}",
        console::style("*").bold(),
        console::style(state.data_dir.display()).dim()
    );
    if run_scheduler {
        println!(
            "  {} Scheduler running ({})",
            console::style("*").bold(),
            console::style(&state.config.scheduler.tick).dim()
        );
    }
    if state.webhook_secret.is_none() {
        println!(
            "  {} Inbound webhooks are unsigned; set [webhook].signing_secret to require signatures",
            console::style("!").yellow().bold()
        );
    }
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if run_scheduler {
        if let Err(e) = state.scheduler.stop().await {
            tracing::warn!(error = %e, "scheduler did not stop cleanly");
        }
    }

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
