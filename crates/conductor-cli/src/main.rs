//! Conductor control-plane CLI entry point.
//!
//! Binary name: `cndr`
//!
//! Parses CLI arguments, loads `conductor.toml`, wires the control plane and
//! dispatches to the command handler.

mod cli;
mod state;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use conductor_observe::{TracingOptions, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cndr", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let mut tracing_options = TracingOptions::from_verbosity(cli.verbose);
    if cli.quiet && cli.verbose == 0 {
        tracing_options.default_directive = "error".to_string();
    }
    tracing_options.otel = cli.otel;
    if let Err(e) = init_tracing(&tracing_options) {
        eprintln!("Warning: tracing not initialized: {e}");
    }

    let result = run(cli).await;
    shutdown_tracing();
    result
}

/// Exit code is 1 when `check-permission` denies.
async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let state = AppState::init(cli.config.as_deref()).await?;

    match cli.command {
        Commands::BringUp => {
            cli::bringup::bring_up(&state, cli.json)?;
        }

        Commands::CheckPermission {
            user,
            resource,
            permission,
        } => {
            let allowed =
                cli::permission::check_permission(&state, &user, &resource, &permission, cli.json)?;
            if !allowed {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Route {
            path,
            method,
            user,
            payload,
        } => {
            cli::route::route(
                &state,
                &path,
                &method,
                user.as_deref(),
                payload.as_deref(),
                cli.json,
            )
            .await?;
        }

        Commands::Secrets => {
            cli::secret::list_secrets(&state, cli.json).await?;
        }

        Commands::Serve { data_dir } => {
            cli::serve::serve(&state, data_dir, shutdown_signal()).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(ExitCode::SUCCESS)
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
