//! CLI command definitions for the `cndr` binary.
//!
//! Uses clap derive macros for argument parsing. Every command loads the
//! control-plane config first; `--config` overrides the default location.

pub mod bringup;
pub mod permission;
pub mod route;
pub mod secret;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Operate the Conductor agent control plane.
#[derive(Parser)]
#[command(name = "cndr", version, about, long_about = None)]
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

    /// Path to conductor.toml (defaults to the platform config directory).
    #[arg(long, global = true, env = "CONDUCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and merge the configured systems, then register agents.
    #[command(name = "bring-up")]
    BringUp,

    /// Check whether a user holds a permission on a resource.
    #[command(name = "check-permission")]
    CheckPermission {
        /// User id.
        user: String,

        /// Resource name (e.g. "agents/analyzer-1").
        resource: String,

        /// One of read, write, execute, admin.
        permission: String,
    },

    /// Route a request through the policy router.
    Route {
        /// Request path (e.g. "/analyze").
        path: String,

        /// Request method (case-insensitive).
        method: String,

        /// Calling user; omitted means anonymous.
        #[arg(long)]
        user: Option<String>,

        /// JSON payload; when given the request is dispatched to the worker.
        #[arg(long)]
        payload: Option<String>,
    },

    /// List secret names visible to the control plane.
    Secrets,

    /// Run the control plane until Ctrl+C or SIGTERM.
    Serve {
        /// Directory for the registry snapshot (defaults to ~/.conductor).
        #[arg(long, env = "CONDUCTOR_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
