//! CLI definition using clap derive, mirrors `agtmux-runtime::cli`.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetd", about = "supervisor for a pooled fleet of AI-CLI worker processes")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/fleetd/fleetd.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (UDS server + background tasks)
    Daemon(DaemonOpts),
    /// Show pool/breaker/health summary
    Status,
    /// List tracked sessions as JSON
    Ls,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<String>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/fleetd/fleetd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/fleetd-{user}/fleetd.sock")
}
