//! fleetd: supervisor daemon for a pooled fleet of AI-CLI worker processes.

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use fleetd::app::FleetApp;
use fleetd::config::FleetConfig;
use fleetd::store::InMemoryStore;
use fleetd::token::EnvTokenProvider;
use fleetd::{cli, client, server};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("FLEETD_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("fleetd daemon starting");

            let config = match opts.config {
                Some(path) => FleetConfig::load(std::path::Path::new(&path))?,
                None => FleetConfig::default(),
            }
            .apply_env_overrides();

            let app = FleetApp::new(
                config,
                Arc::new(InMemoryStore::default()),
                Arc::new(EnvTokenProvider::default()),
                Utc::now(),
            );

            let cancel = CancellationToken::new();
            let background = app.spawn_background_tasks(cancel.clone());

            let listener = server::bind(&socket_path).await?;
            let server_cancel = cancel.clone();
            let server_handle = tokio::spawn(async move { server::serve(listener, app, server_cancel).await });

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown signal received");
            cancel.cancel();
            server_handle.await?;
            for handle in background {
                let _ = handle.await;
            }
            let _ = std::fs::remove_file(&socket_path);
        }
        cli::Command::Status => {
            client::cmd_status(&socket_path).await?;
        }
        cli::Command::Ls => {
            client::cmd_list_sessions(&socket_path).await?;
        }
    }

    Ok(())
}
