//! UDS JSON-RPC server: hand-rolled, connection-per-request,
//! newline-delimited JSON. Directly grounded on
//! `agtmux-runtime::server::run_server` — same stale-socket probe, same
//! `0700`/`0600` permission hardening, same raw-`serde_json::Value`
//! dispatch by method name.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use fleet_core::SessionConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::app::FleetApp;

/// Bind the daemon's UDS socket, refusing to start if another daemon is
/// already listening, and removing a stale (dead) socket file otherwise.
pub async fn bind(socket_path: &str) -> anyhow::Result<UnixListener> {
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;
    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if Path::new(socket_path).exists() {
        if UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!(socket_path, "removed stale socket");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(socket_path, "UDS server listening");
    Ok(listener)
}

/// Accept connections until `cancel` fires, handling each on its own task.
pub async fn serve(listener: UnixListener, app: Arc<FleetApp>, cancel: tokio_util::sync::CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { continue };
                let app = app.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, app).await {
                        tracing::debug!(%err, "connection error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, app: Arc<FleetApp>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: serde_json::Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();
    let params = &request["params"];

    let response = match dispatch(method, params, &app).await {
        Ok(result) => serde_json::json!({"jsonrpc": "2.0", "result": result, "id": id}),
        Err(RpcError::MethodNotFound) => {
            serde_json::json!({"jsonrpc": "2.0", "error": {"code": -32601, "message": "method not found"}, "id": id})
        }
        Err(RpcError::InvalidParams(msg)) => {
            serde_json::json!({"jsonrpc": "2.0", "error": {"code": -32602, "message": msg}, "id": id})
        }
        Err(RpcError::Application(msg)) => {
            serde_json::json!({"jsonrpc": "2.0", "error": {"code": -32000, "message": msg}, "id": id})
        }
    };

    let mut text = serde_json::to_string(&response)?;
    text.push('\n');
    writer.write_all(text.as_bytes()).await?;
    Ok(())
}

enum RpcError {
    MethodNotFound,
    InvalidParams(String),
    Application(String),
}

async fn dispatch(method: &str, params: &serde_json::Value, app: &Arc<FleetApp>) -> Result<serde_json::Value, RpcError> {
    match method {
        "status" => Ok(status_payload(app).await),
        "list_sessions" => {
            let sessions = app.list_sessions().await;
            serde_json::to_value(sessions).map_err(|e| RpcError::Application(e.to_string()))
        }
        "acquire_session" => {
            let working_dir = params["working_dir"].as_str().ok_or_else(|| RpcError::InvalidParams("working_dir required".into()))?;
            let system_prompt = params["system_prompt"].as_str().unwrap_or_default();
            let requested = SessionConfig::new(working_dir, system_prompt);
            let id = app
                .acquire_session(requested, Utc::now())
                .await
                .map_err(|e| RpcError::Application(e.to_string()))?;
            Ok(serde_json::json!({"session_id": id}))
        }
        "release_session" => {
            let id = params["session_id"].as_str().ok_or_else(|| RpcError::InvalidParams("session_id required".into()))?;
            app.release_session(&id.to_string(), Utc::now()).await.map_err(|e| RpcError::Application(e.to_string()))?;
            Ok(serde_json::json!({}))
        }
        _ => Err(RpcError::MethodNotFound),
    }
}

async fn status_payload(app: &Arc<FleetApp>) -> serde_json::Value {
    let now = Utc::now();
    let pool_stats = app.pool.stats().await;
    let breaker_metrics = app.breaker.metrics(now).await;
    let metrics_snapshot = app.metrics.snapshot(now).await;
    let health = app.overall_health().await;
    serde_json::json!({
        "pool": pool_stats,
        "breaker": {
            "state": format!("{:?}", breaker_metrics.state),
            "failure_rate": breaker_metrics.failure_rate,
            "total_calls": breaker_metrics.total_calls,
        },
        "metrics": metrics_snapshot,
        "health": format!("{health:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::store::InMemoryStore;
    use crate::token::EnvTokenProvider;
    use tokio::io::AsyncReadExt;

    fn sleepy_app() -> Arc<FleetApp> {
        let mut config = FleetConfig::default();
        config.command = "sleep".to_string();
        config.args = vec!["30".to_string()];
        FleetApp::new(config, Arc::new(InMemoryStore::default()), Arc::new(EnvTokenProvider::default()), Utc::now())
    }

    #[tokio::test]
    async fn status_round_trips_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("fleetd.sock");
        let socket_path_str = socket_path.to_str().unwrap().to_string();
        let listener = bind(&socket_path_str).await.unwrap();
        let app = sleepy_app();
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel_clone = cancel.clone();
        let server_handle = tokio::spawn(async move { serve(listener, app, cancel_clone).await });

        let mut stream = UnixStream::connect(&socket_path_str).await.unwrap();
        stream.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"status\",\"params\":{},\"id\":1}\n").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        let response: serde_json::Value = serde_json::from_str(buf.trim()).unwrap();
        assert!(response.get("result").is_some());
        assert_eq!(response["result"]["pool"]["total"], 0);

        cancel.cancel();
        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("fleetd.sock");
        let socket_path_str = socket_path.to_str().unwrap().to_string();
        let listener = bind(&socket_path_str).await.unwrap();
        let app = sleepy_app();
        let cancel = tokio_util::sync::CancellationToken::new();
        let cancel_clone = cancel.clone();
        let server_handle = tokio::spawn(async move { serve(listener, app, cancel_clone).await });

        let mut stream = UnixStream::connect(&socket_path_str).await.unwrap();
        stream.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"nope\",\"params\":{},\"id\":1}\n").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        let response: serde_json::Value = serde_json::from_str(buf.trim()).unwrap();
        assert_eq!(response["error"]["code"], -32601);

        cancel.cancel();
        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn stale_socket_is_removed_and_rebound() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("fleetd.sock");
        let socket_path_str = socket_path.to_str().unwrap().to_string();
        {
            let listener = bind(&socket_path_str).await.unwrap();
            drop(listener);
        }
        assert!(socket_path.exists(), "stale file left behind after drop");
        let listener = bind(&socket_path_str).await.unwrap();
        drop(listener);
    }
}
