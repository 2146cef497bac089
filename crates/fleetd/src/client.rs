//! UDS JSON-RPC client for CLI subcommands. Mirrors
//! `agtmux-runtime::client`'s `rpc_call` shape: one request, one line of
//! response, bail on an `"error"` key.

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

async fn rpc_call(socket_path: &str, method: &str, params: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;
    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }
    Ok(response["result"].clone())
}

/// `fleetd status` — pool/breaker/health summary.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let status = rpc_call(socket_path, "status", json!({})).await?;
    println!("fleetd daemon running");
    println!(
        "pool: {}/{} sessions ({} idle, {} active)",
        status["pool"]["total"], status["pool"]["max_capacity"], status["pool"]["idle"], status["pool"]["active"]
    );
    println!("breaker: {} (failure rate {})", status["breaker"]["state"], status["breaker"]["failure_rate"]);
    println!("health: {}", status["health"]);
    Ok(())
}

/// `fleetd ls` — print every tracked session as JSON.
pub async fn cmd_list_sessions(socket_path: &str) -> anyhow::Result<()> {
    let sessions = rpc_call(socket_path, "list_sessions", json!({})).await?;
    println!("{}", serde_json::to_string_pretty(&sessions)?);
    Ok(())
}
