//! Daemon status, opcode table, and connection commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    registered_opcodes: usize,
    open_connections: usize,
    unknown_opcode: u64,
    handler_timeouts: u64,
    handler_panics: u64,
}

#[derive(Deserialize)]
struct OpcodesResponse {
    opcodes: Vec<String>,
}

#[derive(Deserialize)]
struct ConnectionsResponse {
    connections: Vec<ConnectionInfo>,
}

#[derive(Deserialize)]
struct ConnectionInfo {
    id: u64,
    remote_endpoint: String,
    authority: String,
    last_activity_unix_ms: i64,
    auth_failures: u64,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Nalix Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Registered opcodes : {}", resp.registered_opcodes);
    println!("  Open connections   : {}", resp.open_connections);
    println!("  Unknown opcode     : {}", resp.unknown_opcode);
    println!("  Handler timeouts   : {}", resp.handler_timeouts);
    println!("  Handler panics     : {}", resp.handler_panics);

    Ok(())
}

pub async fn cmd_opcodes(port: u16) -> Result<()> {
    let resp: OpcodesResponse = get_json(&format!("{}/opcodes", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Registered Opcodes ({})", resp.opcodes.len());
    println!("═══════════════════════════════════════");
    for opcode in &resp.opcodes {
        println!("  {opcode}");
    }

    Ok(())
}

pub async fn cmd_connections(port: u16) -> Result<()> {
    let resp: ConnectionsResponse = get_json(&format!("{}/connections", base_url(port))).await?;

    if resp.connections.is_empty() {
        println!("No open connections.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Open Connections ({})", resp.connections.len());
    println!("═══════════════════════════════════════");
    for c in &resp.connections {
        let icon = if c.auth_failures > 0 { "✗" } else { "✓" };
        println!("  ┌─ {} connection {}", icon, c.id);
        println!("  │  remote       : {}", c.remote_endpoint);
        println!("  │  authority    : {}", c.authority);
        println!("  │  auth failures: {}", c.auth_failures);
        println!("  └─ last active  : {} (unix ms)", c.last_activity_unix_ms);
    }

    Ok(())
}

pub async fn cmd_connection_inspect(port: u16, id: &str) -> Result<()> {
    let id: u64 = id.parse().map_err(|_| anyhow::anyhow!("connection id must be a number"))?;
    let c: ConnectionInfo = get_json(&format!("{}/connections/{}", base_url(port), id)).await?;

    println!("═══════════════════════════════════════");
    println!("  Connection {}", c.id);
    println!("═══════════════════════════════════════");
    println!("  remote        : {}", c.remote_endpoint);
    println!("  authority     : {}", c.authority);
    println!("  auth failures : {}", c.auth_failures);
    println!("  last active   : {} (unix ms)", c.last_activity_unix_ms);

    Ok(())
}
