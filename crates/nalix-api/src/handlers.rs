//! HTTP API handlers — exposes dispatcher/connection state as JSON.
//!
//! A read-only introspection surface, not a general-purpose RPC layer.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use nalix_runtime::{ConnectionTable, Dispatcher};

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
    pub connections: ConnectionTable,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub registered_opcodes: usize,
    pub open_connections: usize,
    pub unknown_opcode: u64,
    pub handler_timeouts: u64,
    pub handler_panics: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let metrics = &state.dispatcher.metrics;
    Json(StatusResponse {
        registered_opcodes: state.dispatcher.registry().len(),
        open_connections: state.connections.len(),
        unknown_opcode: metrics.unknown_opcode.load(Ordering::Relaxed),
        handler_timeouts: metrics.handler_timeouts.load(Ordering::Relaxed),
        handler_panics: metrics.handler_panics.load(Ordering::Relaxed),
    })
}

// ── /opcodes ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct OpcodesResponse {
    pub opcodes: Vec<String>,
}

pub async fn handle_opcodes(State(state): State<ApiState>) -> Json<OpcodesResponse> {
    let mut opcodes: Vec<u16> = state.dispatcher.registry().opcodes();
    opcodes.sort_unstable();
    Json(OpcodesResponse {
        opcodes: opcodes.into_iter().map(|op| format!("{op:#06x}")).collect(),
    })
}

// ── /connections ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionInfo>,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub remote_endpoint: String,
    pub authority: String,
    pub last_activity_unix_ms: i64,
    pub auth_failures: u64,
}

pub async fn handle_connections(State(state): State<ApiState>) -> Json<ConnectionsResponse> {
    let connections = state
        .connections
        .iter()
        .map(|entry| connection_info(entry.value()))
        .collect();
    Json(ConnectionsResponse { connections })
}

pub async fn handle_connection_inspect(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<ConnectionInfo>, (StatusCode, String)> {
    let connection = state
        .connections
        .get(&id)
        .ok_or((StatusCode::NOT_FOUND, "connection not found".to_string()))?;
    Ok(Json(connection_info(connection.value())))
}

fn connection_info(connection: &Arc<nalix_runtime::ConnectionContext>) -> ConnectionInfo {
    ConnectionInfo {
        id: connection.id,
        remote_endpoint: connection.remote_endpoint.to_string(),
        authority: format!("{:?}", connection.authority),
        last_activity_unix_ms: connection.last_activity_unix_ms(),
        auth_failures: connection.auth_failures(),
    }
}
