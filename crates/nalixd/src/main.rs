//! nalixd — minimal illustrative packet daemon.
//!
//! Accepts TCP connections, frames inbound bytes using the wire format's
//! own `length` header field (no separate length-prefix transport is
//! needed — the thinnest possible accept loop satisfies it), and feeds
//! each frame to the dispatcher. Tracing init, one task spawned per
//! concern, `tokio::select!` to catch a dead task — the same shape as
//! any small async daemon, scaled down to one task per connection.

mod ping;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use nalix_api::ApiState;
use nalix_core::config::NalixConfig;
use nalix_core::wire::{encode, HEADER_SIZE, MAX_PACKET_LEN};
use nalix_runtime::{
    connection::new_connection_table, Authority, ConnectionContext, ConnectionTable,
    Dispatcher, HandlerRegistry, ResponseFrame,
};

const API_PORT: u16 = 9001;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = NalixConfig::load().context("loading configuration")?;
    tracing::info!(tcp_bind = %config.network.tcp_bind, "nalixd starting");

    let registry = HandlerRegistry::new();
    registry.register_all(vec![Arc::new(ping::PingController) as _]);

    let dispatcher = Arc::new(Dispatcher::new(registry));
    let connections = new_connection_table();

    let listener = TcpListener::bind(&config.network.tcp_bind)
        .await
        .with_context(|| format!("binding {}", config.network.tcp_bind))?;
    tracing::info!(addr = %config.network.tcp_bind, "listening");

    let accept_loop = {
        let dispatcher = Arc::clone(&dispatcher);
        let connections = Arc::clone(&connections);
        tokio::spawn(async move { accept_loop(listener, dispatcher, connections).await })
    };

    let api_server = {
        let state = ApiState { dispatcher: Arc::clone(&dispatcher), connections: Arc::clone(&connections) };
        tokio::spawn(async move { nalix_api::serve(state, API_PORT).await })
    };

    tokio::select! {
        r = accept_loop => tracing::error!("accept loop exited: {:?}", r),
        r = api_server => tracing::error!("api server exited: {:?}", r),
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
    }

    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionTable,
) -> Result<()> {
    let mut next_id: u64 = 1;
    loop {
        let (stream, remote_endpoint) = listener.accept().await.context("accepting connection")?;
        let id = next_id;
        next_id += 1;

        let connection = ConnectionContext::new(
            id,
            remote_endpoint,
            nalix_core::crypto::CipherSuite::AesGcm,
            Authority::Guest,
            now_unix_ms(),
        );
        connections.insert(id, Arc::clone(&connection));

        let dispatcher = Arc::clone(&dispatcher);
        let connections_for_task = Arc::clone(&connections);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, dispatcher, Arc::clone(&connection)).await
            {
                tracing::warn!(connection = connection.id, error = %err, "connection closed");
            }
            connections_for_task.remove(&connection.id);
        });
    }
}

/// Read one frame at a time — the wire header's own `length` field (first
/// two bytes, little-endian) tells us how many more bytes to read, so no
/// additional length-prefix framing is layered on top.
async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    connection: Arc<ConnectionContext>,
) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE];
    loop {
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(());
        }

        let declared_len = u16::from_le_bytes([header[0], header[1]]) as usize;
        if declared_len < HEADER_SIZE || declared_len > MAX_PACKET_LEN {
            tracing::warn!(connection = connection.id, declared_len, "bad frame length");
            return Ok(());
        }

        let mut frame = Vec::with_capacity(declared_len);
        frame.extend_from_slice(&header);
        frame.resize(declared_len, 0);
        stream.read_exact(&mut frame[HEADER_SIZE..]).await?;

        connection.touch(now_unix_ms());
        let outcome = dispatcher.dispatch_bytes(&frame, Arc::clone(&connection)).await;

        match outcome.response {
            ResponseFrame::None => {}
            ResponseFrame::Raw(bytes) => stream.write_all(&bytes).await?,
            ResponseFrame::Framed(packet) => {
                let mut out = vec![0u8; packet.length()];
                let written = encode(&packet, &mut out)?;
                stream.write_all(&out[..written]).await?;
            }
        }

        if outcome.disconnect {
            return Ok(());
        }
    }
}

fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
