//! Illustrative controller registered at startup — a liveness opcode
//! so a freshly-started daemon has at least one routable opcode instead
//! of answering every request with `UnknownOpcode`.

use std::sync::Arc;

use nalix_core::Packet;
use nalix_runtime::connection::ConnectionContext;
use nalix_runtime::handler::{HandlerDescriptor, HandlerFuture, HandlerReturn, ReturnKind};
use nalix_runtime::registry::{HandlerRegistry, PacketController};

pub const OPCODE_PING: u16 = 0x0001;

pub struct PingController;

impl PacketController for PingController {
    fn register(self: Arc<Self>, registry: &HandlerRegistry) {
        registry.register(
            HandlerDescriptor::new(OPCODE_PING, Arc::new(handle_ping))
                .with_return_type(ReturnKind::String)
                .with_timeout_ms(1_000),
        );
    }
}

fn handle_ping(_packet: Packet, _connection: Arc<ConnectionContext>) -> HandlerFuture {
    Box::pin(async { Ok(HandlerReturn::String("pong".to_string())) })
}
