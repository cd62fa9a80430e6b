//! Return-value-to-wire mapping.
//!
//! Once a handler resolves to a [`HandlerReturn`], this is the only place
//! that decides what goes on the wire: raw bytes for `Bytes`/`Memory`
//! (sent as-is, no packet framing), a literal `String`-typed packet for
//! `String`, the packet itself for `Packet`, nothing for `Void` or
//! `Unsupported`.

use dashmap::DashSet;

use nalix_core::wire::{PacketBuilder, PacketType, Protocol};
use nalix_core::{NalixError, Packet};

use crate::handler::HandlerReturn;
use crate::middleware::PacketContext;

/// What actually goes out on the transport after a handler runs.
pub enum ResponseFrame {
    /// No response is sent.
    None,
    /// Raw bytes sent directly on the connection, not wrapped in a packet.
    Raw(Vec<u8>),
    /// A fully-framed packet, to be encoded and sent.
    Framed(Packet),
}

/// Tracks which `Unsupported` type names have already been logged, so a
/// handler that keeps resolving to the same unsupported shape doesn't
/// flood the log — one warning per unique type name, for the lifetime of
/// the dispatcher that owns this.
#[derive(Default)]
pub struct UnsupportedReturnLog(DashSet<&'static str>);

impl UnsupportedReturnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `type_name`, returning `true` the first time it's seen.
    fn record(&self, type_name: &'static str) -> bool {
        self.0.insert(type_name)
    }
}

/// Convert a resolved handler return into the frame to send. `ctx` is
/// mutated for the `Unsupported` case only, where `"UnsupportedReturnType"`
/// metadata is attached for whoever inspects `ctx.properties` downstream.
pub fn to_response_frame(
    handler_return: HandlerReturn,
    ctx: &mut PacketContext,
    unsupported_log: &UnsupportedReturnLog,
) -> Result<ResponseFrame, NalixError> {
    match handler_return {
        HandlerReturn::Void => Ok(ResponseFrame::None),
        HandlerReturn::Bytes(bytes) => Ok(ResponseFrame::Raw(bytes)),
        HandlerReturn::String(text) => {
            let packet = PacketBuilder::new(0, Protocol::Tcp)
                .r#type(PacketType::String)
                .payload(text.into_bytes())
                .build()?;
            Ok(ResponseFrame::Framed(packet))
        }
        HandlerReturn::Packet(packet) => Ok(ResponseFrame::Framed(packet)),
        HandlerReturn::Memory(lease) => Ok(ResponseFrame::Raw(lease.try_detach())),
        HandlerReturn::Unsupported(type_name) => {
            if unsupported_log.record(type_name) {
                tracing::warn!(type_name, "handler resolved to an unsupported return type");
            }
            ctx.properties
                .insert("UnsupportedReturnType".to_string(), type_name.to_string());
            Ok(ResponseFrame::None)
        }
    }
}
