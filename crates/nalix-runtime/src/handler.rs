//! Handler descriptors and return-value mapping.
//!
//! A handler is registered against an opcode along with the policy
//! attributes the dispatcher enforces before ever calling it: required
//! authority, rate limit, timeout, and whether the inbound packet must
//! already be encrypted. The handler itself is a boxed async closure,
//! tagged with the shape of value it resolves to so the dispatcher can
//! map the result back onto the wire without the handler touching
//! framing directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use nalix_core::{NalixError, Packet};

use crate::connection::{Authority, ConnectionContext};

/// Tag describing how a handler's return value should be mapped back
/// onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// No response packet is sent.
    Void,
    /// Raw bytes, wrapped in a `Binary` packet on the same opcode.
    Bytes,
    /// Text, wrapped in a `String` packet.
    String,
    /// A fully-formed packet, sent as-is.
    Packet,
    /// A pooled buffer lease — its bytes become the response payload and
    /// the lease is released once sent.
    Memory,
    /// An async handler with no return value.
    AsyncVoid,
    /// An async handler returning one of the above kinds.
    AsyncOf,
    /// A return type the dispatcher declines to interpret. Declarative —
    /// describes the descriptor's advertised shape; the actual no-response/
    /// logged-once behavior happens when a handler resolves to
    /// [`HandlerReturn::Unsupported`] at dispatch time (see `response.rs`),
    /// since the registry is dynamically typed and can't enforce this at
    /// registration.
    Unsupported,
}

/// The actual value a handler invocation resolved to.
pub enum HandlerReturn {
    Void,
    Bytes(Vec<u8>),
    String(String),
    Packet(Packet),
    Memory(nalix_core::buffer::BufferLease),
    /// A return type the dispatcher declines to interpret — carries the
    /// type name for the log-once/metadata path in `response.rs`. No
    /// response is ever sent for this kind.
    Unsupported(&'static str),
}

pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<HandlerReturn, NalixError>> + Send>>;

/// A handler: takes ownership of the decoded packet and a handle to the
/// connection it arrived on, returns a boxed future resolving to a
/// [`HandlerReturn`].
pub type HandlerFn =
    Arc<dyn Fn(Packet, Arc<ConnectionContext>) -> HandlerFuture + Send + Sync>;

/// Rate-limit budget for one handler.
///
/// `lockout_ms` is distinct from `window_ms`, so the two cannot be
/// collapsed into one field the way a plain fixed-window counter would.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSpec {
    pub max_requests: u32,
    pub window_ms: u64,
    pub lockout_ms: u64,
}

/// Everything the dispatcher needs to know about one opcode before it
/// ever calls the handler: policy attributes plus the handler itself.
#[derive(Clone)]
pub struct HandlerDescriptor {
    pub opcode: u16,
    pub handler: HandlerFn,
    /// Defaults to `Guest`.
    pub required_authority: Authority,
    pub rate_limit: Option<RateLimitSpec>,
    /// Defaults to the handler's own name; callers that don't care pass
    /// a stable string derived from the opcode.
    pub rate_group: String,
    /// Defaults to 5000ms.
    pub timeout_ms: u64,
    pub encryption_required: bool,
    pub return_type: ReturnKind,
}

impl HandlerDescriptor {
    /// Build a descriptor with sensible defaults, overriding only what
    /// the caller specifies.
    pub fn new(opcode: u16, handler: HandlerFn) -> Self {
        Self {
            opcode,
            handler,
            required_authority: Authority::Guest,
            rate_limit: None,
            rate_group: format!("opcode-{opcode:#06x}"),
            timeout_ms: 5_000,
            encryption_required: false,
            return_type: ReturnKind::Void,
        }
    }

    pub fn with_authority(mut self, authority: Authority) -> Self {
        self.required_authority = authority;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32, window_ms: u64, lockout_ms: u64) -> Self {
        self.rate_limit = Some(RateLimitSpec { max_requests, window_ms, lockout_ms });
        self
    }

    pub fn with_rate_group(mut self, group: impl Into<String>) -> Self {
        self.rate_group = group.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn require_encryption(mut self) -> Self {
        self.encryption_required = true;
        self
    }

    pub fn with_return_type(mut self, return_type: ReturnKind) -> Self {
        self.return_type = return_type;
        self
    }
}
