//! Shared error taxonomy for the packet runtime.
//!
//! Every error a packet can provoke falls into one of the kinds described
//! in the wire-format design notes: protocol, policy, crypto, resource, or
//! fatal (startup-time only). Protocol/policy/crypto/resource errors never
//! escape the connection boundary — the dispatcher turns them into an
//! error packet via [`PacketErrorCode`]. Fatal errors panic during
//! registration; they are never constructed at request time.

use thiserror::Error;

/// A single-byte error code carried in the optional leading byte of an
/// error packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketErrorCode {
    TruncatedHeader = 1,
    LengthMismatch = 2,
    ChecksumMismatch = 3,
    UnsupportedFlags = 4,
    UnknownOpcode = 5,
    EnvelopeMalformed = 6,
    ReplayDetected = 7,
    PermissionDenied = 8,
    RateLimited = 9,
    EncryptionRequired = 10,
    HandlerTimeout = 11,
    InvalidKey = 12,
    AuthTagMismatch = 13,
    AlreadyEncrypted = 14,
    NotEncrypted = 15,
    SignedCannotBeTransformed = 16,
    BufferExhausted = 17,
    ConcurrencyRejected = 18,
    HandlerFailed = 19,
}

/// Errors arising anywhere in the codec, transformer, or crypto layers.
///
/// Every variant maps to exactly one [`PacketErrorCode`] via [`NalixError::code`].
#[derive(Debug, Error)]
pub enum NalixError {
    // ── Protocol (recoverable per-packet) ──────────────────────────────
    #[error("header truncated: need {need} bytes, have {have}")]
    TruncatedHeader { need: usize, have: usize },
    #[error("declared length {declared} exceeds available {available}")]
    LengthMismatch { declared: usize, available: usize },
    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("reserved flag bits set: {0:#04x}")]
    UnsupportedFlags(u8),
    #[error("no handler registered for opcode {0:#06x}")]
    UnknownOpcode(u16),
    #[error("secure envelope malformed: {0}")]
    EnvelopeMalformed(&'static str),
    #[error("replayed or non-increasing sequence number {seq} (highest seen {highest})")]
    ReplayDetected { seq: u32, highest: u32 },

    // ── Policy ──────────────────────────────────────────────────────────
    #[error("caller authority too low")]
    PermissionDenied,
    #[error("rate limit exceeded, locked out for {lockout_ms}ms")]
    RateLimited { lockout_ms: u64 },
    #[error("handler requires an encrypted packet")]
    EncryptionRequired,
    #[error("handler invocation exceeded {0}ms timeout")]
    HandlerTimeout(u64),

    // ── Crypto ──────────────────────────────────────────────────────────
    #[error("encryption key must be exactly 32 bytes")]
    InvalidKey,
    #[error("AEAD authentication tag did not verify")]
    AuthTagMismatch,
    #[error("payload is already encrypted")]
    AlreadyEncrypted,
    #[error("payload is not encrypted")]
    NotEncrypted,
    #[error("signed packets cannot be transformed")]
    SignedCannotBeTransformed,

    // ── Compression ───────────────────────────────────────────────────
    #[error("payload is already compressed")]
    AlreadyCompressed,
    #[error("payload is not compressed")]
    NotCompressed,
    #[error("payload is empty")]
    EmptyPayload,
    #[error("compressed stream is corrupt: {0}")]
    CorruptCompressedStream(String),
    #[error("unknown compression algorithm id {0}")]
    UnknownCompressionAlgorithm(u8),

    // ── Resource ─────────────────────────────────────────────────────────
    #[error("buffer pool exhausted")]
    BufferExhausted,
    #[error("concurrency limit rejected the request")]
    ConcurrencyRejected,

    // ── Destination sizing ────────────────────────────────────────────
    #[error("destination buffer too small: need {need}, have {have}")]
    DestinationTooSmall { need: usize, have: usize },
}

impl NalixError {
    /// Map this error to the wire-level [`PacketErrorCode`] sent back to
    /// the peer. Purely-internal errors that should never reach the wire
    /// (destination sizing on the send side, compression bookkeeping)
    /// still get a best-effort code so logging/metrics has something
    /// stable to key on.
    pub fn code(&self) -> PacketErrorCode {
        use NalixError::*;
        match self {
            TruncatedHeader { .. } => PacketErrorCode::TruncatedHeader,
            LengthMismatch { .. } => PacketErrorCode::LengthMismatch,
            ChecksumMismatch { .. } => PacketErrorCode::ChecksumMismatch,
            UnsupportedFlags(_) => PacketErrorCode::UnsupportedFlags,
            UnknownOpcode(_) => PacketErrorCode::UnknownOpcode,
            EnvelopeMalformed(_) => PacketErrorCode::EnvelopeMalformed,
            ReplayDetected { .. } => PacketErrorCode::ReplayDetected,
            PermissionDenied => PacketErrorCode::PermissionDenied,
            RateLimited { .. } => PacketErrorCode::RateLimited,
            EncryptionRequired => PacketErrorCode::EncryptionRequired,
            HandlerTimeout(_) => PacketErrorCode::HandlerTimeout,
            InvalidKey => PacketErrorCode::InvalidKey,
            AuthTagMismatch => PacketErrorCode::AuthTagMismatch,
            AlreadyEncrypted => PacketErrorCode::AlreadyEncrypted,
            NotEncrypted => PacketErrorCode::NotEncrypted,
            SignedCannotBeTransformed => PacketErrorCode::SignedCannotBeTransformed,
            BufferExhausted => PacketErrorCode::BufferExhausted,
            ConcurrencyRejected => PacketErrorCode::ConcurrencyRejected,
            // Compression errors and destination sizing don't have a
            // dedicated wire code — they surface as a generic handler
            // failure if they ever escape to the wire.
            AlreadyCompressed | NotCompressed | EmptyPayload | CorruptCompressedStream(_)
            | UnknownCompressionAlgorithm(_) | DestinationTooSmall { .. } => {
                PacketErrorCode::HandlerFailed
            }
        }
    }

    /// True for [`NalixError::AuthTagMismatch`] — callers track repeated
    /// occurrences per connection as a suspicion scorecard.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, NalixError::AuthTagMismatch)
    }
}
