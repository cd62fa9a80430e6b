//! Startup-time fatal errors: configuration mistakes that must never
//! reach production traffic, so they abort initialization rather than
//! surfacing as a per-request error packet the way
//! `nalix_core::NalixError`'s variants do.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("duplicate handler registration for opcode {0:#06x}")]
    DuplicateOpcode(u16),
}
