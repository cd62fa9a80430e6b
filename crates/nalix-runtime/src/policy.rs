//! Policy gates — evaluated in a fixed order before a handler is ever
//! invoked:
//!
//! 1. Encryption-required
//! 2. Permission (authority)
//! 3. Rate limit
//!
//! Timeout isn't a gate in this sense — it bounds the handler invocation
//! itself rather than rejecting before the call — so it's applied by the
//! dispatcher around the call, not here.

use nalix_core::NalixError;

use crate::connection::ConnectionContext;
use crate::handler::HandlerDescriptor;
use crate::rate_limit::RateLimiter;

/// Run every gate for `descriptor` against the connection, in order.
/// Returns the first failure, or `Ok(())` if every gate passes.
///
/// `arrived_encrypted` must reflect whether the *inbound* packet carried
/// the `Encrypted` flag, captured before `UnwrapStage` decrypted it — by
/// the time this gate runs the packet's own flag has already been
/// cleared, so a live `packet.flags.is_encrypted()` check here would
/// reject every encrypted request a handler requires.
pub fn evaluate(
    descriptor: &HandlerDescriptor,
    arrived_encrypted: bool,
    connection: &ConnectionContext,
    rate_limiter: &RateLimiter,
) -> Result<(), NalixError> {
    // 1. Encryption-required
    if descriptor.encryption_required && !arrived_encrypted {
        return Err(NalixError::EncryptionRequired);
    }

    // 2. Permission
    if connection.authority < descriptor.required_authority {
        return Err(NalixError::PermissionDenied);
    }

    // 3. Rate limit
    if let Some(spec) = descriptor.rate_limit {
        if let Err(lockout_ms) =
            rate_limiter.check(connection.id, &descriptor.rate_group, spec)
        {
            return Err(NalixError::RateLimited { lockout_ms });
        }
    }

    Ok(())
}
