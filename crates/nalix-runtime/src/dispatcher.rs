//! The dispatcher — the runtime's single entry point. Every raw-byte/
//! `Packet` entry point converges on [`Dispatcher::dispatch_packet`]
//! after parsing: opcode lookup, the middleware pipeline, handler
//! invocation under a timeout, and return-value mapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nalix_core::wire::{decode, error_packet};
use nalix_core::{NalixError, Packet, PacketErrorCode};

use crate::connection::ConnectionContext;
use crate::middleware::{PacketContext, Pipeline, StageDeps};
use crate::rate_limit::RateLimiter;
use crate::registry::HandlerRegistry;
use crate::response::{to_response_frame, ResponseFrame, UnsupportedReturnLog};

/// A consecutive-`AuthTagMismatch` threshold past which a connection is
/// flagged for disconnection as suspicious.
const AUTH_FAILURE_DISCONNECT_THRESHOLD: u64 = 8;

/// What the caller (the transport loop) should do with one inbound frame.
pub struct DispatchOutcome {
    /// What to send back on the connection, if anything.
    pub response: ResponseFrame,
    /// Whether the transport should close the connection after sending
    /// `response` — set for sustained auth-tag failures, never for a
    /// single recoverable protocol/policy error.
    pub disconnect: bool,
}

impl DispatchOutcome {
    fn respond(packet: Packet, disconnect: bool) -> Self {
        Self { response: ResponseFrame::Framed(packet), disconnect }
    }
}

/// Runtime counters exposed to the admin/introspection surface (`nalix-api`).
#[derive(Default)]
pub struct DispatchMetrics {
    pub unknown_opcode: AtomicU64,
    pub handler_timeouts: AtomicU64,
    pub handler_panics: AtomicU64,
}

pub struct Dispatcher {
    registry: HandlerRegistry,
    pipeline: Pipeline,
    rate_limiter: RateLimiter,
    pub metrics: Arc<DispatchMetrics>,
    unsupported_returns: UnsupportedReturnLog,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            pipeline: Pipeline::with_defaults(),
            rate_limiter: RateLimiter::new(),
            metrics: Arc::new(DispatchMetrics::default()),
            unsupported_returns: UnsupportedReturnLog::new(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Decode `bytes` as a packet and dispatch it. Parse failures never
    /// reach a handler — they produce a protocol-error packet directly,
    /// and disconnect only when the failure itself is disqualifying
    /// (a bad checksum, not a merely-unknown opcode).
    pub async fn dispatch_bytes(
        &self,
        bytes: &[u8],
        connection: Arc<ConnectionContext>,
    ) -> DispatchOutcome {
        match decode(bytes) {
            Ok(packet) => self.dispatch_packet(packet, connection).await,
            Err(err) => {
                let disconnect = matches!(err, NalixError::ChecksumMismatch { .. });
                DispatchOutcome {
                    response: ResponseFrame::Framed(error_response(&err)),
                    disconnect,
                }
            }
        }
    }

    /// Dispatch an already-decoded packet: lookup → pre-pipeline → handler
    /// (under timeout, panic-safe) → return-value handling → post-pipeline.
    pub async fn dispatch_packet(
        &self,
        packet: Packet,
        connection: Arc<ConnectionContext>,
    ) -> DispatchOutcome {
        let descriptor = match self.registry.get(packet.opcode) {
            Some(d) => d,
            None => {
                self.metrics.unknown_opcode.fetch_add(1, Ordering::Relaxed);
                return DispatchOutcome::respond(
                    error_packet(
                        PacketErrorCode::UnknownOpcode,
                        &format!("no handler registered for opcode {:#06x}", packet.opcode),
                    ),
                    false,
                );
            }
        };

        let deps = StageDeps { rate_limiter: self.rate_limiter.clone() };
        let arrived_encrypted = packet.flags.is_encrypted();
        let mut ctx = PacketContext {
            packet,
            connection: Arc::clone(&connection),
            descriptor,
            arrived_encrypted,
            properties: HashMap::new(),
        };

        // Computed after `run_pre` returns, not before: a short-circuit
        // rejection (e.g. `UnwrapStage` on `AuthTagMismatch`) is exactly
        // the case that increments `auth_failures`, so the threshold must
        // be checked against the pipeline's post-run state regardless of
        // which arm below returns.
        let pre_result = self.pipeline.run_pre(&mut ctx, &deps).await;
        let disconnect = connection.auth_failures() >= AUTH_FAILURE_DISCONNECT_THRESHOLD;

        match pre_result {
            Ok(Some(short_circuit)) => return DispatchOutcome::respond(short_circuit, disconnect),
            Ok(None) => {}
            Err(err) => return DispatchOutcome::respond(error_response(&err), disconnect),
        }

        let handler_return = match self.invoke_with_timeout(&ctx).await {
            Ok(Ok(value)) => value,
            Ok(Err(handler_err)) => {
                tracing::error!(
                    opcode = ctx.packet.opcode,
                    connection = connection.id,
                    error = %handler_err,
                    "handler returned an error"
                );
                return DispatchOutcome {
                    response: ResponseFrame::Framed(generic_failure_packet()),
                    disconnect,
                };
            }
            Err(Invocation::Timeout) => {
                self.metrics.handler_timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    opcode = ctx.packet.opcode,
                    connection = connection.id,
                    timeout_ms = ctx.descriptor.timeout_ms,
                    "handler invocation timed out"
                );
                // The post-pipeline still runs for cleanup — give Wrap a
                // chance to frame the timeout notice the same way a normal
                // response would be.
                ctx.packet = error_packet(
                    PacketErrorCode::HandlerTimeout,
                    &format!("handler exceeded {}ms timeout", ctx.descriptor.timeout_ms),
                );
                let _ = self.pipeline.run_post(&mut ctx, &deps).await;
                return DispatchOutcome { response: ResponseFrame::Framed(ctx.packet), disconnect };
            }
            Err(Invocation::Panicked) => {
                self.metrics.handler_panics.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    opcode = ctx.packet.opcode,
                    connection = connection.id,
                    "handler panicked"
                );
                return DispatchOutcome {
                    response: ResponseFrame::Framed(generic_failure_packet()),
                    disconnect,
                };
            }
        };

        let frame = match to_response_frame(handler_return, &mut ctx, &self.unsupported_returns) {
            Ok(frame) => frame,
            Err(err) => return DispatchOutcome { response: ResponseFrame::Framed(error_response(&err)), disconnect },
        };

        let response = match frame {
            ResponseFrame::None => ResponseFrame::None,
            // Raw bytes/memory bypass Wrap entirely: sent as-is, not
            // wrapped in a Packet.
            raw @ ResponseFrame::Raw(_) => raw,
            ResponseFrame::Framed(packet) => {
                ctx.packet = packet;
                if let Err(err) = self.pipeline.run_post(&mut ctx, &deps).await {
                    return DispatchOutcome { response: ResponseFrame::Framed(error_response(&err)), disconnect };
                }
                ResponseFrame::Framed(ctx.packet)
            }
        };

        DispatchOutcome { response, disconnect }
    }

    /// Run the handler under `descriptor.timeout_ms`, catching panics so
    /// they never escape to the connection's task — nothing crosses the
    /// connection boundary except an error packet or a normal response.
    async fn invoke_with_timeout(
        &self,
        ctx: &PacketContext,
    ) -> Result<Result<crate::handler::HandlerReturn, NalixError>, Invocation> {
        let handler = Arc::clone(&ctx.descriptor.handler);
        let packet = ctx.packet.clone();
        let connection = Arc::clone(&ctx.connection);
        let timeout = Duration::from_millis(ctx.descriptor.timeout_ms);

        // A panicking task surfaces as a `JoinError` here rather than
        // unwinding into the caller — `tokio::spawn` already gives handler
        // invocations the isolation `catch_unwind` would.
        let join = tokio::spawn(async move { handler(packet, connection).await });

        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_join_err)) => Err(Invocation::Panicked),
            Err(_elapsed) => Err(Invocation::Timeout),
        }
    }
}

enum Invocation {
    Timeout,
    Panicked,
}

fn error_response(err: &NalixError) -> Packet {
    error_packet(err.code(), &err.to_string())
}

/// A generic error packet sent in place of a handler's error: never
/// propagate the handler's own message or error type to the connection.
fn generic_failure_packet() -> Packet {
    error_packet(
        PacketErrorCode::HandlerFailed,
        "An error occurred while processing your request.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Authority;
    use crate::handler::{HandlerDescriptor, HandlerFuture, HandlerReturn};
    use nalix_core::wire::{PacketBuilder, PacketType, Protocol};
    use std::sync::atomic::AtomicBool;

    fn test_connection() -> Arc<ConnectionContext> {
        ConnectionContext::new(
            1,
            "127.0.0.1:9000".parse().unwrap(),
            nalix_core::crypto::CipherSuite::AesGcm,
            Authority::Guest,
            0,
        )
    }

    fn plain_packet(opcode: u16) -> Packet {
        PacketBuilder::new(opcode, Protocol::Tcp).payload(vec![1, 2, 3]).build().unwrap()
    }

    #[tokio::test]
    async fn unknown_opcode_produces_error_and_leaves_connection_open() {
        let dispatcher = Dispatcher::new(HandlerRegistry::new());
        let outcome = dispatcher.dispatch_packet(plain_packet(0xFFFE), test_connection()).await;
        assert!(!outcome.disconnect);
        match outcome.response {
            ResponseFrame::Framed(p) => {
                assert_eq!(p.opcode, 0);
                assert_eq!(p.r#type, PacketType::String);
                assert_eq!(p.payload[0], PacketErrorCode::UnknownOpcode as u8);
            }
            _ => panic!("expected a framed error packet"),
        }
        assert_eq!(dispatcher.metrics.unknown_opcode.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn permission_denied_never_invokes_handler() {
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_clone = Arc::clone(&invoked);
        let registry = HandlerRegistry::new();
        registry.register(
            HandlerDescriptor::new(
                1,
                Arc::new(move |_p, _c| -> HandlerFuture {
                    let invoked = Arc::clone(&invoked_clone);
                    Box::pin(async move {
                        invoked.store(true, Ordering::SeqCst);
                        Ok(HandlerReturn::Void)
                    })
                }),
            )
            .with_authority(Authority::User),
        );

        let dispatcher = Dispatcher::new(registry);
        let outcome = dispatcher.dispatch_packet(plain_packet(1), test_connection()).await;
        assert!(!invoked.load(Ordering::SeqCst));
        match outcome.response {
            ResponseFrame::Framed(p) => {
                assert_eq!(p.payload[0], PacketErrorCode::PermissionDenied as u8);
            }
            _ => panic!("expected a framed error packet"),
        }
    }

    #[tokio::test]
    async fn void_handler_produces_no_response() {
        let registry = HandlerRegistry::new();
        registry.register(HandlerDescriptor::new(
            1,
            Arc::new(|_p, _c| -> HandlerFuture { Box::pin(async { Ok(HandlerReturn::Void) }) }),
        ));
        let dispatcher = Dispatcher::new(registry);
        let outcome = dispatcher.dispatch_packet(plain_packet(1), test_connection()).await;
        assert!(matches!(outcome.response, ResponseFrame::None));
    }

    #[tokio::test]
    async fn string_handler_produces_framed_response() {
        let registry = HandlerRegistry::new();
        registry.register(HandlerDescriptor::new(
            1,
            Arc::new(|_p, _c| -> HandlerFuture {
                Box::pin(async { Ok(HandlerReturn::String("pong".to_string())) })
            }),
        ));
        let dispatcher = Dispatcher::new(registry);
        let outcome = dispatcher.dispatch_packet(plain_packet(1), test_connection()).await;
        match outcome.response {
            ResponseFrame::Framed(p) => assert_eq!(p.payload, b"pong"),
            _ => panic!("expected a framed response"),
        }
    }

    #[tokio::test]
    async fn handler_timeout_produces_timeout_error() {
        let registry = HandlerRegistry::new();
        registry.register(
            HandlerDescriptor::new(
                1,
                Arc::new(|_p, _c| -> HandlerFuture {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(HandlerReturn::Void)
                    })
                }),
            )
            .with_timeout_ms(5),
        );
        let dispatcher = Dispatcher::new(registry);
        let outcome = dispatcher.dispatch_packet(plain_packet(1), test_connection()).await;
        match outcome.response {
            ResponseFrame::Framed(p) => {
                assert_eq!(p.payload[0], PacketErrorCode::HandlerTimeout as u8);
            }
            _ => panic!("expected a framed timeout error"),
        }
        assert_eq!(dispatcher.metrics.handler_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn handler_panic_is_caught_and_reported_generically() {
        let registry = HandlerRegistry::new();
        registry.register(HandlerDescriptor::new(
            1,
            Arc::new(|_p, _c| -> HandlerFuture {
                Box::pin(async { panic!("boom") })
            }),
        ));
        let dispatcher = Dispatcher::new(registry);
        let outcome = dispatcher.dispatch_packet(plain_packet(1), test_connection()).await;
        match outcome.response {
            ResponseFrame::Framed(p) => {
                assert_eq!(p.payload[0], PacketErrorCode::HandlerFailed as u8);
            }
            _ => panic!("expected a framed generic-failure packet"),
        }
        assert_eq!(dispatcher.metrics.handler_panics.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn dispatch_bytes_on_truncated_input_does_not_disconnect() {
        let dispatcher = Dispatcher::new(HandlerRegistry::new());
        let outcome = dispatcher.dispatch_bytes(&[0u8; 4], test_connection()).await;
        assert!(!outcome.disconnect);
        assert!(matches!(outcome.response, ResponseFrame::Framed(_)));
    }

    /// Repeated `AuthTagMismatch` rejections take the pre-pipeline
    /// short-circuit path (`UnwrapStage` returns `Ok(Some(_))`), which must
    /// still flag disconnect once `auth_failures` crosses the threshold.
    #[tokio::test]
    async fn repeated_auth_failures_via_short_circuit_trigger_disconnect() {
        let registry = HandlerRegistry::new();
        registry.register(
            HandlerDescriptor::new(
                1,
                Arc::new(|_p, _c| -> HandlerFuture { Box::pin(async { Ok(HandlerReturn::Void) }) }),
            )
            .require_encryption(),
        );
        let dispatcher = Dispatcher::new(registry);
        let connection = test_connection();
        connection.set_encryption_key([0x22u8; 32]).await;

        let wrong_key = [0x33u8; 32];
        let mut last_outcome = None;
        for seq in 0..AUTH_FAILURE_DISCONNECT_THRESHOLD {
            let plain = plain_packet(1);
            let forged = nalix_core::transformer::encrypt(
                &plain,
                &wrong_key,
                nalix_core::crypto::CipherSuite::AesGcm,
                seq as u32,
            )
            .unwrap();
            last_outcome = Some(dispatcher.dispatch_packet(forged, Arc::clone(&connection)).await);
        }

        let outcome = last_outcome.unwrap();
        assert!(connection.auth_failures() >= AUTH_FAILURE_DISCONNECT_THRESHOLD);
        assert!(outcome.disconnect);
        match outcome.response {
            ResponseFrame::Framed(p) => {
                assert_eq!(p.payload[0], PacketErrorCode::AuthTagMismatch as u8);
            }
            _ => panic!("expected a framed auth-failure error"),
        }
    }

    #[tokio::test]
    async fn unsupported_return_produces_no_response() {
        let registry = HandlerRegistry::new();
        registry.register(HandlerDescriptor::new(
            1,
            Arc::new(|_p, _c| -> HandlerFuture {
                Box::pin(async { Ok(HandlerReturn::Unsupported("CustomFuture")) })
            }),
        ));
        let dispatcher = Dispatcher::new(registry);
        let outcome = dispatcher.dispatch_packet(plain_packet(1), test_connection()).await;
        assert!(matches!(outcome.response, ResponseFrame::None));
        assert!(!outcome.disconnect);
    }
}
