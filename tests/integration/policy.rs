//! Dispatcher-level integration scenarios (`spec.md` §8: S4-S6) — driven
//! through the real [`Dispatcher`], not the bare [`RateLimiter`]/policy
//! gate in isolation, so the full pre-pipeline → policy → handler path
//! is what's under test.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use nalix_core::wire::{PacketBuilder, Protocol};
use nalix_runtime::connection::{Authority, ConnectionContext};
use nalix_runtime::handler::{HandlerDescriptor, HandlerFuture, HandlerReturn};
use nalix_runtime::registry::HandlerRegistry;
use nalix_runtime::{Dispatcher, ResponseFrame};

fn connection(authority: Authority) -> Arc<ConnectionContext> {
    ConnectionContext::new(
        1,
        "127.0.0.1:9000".parse().unwrap(),
        nalix_core::crypto::CipherSuite::AesGcm,
        authority,
        0,
    )
}

fn void_handler() -> nalix_runtime::handler::HandlerFn {
    Arc::new(|_packet, _ctx| -> HandlerFuture { Box::pin(async { Ok(HandlerReturn::Void) }) })
}

/// S4 — a third call within the window is turned away, and the dispatcher
/// never invokes the handler for it (only two `Void` responses are ever
/// produced, proven by the handler's own call counter).
#[tokio::test]
async fn rate_limit_under_load() {
    let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let registry = HandlerRegistry::new();
    let counted_calls = Arc::clone(&calls);
    registry.register(
        HandlerDescriptor::new(
            0x0010,
            Arc::new(move |_packet, _ctx| -> HandlerFuture {
                let calls = Arc::clone(&counted_calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(HandlerReturn::Void)
                })
            }),
        )
        .with_rate_limit(2, 1_000, 20_000),
    );
    let dispatcher = Dispatcher::new(registry);
    let conn = connection(Authority::Guest);

    let packet = |seq: u8| {
        PacketBuilder::new(0x0010, Protocol::Tcp)
            .payload(vec![seq])
            .build()
            .unwrap()
    };

    for i in 0..2 {
        let outcome = dispatcher.dispatch_packet(packet(i), Arc::clone(&conn)).await;
        assert!(matches!(outcome.response, ResponseFrame::None));
    }

    let outcome = dispatcher.dispatch_packet(packet(2), Arc::clone(&conn)).await;
    assert!(matches!(outcome.response, ResponseFrame::Framed(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "third call must never reach the handler");
}

/// A `Supervisor` connection under budget, hitting an opcode that
/// requires encryption, correct authority, and a rate-limit slot, clears
/// every gate and reaches the handler — the mirror image of S4/S5/S6,
/// proving the gate order doesn't reject traffic it shouldn't.
#[tokio::test]
async fn legitimate_traffic_clears_every_gate() {
    use nalix_core::crypto::CipherSuite;
    use nalix_core::transformer;

    let registry = HandlerRegistry::new();
    registry.register(
        HandlerDescriptor::new(0x0030, void_handler())
            .require_encryption()
            .with_authority(Authority::Supervisor)
            .with_rate_limit(5, 1_000, 5_000),
    );
    let dispatcher = Dispatcher::new(registry);
    let conn = connection(Authority::Supervisor);
    let key = [0x21u8; 32];
    conn.set_encryption_key(key).await;

    let plain = PacketBuilder::new(0x0030, Protocol::Tcp)
        .payload(vec![1, 2, 3])
        .build()
        .unwrap();
    let packet = transformer::encrypt(&plain, &key, CipherSuite::AesGcm, conn.next_outbound_seq())
        .unwrap();

    let outcome = dispatcher.dispatch_packet(packet, conn).await;

    assert!(!outcome.disconnect);
    assert!(matches!(outcome.response, ResponseFrame::None));
}
