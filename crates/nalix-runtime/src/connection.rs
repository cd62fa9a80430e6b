//! Per-connection state: crypto state, metadata, and a dedicated send
//! queue kept together in one table entry. One [`ConnectionContext`] per
//! TCP/UDP peer, tracking its negotiated encryption, its authority tier,
//! an outbound send queue, and a liveness timestamp.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use zeroize::Zeroize;

use nalix_core::crypto::{CipherSuite, SequenceGuard};
use nalix_core::{NalixError, Packet};

/// Caller authority tier. Ordered `Guest < User < Supervisor < Admin` —
/// a handler's `required_authority` is satisfied when the connection's
/// authority is greater than or equal to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Authority {
    Guest,
    User,
    Supervisor,
    Admin,
}

/// State for one connection: identity, negotiated crypto, authority, and
/// an outbound queue a transport task drains.
pub struct ConnectionContext {
    pub id: u64,
    pub remote_endpoint: std::net::SocketAddr,
    encryption_key: Mutex<Option<[u8; 32]>>,
    pub encryption_suite: CipherSuite,
    pub authority: Authority,
    send_tx: mpsc::UnboundedSender<Packet>,
    send_rx: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
    last_activity_unix_ms: AtomicI64,
    outbound_seq: AtomicU64,
    inbound_seq_guard: Mutex<SequenceGuard>,
    /// Consecutive `AuthTagMismatch` occurrences — a suspicion scorecard
    /// that grounds an optional disconnect decision for callers without
    /// dictating the threshold here.
    auth_failures: AtomicU64,
}

impl ConnectionContext {
    pub fn new(
        id: u64,
        remote_endpoint: std::net::SocketAddr,
        encryption_suite: CipherSuite,
        authority: Authority,
        now_unix_ms: i64,
    ) -> Arc<Self> {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            id,
            remote_endpoint,
            encryption_key: Mutex::new(None),
            encryption_suite,
            authority,
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            last_activity_unix_ms: AtomicI64::new(now_unix_ms),
            outbound_seq: AtomicU64::new(0),
            inbound_seq_guard: Mutex::new(SequenceGuard::new()),
            auth_failures: AtomicU64::new(0),
        })
    }

    /// Install the key derived from the handshake. Replaces (and zeroizes)
    /// any previous key.
    pub async fn set_encryption_key(&self, mut key: [u8; 32]) {
        let mut slot = self.encryption_key.lock().await;
        if let Some(mut old) = slot.take() {
            old.zeroize();
        }
        *slot = Some(key);
        key.zeroize();
    }

    pub async fn encryption_key(&self) -> Option<[u8; 32]> {
        *self.encryption_key.lock().await
    }

    /// Next outbound sequence number for the secure envelope.
    pub fn next_outbound_seq(&self) -> u32 {
        self.outbound_seq.fetch_add(1, Ordering::SeqCst) as u32
    }

    /// Check-and-advance the inbound replay guard for `seq`. Only advances
    /// on success — see `nalix_core::crypto::SequenceGuard`. Callers must
    /// only invoke this once `seq` is known to belong to an authenticated
    /// packet; see [`Self::decrypt_inbound`] for the encrypted-packet path,
    /// which never gives a forged envelope the chance to call this early.
    pub async fn accept_inbound_seq(&self, seq: u32) -> Result<(), NalixError> {
        let mut guard = self.inbound_seq_guard.lock().await;
        guard.check(seq)?;
        guard.advance(seq);
        Ok(())
    }

    /// Decrypt an inbound packet against this connection's real replay
    /// guard, advancing it only once the AEAD tag has verified.
    ///
    /// This runs the check-decrypt-advance sequence under a single lock
    /// acquisition rather than checking the sequence number up front and
    /// decrypting separately — a forged envelope with a fresh, unused
    /// `seq` must never be able to consume that `seq` against the real
    /// connection state, or it permanently denies the legitimate sender
    /// a packet at that sequence number (a DoS on a never-authenticated
    /// packet). `nalix_core::transformer::decrypt` already only advances
    /// its guard after `aead_decrypt` succeeds, so handing it this
    /// connection's own guard (instead of a throwaway one) is sufficient.
    pub async fn decrypt_inbound(
        &self,
        packet: &Packet,
        key: &[u8; 32],
        suite: CipherSuite,
    ) -> Result<Packet, NalixError> {
        let mut guard = self.inbound_seq_guard.lock().await;
        nalix_core::transformer::decrypt(packet, key, suite, &mut guard)
    }

    pub fn touch(&self, now_unix_ms: i64) {
        self.last_activity_unix_ms.store(now_unix_ms, Ordering::Relaxed);
    }

    pub fn last_activity_unix_ms(&self) -> i64 {
        self.last_activity_unix_ms.load(Ordering::Relaxed)
    }

    pub fn record_auth_failure(&self) -> u64 {
        self.auth_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Enqueue a packet for the transport task to send.
    pub fn enqueue(&self, packet: Packet) -> Result<(), mpsc::error::SendError<Packet>> {
        self.send_tx.send(packet)
    }

    /// Take ownership of the receiving half, for the transport task that
    /// drains this connection's outbound queue. Can only be taken once.
    pub async fn take_send_receiver(&self) -> Option<mpsc::UnboundedReceiver<Packet>> {
        self.send_rx.lock().await.take()
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        // `Mutex<Option<[u8;32]>>` isn't reachable mutably from `Drop`
        // without blocking; best-effort zero via `try_lock` covers the
        // common case (no other task holds a clone of this `Arc`'s guard
        // across the drop), and the key is already gone once
        // `Some(key)` is replaced in `set_encryption_key`/never re-read.
        if let Ok(mut slot) = self.encryption_key.try_lock() {
            if let Some(mut key) = slot.take() {
                key.zeroize();
            }
        }
    }
}

/// The connection table shared across all connection tasks.
pub type ConnectionTable = Arc<DashMap<u64, Arc<ConnectionContext>>>;

pub fn new_connection_table() -> ConnectionTable {
    Arc::new(DashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_addr() -> std::net::SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn authority_ordering() {
        assert!(Authority::Guest < Authority::User);
        assert!(Authority::User < Authority::Supervisor);
        assert!(Authority::Supervisor < Authority::Admin);
    }

    #[tokio::test]
    async fn encryption_key_round_trip() {
        let ctx = ConnectionContext::new(1, sample_addr(), CipherSuite::AesGcm, Authority::Guest, 0);
        assert!(ctx.encryption_key().await.is_none());
        ctx.set_encryption_key([7u8; 32]).await;
        assert_eq!(ctx.encryption_key().await, Some([7u8; 32]));
    }

    #[tokio::test]
    async fn outbound_seq_increments() {
        let ctx = ConnectionContext::new(1, sample_addr(), CipherSuite::AesGcm, Authority::Guest, 0);
        assert_eq!(ctx.next_outbound_seq(), 0);
        assert_eq!(ctx.next_outbound_seq(), 1);
        assert_eq!(ctx.next_outbound_seq(), 2);
    }

    #[tokio::test]
    async fn inbound_seq_rejects_replay() {
        let ctx = ConnectionContext::new(1, sample_addr(), CipherSuite::AesGcm, Authority::Guest, 0);
        ctx.accept_inbound_seq(5).await.unwrap();
        assert!(ctx.accept_inbound_seq(5).await.is_err());
        assert!(ctx.accept_inbound_seq(6).await.is_ok());
    }

    #[test]
    fn auth_failures_increment() {
        let ctx = ConnectionContext::new(1, sample_addr(), CipherSuite::AesGcm, Authority::Guest, 0);
        assert_eq!(ctx.record_auth_failure(), 1);
        assert_eq!(ctx.record_auth_failure(), 2);
        assert_eq!(ctx.auth_failures(), 2);
    }

    /// A forged envelope under a key the connection never holds must not
    /// consume its `seq` against the real guard — the legitimate sender's
    /// packet at that same `seq` must still decrypt afterwards.
    #[tokio::test]
    async fn forged_packet_does_not_poison_replay_guard() {
        use nalix_core::wire::{PacketBuilder, Protocol};

        let real_key = [0x11u8; 32];
        let attacker_key = [0xEEu8; 32];
        let ctx = ConnectionContext::new(1, sample_addr(), CipherSuite::AesGcm, Authority::Guest, 0);

        let plain = PacketBuilder::new(1, Protocol::Tcp)
            .payload(b"legit".to_vec())
            .build()
            .unwrap();

        let forged = nalix_core::transformer::encrypt(&plain, &attacker_key, CipherSuite::AesGcm, 5).unwrap();
        let result = ctx.decrypt_inbound(&forged, &real_key, CipherSuite::AesGcm).await;
        assert!(result.is_err());

        let genuine = nalix_core::transformer::encrypt(&plain, &real_key, CipherSuite::AesGcm, 5).unwrap();
        let decrypted = ctx.decrypt_inbound(&genuine, &real_key, CipherSuite::AesGcm).await.unwrap();
        assert_eq!(decrypted.payload, b"legit");
    }
}
