//! Middleware pipeline.
//!
//! Rather than continuation-passing style (`invoke(context, next)`),
//! each stage here returns an [`Outcome`] — `Continue` to fall through
//! to the next stage (or the terminal handler call), `Respond` to
//! short-circuit with a packet already in hand. Every built-in stage
//! (`Unwrap`, `PolicyGate`, `ReturnHandle`, `Wrap`) is expressible this
//! way because none of them need to run code *after* a downstream stage
//! returns — composing them as a flat ordered list avoids threading an
//! explicit `next` closure through purely sequential stages with no
//! such need.
//!
//! Stages are async (boxed futures, the same pattern `handler.rs` uses
//! for handler invocations) rather than synchronous: `UnwrapStage` and
//! `WrapStage` both need the connection's encryption key, which is
//! guarded by a `tokio::sync::Mutex` shared with the async handshake
//! path, so they await the lock rather than blocking the worker thread.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use nalix_core::transformer;
use nalix_core::wire::error_packet;
use nalix_core::{NalixError, Packet};

use crate::connection::ConnectionContext;
use crate::handler::HandlerDescriptor;
use crate::rate_limit::RateLimiter;

/// Outcome of one pipeline stage.
pub enum Outcome {
    /// Fall through to the next stage (or the terminal handler call).
    Continue,
    /// Stop the chain and send this packet as the response.
    Respond(Packet),
}

/// Mutable state threaded through the pipeline for one packet.
pub struct PacketContext {
    pub packet: Packet,
    pub connection: Arc<ConnectionContext>,
    pub descriptor: HandlerDescriptor,
    /// Whether the packet arrived with the `Encrypted` flag set, captured
    /// before `UnwrapStage` runs. `PolicyGateStage`'s encryption-required
    /// gate must consult this rather than `packet.flags.is_encrypted()` —
    /// by the time the policy stage runs, `UnwrapStage` has already
    /// decrypted the packet and cleared that flag, so checking the live
    /// flag would reject every encrypted request a handler requires.
    pub arrived_encrypted: bool,
    /// Free-form metadata stages can leave for later stages or for
    /// logging — a string map, since nothing in this runtime needs a
    /// richer value type there.
    pub properties: HashMap<String, String>,
}

/// Shared collaborators stages need but that don't belong on
/// [`PacketContext`] itself (they're pipeline-wide, not per-packet).
pub struct StageDeps {
    pub rate_limiter: RateLimiter,
}

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<Outcome, NalixError>> + Send + 'a>>;

/// One pipeline stage. `order` determines position within its phase
/// (ascending); built-ins use fixed orders so custom stages can be
/// inserted before/after by choosing a smaller or larger order.
pub trait Stage: Send + Sync {
    fn order(&self) -> u32;
    fn invoke<'a>(&'a self, ctx: &'a mut PacketContext, deps: &'a StageDeps) -> StageFuture<'a>;
}

/// An ordered pre/post pipeline.
#[derive(Default)]
pub struct Pipeline {
    pre: Vec<Arc<dyn Stage>>,
    post: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// A pipeline with the four required built-ins installed at their
    /// spec-assigned orders.
    pub fn with_defaults() -> Self {
        let mut pipeline = Self::default();
        pipeline.use_pre(Arc::new(UnwrapStage));
        pipeline.use_pre(Arc::new(PolicyGateStage));
        pipeline.use_post(Arc::new(ReturnHandleStage));
        pipeline.use_post(Arc::new(WrapStage));
        pipeline
    }

    pub fn use_pre(&mut self, stage: Arc<dyn Stage>) {
        self.pre.push(stage);
        self.pre.sort_by_key(|s| s.order());
    }

    pub fn use_post(&mut self, stage: Arc<dyn Stage>) {
        self.post.push(stage);
        self.post.sort_by_key(|s| s.order());
    }

    /// Run every pre-stage in order. Returns `Some(packet)` if a stage
    /// short-circuited with a response — callers should send it and skip
    /// both the handler and the post chain.
    pub async fn run_pre(
        &self,
        ctx: &mut PacketContext,
        deps: &StageDeps,
    ) -> Result<Option<Packet>, NalixError> {
        for stage in &self.pre {
            if let Outcome::Respond(packet) = stage.invoke(ctx, deps).await? {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    /// Run every post-stage in order.
    pub async fn run_post(
        &self,
        ctx: &mut PacketContext,
        deps: &StageDeps,
    ) -> Result<Option<Packet>, NalixError> {
        for stage in &self.post {
            if let Outcome::Respond(packet) = stage.invoke(ctx, deps).await? {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }
}

/// Pre, order 3: decrypt if `Encrypted`, then decompress if `Compressed`.
pub struct UnwrapStage;

impl Stage for UnwrapStage {
    fn order(&self) -> u32 {
        3
    }

    fn invoke<'a>(&'a self, ctx: &'a mut PacketContext, _deps: &'a StageDeps) -> StageFuture<'a> {
        Box::pin(async move {
            if ctx.packet.flags.is_encrypted() {
                let key = match ctx.connection.encryption_key().await {
                    Some(key) => key,
                    None => return Ok(Outcome::Respond(error_response(NalixError::InvalidKey))),
                };
                let suite = ctx.connection.encryption_suite;

                // Checks and advances the connection's real replay guard
                // atomically with decryption — the guard only advances
                // once the AEAD tag verifies, so a forged envelope with a
                // fresh `seq` can never poison replay tracking for the
                // legitimate sender (see `ConnectionContext::decrypt_inbound`).
                match ctx.connection.decrypt_inbound(&ctx.packet, &key, suite).await {
                    Ok(decrypted) => ctx.packet = decrypted,
                    Err(e) => {
                        if e.is_auth_failure() {
                            ctx.connection.record_auth_failure();
                        }
                        return Ok(Outcome::Respond(error_response(e)));
                    }
                }
            }

            if ctx.packet.flags.is_compressed() {
                match transformer::decompress(&ctx.packet) {
                    Ok(decompressed) => ctx.packet = decompressed,
                    Err(e) => return Ok(Outcome::Respond(error_response(e))),
                }
            }

            Ok(Outcome::Continue)
        })
    }
}

/// Pre, order 5: the policy gates.
pub struct PolicyGateStage;

impl Stage for PolicyGateStage {
    fn order(&self) -> u32 {
        5
    }

    fn invoke<'a>(&'a self, ctx: &'a mut PacketContext, deps: &'a StageDeps) -> StageFuture<'a> {
        Box::pin(async move {
            match crate::policy::evaluate(
                &ctx.descriptor,
                ctx.arrived_encrypted,
                &ctx.connection,
                &deps.rate_limiter,
            ) {
                Ok(()) => Ok(Outcome::Continue),
                Err(e) => Ok(Outcome::Respond(error_response(e))),
            }
        })
    }
}

/// Post, order 1: converts the handler's return value into a packet.
///
/// The dispatcher calls `response::to_response_frame` directly once the
/// handler resolves, before running the post chain at all, so this stage
/// has nothing left to convert by the time it runs — it exists so both
/// post stages are present and orderable, and so a caller inserting a
/// custom post-stage at order 0 or order 1.5 gets the ordering they'd
/// expect relative to it.
pub struct ReturnHandleStage;

impl Stage for ReturnHandleStage {
    fn order(&self) -> u32 {
        1
    }

    fn invoke<'a>(&'a self, _ctx: &'a mut PacketContext, _deps: &'a StageDeps) -> StageFuture<'a> {
        Box::pin(async { Ok(Outcome::Continue) })
    }
}

/// Post, order 2: compress if the response is large enough to be a
/// candidate, then encrypt if the connection has a negotiated key.
pub struct WrapStage;

impl Stage for WrapStage {
    fn order(&self) -> u32 {
        2
    }

    fn invoke<'a>(&'a self, ctx: &'a mut PacketContext, _deps: &'a StageDeps) -> StageFuture<'a> {
        Box::pin(async move {
            if transformer::is_compression_candidate(&ctx.packet) {
                if let Ok(compressed) =
                    transformer::compress(&ctx.packet, transformer::CompressionAlgorithm::Lz4)
                {
                    ctx.packet = compressed;
                }
            }

            if let Some(key) = ctx.connection.encryption_key().await {
                let suite = ctx.connection.encryption_suite;
                let seq = ctx.connection.next_outbound_seq();
                if let Ok(encrypted) = transformer::encrypt(&ctx.packet, &key, suite, seq) {
                    ctx.packet = encrypted;
                }
            }

            Ok(Outcome::Continue)
        })
    }
}

fn error_response(err: NalixError) -> Packet {
    error_packet(err.code(), &err.to_string())
}
