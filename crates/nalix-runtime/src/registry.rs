//! Opcode → handler registry and the controller registration contract.
//!
//! A "controller registers its own opcodes" model: handlers are
//! per-opcode closures rather than one trait object per service, so a
//! controller can own a handful of related opcodes under one type.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::FatalError;
use crate::handler::HandlerDescriptor;

/// A group of related handlers that registers itself against the
/// runtime's opcode table at startup.
pub trait PacketController: Send + Sync {
    /// Register every opcode this controller owns.
    fn register(self: Arc<Self>, registry: &HandlerRegistry);
}

/// The opcode → handler table, shared across all connection tasks.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<u16, HandlerDescriptor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor` against its opcode.
    ///
    /// Panics if the opcode is already registered — fails loudly at
    /// startup rather than silently keeping whichever handler registered
    /// first: a silently-dropped duplicate handler is a routing bug that
    /// should never reach production traffic.
    pub fn register(&self, descriptor: HandlerDescriptor) {
        let opcode = descriptor.opcode;
        if self.handlers.insert(opcode, descriptor).is_some() {
            panic!("{}", FatalError::DuplicateOpcode(opcode));
        }
    }

    pub fn get(&self, opcode: u16) -> Option<HandlerDescriptor> {
        self.handlers.get(&opcode).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, opcode: u16) -> bool {
        self.handlers.contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// All registered opcodes, for the introspection surface.
    pub fn opcodes(&self) -> Vec<u16> {
        self.handlers.iter().map(|entry| *entry.key()).collect()
    }

    /// Register every controller in `controllers`, in order.
    pub fn register_all(&self, controllers: Vec<Arc<dyn PacketController>>) {
        for controller in controllers {
            controller.register(self);
        }
    }
}
