//! Pooled byte buffers for packet I/O.
//!
//! A [`BufferPool`] hands out [`BufferLease`]s backed by a fixed-capacity
//! free list (`crossbeam_queue::ArrayQueue`, the same lock-free-queue
//! idiom the runtime already reaches for elsewhere). A lease is reference
//! counted: cloning it bumps the count, dropping the last clone returns
//! the underlying buffer to the pool. There is no unsafe code here — the
//! slot is an `Arc<Mutex<BufferSlot>>`, matching how the session table
//! guards its per-connection crypto state.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::ArrayQueue;

use crate::error::NalixError;

/// The pooled allocation backing a [`BufferLease`].
struct BufferSlot {
    data: Vec<u8>,
    /// Logical length a caller has written, distinct from `data.capacity()`.
    len: usize,
}

/// A reference-counted handle onto a pooled buffer.
///
/// Cloning a lease is cheap (`Arc` bump) and shares the same underlying
/// storage — callers that need an independent copy should read the bytes
/// out via [`BufferLease::as_slice`] rather than cloning the lease itself.
pub struct BufferLease {
    slot: Arc<Mutex<BufferSlot>>,
    refcount: Arc<AtomicUsize>,
    /// Set by [`BufferLease::try_detach`] — once true, the last clone to
    /// drop must not return the slot to the pool's free list, since the
    /// bytes have already been handed to a caller that outlives the pool's
    /// bookkeeping for this slot.
    detached: Arc<AtomicBool>,
    pool: Arc<BufferPoolInner>,
    capacity: usize,
}

impl BufferLease {
    /// Number of live clones of this lease, including this one.
    pub fn strong_count(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Share this lease with another owner, bumping the refcount. Returns
    /// a handle backed by the same pooled slot — equivalent to `clone()`,
    /// named for the `retain()` operation callers hand off across tasks
    /// before sharing a lease concurrently.
    pub fn retain(&self) -> Self {
        self.clone()
    }

    /// Drop this handle, decrementing the refcount. The last handle to
    /// release returns the slot to the pool (zeroed) unless the lease was
    /// detached first. Equivalent to `drop(lease)`; spelled out as its own
    /// method so call sites can name the operation the way they name
    /// `retain`.
    pub fn release(self) {
        drop(self)
    }

    /// Read-only view of the buffer's current logical contents.
    pub fn as_slice(&self) -> Vec<u8> {
        let slot = self.slot.lock().expect("buffer slot mutex poisoned");
        slot.data[..slot.len].to_vec()
    }

    /// Overwrite the buffer's contents and set its logical length.
    ///
    /// Fails with [`NalixError::DestinationTooSmall`] if `bytes` exceeds
    /// the lease's pooled capacity — callers needing more should detach
    /// first via [`BufferLease::try_detach`].
    pub fn write(&self, bytes: &[u8]) -> Result<(), NalixError> {
        if bytes.len() > self.capacity {
            return Err(NalixError::DestinationTooSmall {
                need: bytes.len(),
                have: self.capacity,
            });
        }
        let mut slot = self.slot.lock().expect("buffer slot mutex poisoned");
        slot.data[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len();
        Ok(())
    }

    /// Set the logical length without touching the bytes already present
    /// (e.g. after writing directly into a scratch area obtained some
    /// other way).
    pub fn set_length(&self, len: usize) -> Result<(), NalixError> {
        if len > self.capacity {
            return Err(NalixError::DestinationTooSmall {
                need: len,
                have: self.capacity,
            });
        }
        let mut slot = self.slot.lock().expect("buffer slot mutex poisoned");
        slot.len = len;
        Ok(())
    }

    /// Pull the bytes out as an owned, pool-independent `Vec<u8>`,
    /// marking the underlying slot detached so it never returns to the
    /// pool's free list — whichever clone (this one or another) ends up
    /// dropping last, the slot is abandoned rather than recycled. Use when
    /// a buffer needs to outlive the pool or cross a boundary the pool
    /// doesn't track (e.g. handed to a spawned task with its own
    /// lifetime).
    pub fn try_detach(self) -> Vec<u8> {
        self.detached.store(true, Ordering::Release);
        self.as_slice()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Clone for BufferLease {
    fn clone(&self) -> Self {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        Self {
            slot: Arc::clone(&self.slot),
            refcount: Arc::clone(&self.refcount),
            detached: Arc::clone(&self.detached),
            pool: Arc::clone(&self.pool),
            capacity: self.capacity,
        }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            if self.detached.load(Ordering::Acquire) {
                // Detached — the slot was handed out as an owned `Vec<u8>`
                // by `try_detach`; it must not re-enter circulation.
                return;
            }
            // Last clone gone — zero the slot (it may have carried key
            // material or plaintext) and return it to the free list. A
            // full free list just drops the slot instead of growing the
            // pool past its configured ceiling.
            {
                let mut slot = self.slot.lock().expect("buffer slot mutex poisoned");
                slot.data.iter_mut().for_each(|b| *b = 0);
                slot.len = 0;
            }
            let _ = self.pool.free.push(Arc::clone(&self.slot));
        }
    }
}

struct BufferPoolInner {
    free: ArrayQueue<Arc<Mutex<BufferSlot>>>,
    buffer_size: usize,
}

/// A bounded pool of fixed-size byte buffers.
///
/// Every lease handed out by one pool has the same capacity
/// (`buffer_size`) — the runtime sizes this to comfortably hold one
/// `MAX_PACKET_LEN` packet, so a single pool serves every connection.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

impl BufferPool {
    /// Create a pool holding up to `capacity` buffers of `buffer_size`
    /// bytes each. The pool starts empty and fills lazily as leases are
    /// released back into it — there's no value pre-allocating buffers
    /// that may never be needed under light load.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                free: ArrayQueue::new(capacity.max(1)),
                buffer_size,
            }),
        }
    }

    /// Acquire a lease, reusing a freed slot if one is available or
    /// allocating fresh otherwise. Never fails — there's no hard ceiling
    /// on allocation, only on how many idle buffers the pool retains.
    pub fn acquire(&self) -> BufferLease {
        let slot = self
            .inner
            .free
            .pop()
            .unwrap_or_else(|| Arc::new(Mutex::new(BufferSlot {
                data: vec![0u8; self.inner.buffer_size],
                len: 0,
            })));

        BufferLease {
            slot,
            refcount: Arc::new(AtomicUsize::new(1)),
            detached: Arc::new(AtomicBool::new(false)),
            pool: Arc::clone(&self.inner),
            capacity: self.inner.buffer_size,
        }
    }

    /// Number of idle buffers currently sitting in the free list.
    pub fn idle_count(&self) -> usize {
        self.inner.free.len()
    }
}
