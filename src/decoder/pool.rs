//! Frame buffer pools
//!
//! A decode session rents one buffer per produced frame. The default
//! [`RotatingPool`] keeps a small ring of allocations per calling thread and
//! hands them out round-robin, so steady-state decoding does not touch the
//! allocator. A slot is only written in place when nobody else holds its
//! buffer any more; a frame the caller kept alive is left untouched and the
//! slot gets a fresh allocation instead.
//!
//! Rings belonging to threads that have exited are dropped the next time a
//! new thread starts renting, or when [`RotatingPool::thread_count`] runs.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use tracing::trace;

use crate::error::{DecoderError, Result};
use crate::frame::FrameBuffer;

/// Default number of buffers in a thread's rotation
pub const DEFAULT_POOL_SLOTS: usize = 6;

/// Writer invoked on the rented bytes before the buffer is shared
pub type FillFn<'a> = dyn FnMut(&mut [u8]) -> Result<()> + 'a;

/// Source of byte buffers for decoded frames.
pub trait FramePool: Send + Sync {
    /// Rent a buffer of at least `min_len` bytes, let `fill` write into it,
    /// and hand it back as a shared buffer.
    fn rent(&self, min_len: usize, fill: &mut FillFn<'_>) -> Result<FrameBuffer>;

    /// Give a buffer back. Does nothing unless `clear` is set, in which case
    /// the bytes are zeroed when no other handle to them remains.
    fn release(&self, buffer: FrameBuffer, clear: bool);
}

thread_local! {
    /// Lives exactly as long as its thread
    static THREAD_ALIVE: Arc<()> = Arc::new(());
}

fn current_thread_marker() -> Weak<()> {
    // Unavailable while thread locals are torn down; the ring then counts as dead
    THREAD_ALIVE
        .try_with(Arc::downgrade)
        .unwrap_or_else(|_| Weak::new())
}

/// Per-thread ring of reusable buffers
struct Ring {
    slots: Vec<Option<FrameBuffer>>,
    next: usize,
    rents: u64,
    owner: Weak<()>,
}

impl Ring {
    fn with_capacity(slots: usize) -> Self {
        Self {
            slots: vec![None; slots],
            next: 0,
            rents: 0,
            owner: current_thread_marker(),
        }
    }

    fn owner_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

fn prune_exited(rings: &mut HashMap<ThreadId, Ring>) {
    let before = rings.len();
    rings.retain(|_, ring| ring.owner_alive());
    if rings.len() < before {
        trace!(dropped = before - rings.len(), "Dropped rings of exited threads");
    }
}

/// Thread-keyed rotation of `slots` growable buffers.
pub struct RotatingPool {
    slots: usize,
    rings: Mutex<HashMap<ThreadId, Ring>>,
}

impl RotatingPool {
    /// Create a pool rotating through `slots` buffers per thread.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is zero.
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "slots must be > 0");
        Self {
            slots,
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Number of buffers in each thread's rotation
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Number of live threads holding a ring in this pool
    pub fn thread_count(&self) -> usize {
        let mut rings = self.rings.lock();
        prune_exited(&mut rings);
        rings.len()
    }

    /// Drop the calling thread's ring and its buffers
    pub fn forget_current_thread(&self) {
        self.rings.lock().remove(&thread::current().id());
    }
}

impl Default for RotatingPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SLOTS)
    }
}

impl FramePool for RotatingPool {
    fn rent(&self, min_len: usize, fill: &mut FillFn<'_>) -> Result<FrameBuffer> {
        let thread = thread::current().id();

        // The lock is not held while `fill` runs; other threads only touch their own ring
        let (index, mut buffer) = {
            let mut rings = self.rings.lock();
            if !rings.contains_key(&thread) {
                prune_exited(&mut rings);
            }
            let ring = rings
                .entry(thread)
                .or_insert_with(|| Ring::with_capacity(self.slots));

            let index = ring.next;
            ring.next = (index + 1) % self.slots;
            ring.rents += 1;

            let buffer = match ring.slots[index].take() {
                // Only this slot still references it: reuse in place
                Some(existing) if Arc::strong_count(&existing) == 1 => existing,
                Some(_) => {
                    trace!(slot = index, "Pool slot still held by a frame, allocating");
                    Arc::new(Vec::new())
                }
                None => Arc::new(Vec::new()),
            };
            (index, buffer)
        };

        {
            let Some(bytes) = Arc::get_mut(&mut buffer) else {
                return Err(DecoderError::ResourceAllocation("a frame buffer"));
            };
            if bytes.len() < min_len {
                trace!(slot = index, from = bytes.len(), to = min_len, "Growing pool slot");
                bytes.resize(min_len, 0);
            }
            fill(&mut bytes[..])?;
        }

        if let Some(ring) = self.rings.lock().get_mut(&thread) {
            ring.slots[index] = Some(Arc::clone(&buffer));
        }
        Ok(buffer)
    }

    fn release(&self, buffer: FrameBuffer, clear: bool) {
        if !clear {
            return;
        }
        let mut rings = self.rings.lock();
        let Some(ring) = rings.get_mut(&thread::current().id()) else {
            return;
        };
        let owner = ring
            .slots
            .iter_mut()
            .flatten()
            .find(|slot| Arc::ptr_eq(slot, &buffer));
        drop(buffer);
        if let Some(slot) = owner {
            if let Some(bytes) = Arc::get_mut(slot) {
                bytes.fill(0);
            }
        }
    }
}

impl std::fmt::Debug for RotatingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rings = self.rings.lock();
        f.debug_struct("RotatingPool")
            .field("slots", &self.slots)
            .field("threads", &rings.len())
            .field("rents", &rings.values().map(|r| r.rents).sum::<u64>())
            .finish()
    }
}

/// Pool that allocates a new buffer for every frame.
///
/// Useful when frames are retained for a long time and a rotating slot
/// would only ever be replaced anyway.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocatingPool;

impl FramePool for AllocatingPool {
    fn rent(&self, min_len: usize, fill: &mut FillFn<'_>) -> Result<FrameBuffer> {
        let mut bytes = vec![0u8; min_len];
        fill(&mut bytes)?;
        Ok(Arc::new(bytes))
    }

    fn release(&self, _buffer: FrameBuffer, _clear: bool) {}
}

/// Thread-safe handle to a frame pool
pub type SharedFramePool = Arc<dyn FramePool>;
