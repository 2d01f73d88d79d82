//! # Message Buffer Pool
//!
//! Byte-accounted pool of refcounted message buffers. A transmit copies the
//! caller's packet into one [`Buffer`]; every destination pipe holds a clone
//! of the same underlying storage, and the bytes return to the pool budget
//! when the last clone drops. The gauges feed the statistics telemetry.

use bytes::{Bytes, BytesMut};
use softbus_msg::{ccsds, MsgId, Status};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ─── Pool ────────────────────────────────────────────────────────────────────

struct PoolState {
    capacity: usize,
    mem_in_use: AtomicUsize,
    peak_mem_in_use: AtomicUsize,
    bufs_in_use: AtomicUsize,
    peak_bufs_in_use: AtomicUsize,
}

/// Byte-budgeted allocator for in-flight message buffers.
#[derive(Clone)]
pub struct BufferPool {
    state: Arc<PoolState>,
}

impl BufferPool {
    pub(crate) fn new(capacity: usize) -> Self {
        BufferPool {
            state: Arc::new(PoolState {
                capacity,
                mem_in_use: AtomicUsize::new(0),
                peak_mem_in_use: AtomicUsize::new(0),
                bufs_in_use: AtomicUsize::new(0),
                peak_bufs_in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Copy `data` into a fresh pool buffer. Fails when the byte budget is
    /// exhausted.
    pub fn allocate(&self, data: &[u8]) -> Result<BufferMut, Status> {
        let size = data.len();
        let prev = self.state.mem_in_use.fetch_add(size, Ordering::SeqCst);
        if prev + size > self.state.capacity {
            self.state.mem_in_use.fetch_sub(size, Ordering::SeqCst);
            return Err(Status::BufAllocErr);
        }
        self.state
            .peak_mem_in_use
            .fetch_max(prev + size, Ordering::SeqCst);
        let bufs = self.state.bufs_in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_bufs_in_use.fetch_max(bufs, Ordering::SeqCst);

        Ok(BufferMut {
            data: BytesMut::from(data),
            guard: Arc::new(AllocGuard {
                size,
                state: self.state.clone(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    pub fn mem_in_use(&self) -> usize {
        self.state.mem_in_use.load(Ordering::SeqCst)
    }

    pub fn peak_mem_in_use(&self) -> usize {
        self.state.peak_mem_in_use.load(Ordering::SeqCst)
    }

    pub fn bufs_in_use(&self) -> usize {
        self.state.bufs_in_use.load(Ordering::SeqCst)
    }

    pub fn peak_bufs_in_use(&self) -> usize {
        self.state.peak_bufs_in_use.load(Ordering::SeqCst)
    }
}

// ─── Accounting Guard ────────────────────────────────────────────────────────

struct AllocGuard {
    size: usize,
    state: Arc<PoolState>,
}

impl Drop for AllocGuard {
    fn drop(&mut self) {
        self.state.mem_in_use.fetch_sub(self.size, Ordering::SeqCst);
        self.state.bufs_in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

// ─── Buffers ─────────────────────────────────────────────────────────────────

/// A pool buffer still under construction; the transmit path stamps the
/// sequence count here before freezing.
pub struct BufferMut {
    data: BytesMut,
    guard: Arc<AllocGuard>,
}

impl BufferMut {
    /// Freeze into a shareable [`Buffer`].
    pub fn freeze(self) -> Buffer {
        Buffer {
            data: self.data.freeze(),
            guard: self.guard,
        }
    }
}

impl Deref for BufferMut {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for BufferMut {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A refcounted, pool-accounted message buffer. Cloning shares storage; the
/// pool bytes are released when the last clone drops.
#[derive(Clone)]
pub struct Buffer {
    data: Bytes,
    guard: Arc<AllocGuard>,
}

impl Buffer {
    /// The message id stamped in the packet header.
    pub fn msg_id(&self) -> Result<MsgId, Status> {
        ccsds::msg_id(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

impl Deref for Buffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buffer(len={})", self.data.len())
    }
}
