//! Process-wide pool of chunk buffers.
//!
//! Every producer iteration borrows one buffer and every worker returns it
//! on exit, whatever path it takes; an acquire without a matching release is
//! a leak.

use bytes::BytesMut;
use parking_lot::Mutex;

// Buffers kept around after release; the rest are dropped.
const MAX_POOLED: usize = 16;

static POOL: Mutex<Vec<BytesMut>> = Mutex::new(Vec::new());

/// Takes a cleared buffer with room for at least `capacity` bytes.
pub(crate) fn acquire(capacity: usize) -> BytesMut {
    let mut buffer = POOL.lock().pop().unwrap_or_default();
    buffer.clear();
    buffer.reserve(capacity);
    buffer
}

/// Returns a buffer to the pool.
pub(crate) fn release(buffer: BytesMut) {
    let mut pool = POOL.lock();
    if pool.len() < MAX_POOLED {
        pool.push(buffer);
    }
}
