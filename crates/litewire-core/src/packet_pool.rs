use std::sync::Mutex;

use tracing::trace;

use crate::constants::MAX_PACKET_SIZE;

/// A free list of packet buffers shared by the receive and logic contexts.
///
/// Buffers are zeroed when they come back, so a buffer handed out by [`PacketPool::acquire`]
/// never carries bytes of a previous packet. Buffers that grew beyond the largest packet
/// size are not kept.
#[derive(Debug)]
pub struct PacketPool {
    /// Pool of reusable buffers
    pool: Mutex<Vec<Vec<u8>>>,
    /// Maximum pool size
    max_pool_size: usize,
}

impl PacketPool {
    /// Creates a new pool keeping at most `max_pool_size` idle buffers.
    pub fn new(max_pool_size: usize) -> Self {
        Self { pool: Mutex::new(Vec::new()), max_pool_size }
    }

    /// Takes a buffer from the pool, or allocates one, at least `size` bytes long.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let pooled = self.pool.lock().ok().and_then(|mut pool| pool.pop());
        let mut buffer = pooled.unwrap_or_else(|| Vec::with_capacity(MAX_PACKET_SIZE));
        if buffer.len() < size {
            buffer.resize(size, 0);
        }
        buffer
    }

    /// Returns a buffer to the pool for reuse.
    pub fn release(&self, mut buffer: Vec<u8>) {
        if buffer.len() > MAX_PACKET_SIZE {
            trace!("Dropping oversized buffer of {} bytes", buffer.len());
            return;
        }
        buffer.fill(0);
        if let Ok(mut pool) = self.pool.lock() {
            if pool.len() < self.max_pool_size {
                pool.push(buffer);
            }
        }
    }

    /// Returns the number of buffers currently in the pool.
    pub fn available(&self) -> usize {
        self.pool.lock().map(|pool| pool.len()).unwrap_or(0)
    }

    /// Drops all pooled buffers.
    pub fn clear(&self) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.clear();
        }
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(1000)
    }
}
