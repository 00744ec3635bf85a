//! A captured TCP segment destined for one reassembler, and the pool that
//! recycles its payload buffer across frames.

use std::mem::ManuallyDrop;
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

const POOL_CAPACITY: usize = 4096;

/// One captured TCP segment, keyed by the 5-tuple's source endpoint.
#[derive(Debug)]
pub struct Packet {
    /// TCP sequence number of the first payload byte.
    pub seq: u32,
    /// `"<src_ip>:<src_port>"`, opaque beyond its use as a shard key and record field.
    pub from: String,
    pub payload: Vec<u8>,
}

pub static GLOBAL_PACKET_POOL: LazyLock<Arc<PacketPool>> =
    LazyLock::new(|| Arc::new(PacketPool::new(POOL_CAPACITY)));

/// Recycles `Packet` payload buffers to avoid a per-frame allocation at
/// packet rates, mirroring the teacher crate's `BufferPool` for `BufferSet`.
#[derive(Debug)]
pub struct PacketPool {
    payloads: ArrayQueue<Vec<u8>>,
}

impl PacketPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            payloads: ArrayQueue::new(capacity),
        }
    }

    /// Acquires a packet carrying `payload`, reusing a pooled buffer's
    /// capacity when one is available.
    pub fn acquire(self: &Arc<Self>, seq: u32, from: String, payload: &[u8]) -> PooledPacket {
        let mut buf = self.payloads.pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(payload);
        PooledPacket {
            pool: Arc::clone(self),
            inner: ManuallyDrop::new(Packet {
                seq,
                from,
                payload: buf,
            }),
        }
    }

    fn release(&self, mut payload: Vec<u8>) {
        payload.clear();
        let _ = self.payloads.push(payload);
    }
}

/// A pooled `Packet` whose payload buffer returns to the pool on drop.
/// Ownership of the `Packet` value transfers to whoever the packet is
/// enqueued with; the pool only reclaims the underlying allocation.
pub struct PooledPacket {
    pool: Arc<PacketPool>,
    inner: ManuallyDrop<Packet>,
}

impl std::ops::Deref for PooledPacket {
    type Target = Packet;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for PooledPacket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl PooledPacket {
    /// Takes ownership of the `Packet`, returning its buffer's capacity to
    /// the pool once the caller is done with it.
    pub fn into_inner(mut self) -> Packet {
        // SAFETY: `inner` is never accessed again; `self` is immediately forgotten.
        let packet = unsafe { ManuallyDrop::take(&mut self.inner) };
        let pool = Arc::clone(&self.pool);
        std::mem::forget(self);
        // The buffer itself moves with `packet`; nothing to release here.
        let _ = pool;
        packet
    }
}

impl Drop for PooledPacket {
    fn drop(&mut self) {
        // SAFETY: inner is never accessed after this.
        let packet = unsafe { ManuallyDrop::take(&mut self.inner) };
        self.pool.release(packet.payload);
    }
}
