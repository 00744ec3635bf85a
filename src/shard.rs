//! Shard routing: one worker per shard, each owning a map from source
//! endpoint to that connection's inbound packet sender.

use std::sync::Mutex;

use fnv::FnvHashMap;
use tokio::sync::mpsc;

use crate::packet::Packet;

/// Bounded capacity of a reassembler's inbound queue (§5: overflow
/// intentionally blocks the demux thread as backpressure).
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// FNV-1a over 32 bits, the literal algorithm the routing hash is specified
/// against (distinct from the `fnv` crate's 64-bit `FnvHasher`, used below
/// for the per-shard endpoint map instead).
pub fn fnv1a_32(data: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    data.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(PRIME)
    })
}

/// One routing partition, owning the endpoints assigned to it.
pub struct Shard {
    pub index: usize,
    connections: Mutex<FnvHashMap<String, mpsc::Sender<Packet>>>,
}

impl Shard {
    fn new(index: usize) -> Self {
        Self {
            index,
            connections: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Returns the existing sender for `from`, or inserts `make_sender()`'s
    /// result if this is the first packet seen for that endpoint. `make_sender`
    /// is only invoked when an entry does not already exist.
    pub fn get_or_insert_with(
        &self,
        from: &str,
        make_sender: impl FnOnce() -> mpsc::Sender<Packet>,
    ) -> (mpsc::Sender<Packet>, bool) {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = connections.get(from) {
            (sender.clone(), false)
        } else {
            let sender = make_sender();
            connections.insert(from.to_string(), sender.clone());
            (sender, true)
        }
    }

    /// Removes `from`'s entry, called by the reaper once a reassembler's
    /// COM_QUIT signal has been processed.
    pub fn remove(&self, from: &str) {
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(from);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

/// The fixed set of shards sized at startup.
pub struct ShardTable {
    shards: Vec<Shard>,
}

impl ShardTable {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(Shard::new).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// The shard `from` routes to, per `fnv1a_32(from) mod shard_count`.
    pub fn route(&self, from: &str) -> &Shard {
        let index = (fnv1a_32(from) as usize) % self.shards.len();
        &self.shards[index]
    }

    pub fn shard_at(&self, index: usize) -> &Shard {
        &self.shards[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_32_matches_known_vector() {
        // "" hashes to the offset basis; a well-known property of FNV-1a.
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
    }

    #[test]
    fn routing_is_deterministic() {
        let table = ShardTable::new(4);
        let a = table.route("10.0.0.1:5000").index;
        let b = table.route("10.0.0.1:5000").index;
        assert_eq!(a, b);
    }

    #[test]
    fn get_or_insert_with_only_builds_sender_once() {
        let shard = Shard::new(0);
        let mut builds = 0;
        let (_tx1, created1) = shard.get_or_insert_with("1.2.3.4:1", || {
            builds += 1;
            mpsc::channel(INBOUND_CHANNEL_CAPACITY).0
        });
        let (_tx2, created2) = shard.get_or_insert_with("1.2.3.4:1", || {
            builds += 1;
            mpsc::channel(INBOUND_CHANNEL_CAPACITY).0
        });
        assert!(created1);
        assert!(!created2);
        assert_eq!(builds, 1);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn remove_drops_entry() {
        let shard = Shard::new(0);
        shard.get_or_insert_with("x", || mpsc::channel(INBOUND_CHANNEL_CAPACITY).0);
        assert_eq!(shard.len(), 1);
        shard.remove("x");
        assert_eq!(shard.len(), 0);
    }
}
