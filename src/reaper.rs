//! Connection reaper: the single consumer of connection-close signals.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::shard::ShardTable;
use crate::stats::Stats;

/// Sent by a reassembler once it observes COM_QUIT.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    pub shard_index: usize,
    pub from: String,
}

pub const CLOSE_CHANNEL_CAPACITY: usize = 1024;

/// Spawns the reaper task and returns the sender every reassembler is given
/// a clone of. The reaper holds only the shard table and stats — not the
/// reassemblers themselves, so the shard map is the reassembler's sole
/// owner and reaping is what frees it.
pub fn spawn(shards: Arc<ShardTable>, stats: Arc<Stats>) -> mpsc::Sender<CloseSignal> {
    let (tx, mut rx) = mpsc::channel(CLOSE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            shards.shard_at(signal.shard_index).remove(&signal.from);
            stats.closed_connections.fetch_add(1, Ordering::Relaxed);
            stats.current_connections.fetch_sub(1, Ordering::Relaxed);
            info!(from = %signal.from, "connection closed");
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reaping_removes_shard_entry_and_updates_stats() {
        let shards = Arc::new(ShardTable::new(1));
        let stats = Arc::new(Stats::new());
        stats.current_connections.fetch_add(1, Ordering::Relaxed);
        let (sender, _created) = shards
            .shard_at(0)
            .get_or_insert_with("1.2.3.4:1", || mpsc::channel(1).0);
        drop(sender);

        let close_tx = spawn(Arc::clone(&shards), Arc::clone(&stats));
        close_tx
            .send(CloseSignal {
                shard_index: 0,
                from: "1.2.3.4:1".to_string(),
            })
            .await
            .unwrap();

        // give the reaper task a chance to run
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(shards.shard_at(0).len(), 0);
        assert_eq!(stats.closed_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.current_connections.load(Ordering::Relaxed), 0);
    }
}
