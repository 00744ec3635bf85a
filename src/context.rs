//! The capture process's single constructed-once handle, replacing the
//! four process-globals (id counter, shard table, writer, stats) and the
//! one-shot stats-timer flag called out in the design notes.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::CaptureConfig;
use crate::error::Result;
use crate::reaper::{self, CloseSignal};
use crate::shard::ShardTable;
use crate::stats::Stats;
use crate::writer::RecordWriter;

pub struct CaptureContext {
    pub config: CaptureConfig,
    ids: AtomicU64,
    pub shards: Arc<ShardTable>,
    pub writer: Arc<RecordWriter>,
    pub stats: Arc<Stats>,
    pub close_tx: mpsc::Sender<CloseSignal>,
}

impl CaptureContext {
    /// Validates `config`, creates the log file under `log_dir`, spawns the
    /// reaper, and returns the shared, `Arc`-wrapped context every task clones.
    pub fn new(config: CaptureConfig, log_dir: &Path, start_timestamp: &str) -> Result<Arc<Self>> {
        config.validate()?;
        let shards = Arc::new(ShardTable::new(config.resolved_shard_count()));
        let writer = Arc::new(RecordWriter::create(log_dir, start_timestamp)?);
        let stats = Arc::new(Stats::new());
        let close_tx = reaper::spawn(Arc::clone(&shards), Arc::clone(&stats));

        Ok(Arc::new(Self {
            config,
            ids: AtomicU64::new(1),
            shards,
            writer,
            stats,
            close_tx,
        }))
    }

    /// Allocates the next monotonically-increasing `conn` id.
    pub fn next_conn_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Starts the statistics sampler; a no-op on any call after the first.
    pub fn start_stats(&self) {
        self.stats.start_sampler();
    }
}
