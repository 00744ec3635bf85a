//! Packet source and ingress demultiplexer.
//!
//! Both run on a dedicated OS thread, never inside the async executor: the
//! capture driver's read loop blocks, and the demux's enqueue onto a full
//! reassembler channel is intentional backpressure (§5).

use std::sync::Arc;

use etherparse::{NetHeaders, PacketHeaders, PayloadSlice, TransportHeader};
use pcap::Capture;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use crate::config::CaptureConfig;
use crate::connection::Connection;
use crate::context::CaptureContext;
use crate::error::Result;
use crate::packet::{Packet, PacketPool};

const SNAPLEN: i32 = 65535;

/// Opens the named interface in promiscuous mode with blocking reads and
/// installs the literal `tcp port <P> and dst port <P>` BPF filter.
pub struct PacketSource {
    capture: Capture<pcap::Active>,
}

impl PacketSource {
    #[instrument(skip(config))]
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let mut capture = Capture::from_device(config.device.as_str())?
            .promisc(true)
            .snaplen(SNAPLEN)
            .open()?;
        capture.filter(&config.bpf_filter(), true)?;
        info!(device = %config.device, port = config.port, "capture device opened");
        Ok(Self { capture })
    }

    /// Blocks on the next captured frame, returning `None` once the
    /// interface's sequence ends (device down, handle closed).
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.capture.next_packet().ok().map(|p| p.data.to_vec())
    }
}

/// Extracts the IPv4+TCP payload from a captured frame, or `None` if either
/// layer is absent or the TCP payload is empty.
fn extract(frame: &[u8]) -> Option<(u32, String, &[u8])> {
    let parsed = PacketHeaders::from_ethernet_slice(frame).ok()?;
    let source = match parsed.net? {
        NetHeaders::Ipv4(header, _) => header.source,
        NetHeaders::Ipv6(_, _) => return None,
    };
    let tcp = match parsed.transport? {
        TransportHeader::Tcp(tcp) => tcp,
        _ => return None,
    };
    let payload = match parsed.payload {
        PayloadSlice::Tcp(bytes) => bytes,
        _ => return None,
    };
    if payload.is_empty() {
        return None;
    }
    let from = format!(
        "{}.{}.{}.{}:{}",
        source[0], source[1], source[2], source[3], tcp.source_port
    );
    Some((tcp.sequence_number, from, payload))
}

/// Runs the packet source's blocking read loop and the demultiplexer
/// inline, on whatever (non-async) thread calls this function. Spawns one
/// `Connection` task per newly-observed source endpoint via `runtime`.
pub fn run(mut source: PacketSource, context: Arc<CaptureContext>, runtime: Handle) {
    let pool = Arc::clone(&crate::packet::GLOBAL_PACKET_POOL);
    while let Some(frame) = source.next_frame() {
        let Some((seq, from, payload)) = extract(&frame) else {
            continue;
        };
        context.start_stats();
        route(&pool, &context, &runtime, seq, from, payload);
    }
}

fn route(
    pool: &Arc<PacketPool>,
    context: &Arc<CaptureContext>,
    runtime: &Handle,
    seq: u32,
    from: String,
    payload: &[u8],
) {
    let shard_table = &context.shards;
    let shard = shard_table.route(&from);
    let shard_index = shard.index;

    let (sender, _created) = shard.get_or_insert_with(&from, || {
        let (tx, rx) = tokio::sync::mpsc::channel(crate::shard::INBOUND_CHANNEL_CAPACITY);
        let id = context.next_conn_id();
        let connection = Connection::new(id, shard_index, from.clone(), Arc::clone(context));
        context.stats.current_connections.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(conn = id, from = %from, "new connection observed");
        runtime.spawn(connection.run(rx));
        tx
    });

    let pooled = pool.acquire(seq, from, payload);
    let packet: Packet = pooled.into_inner();
    // blocking_send applies backpressure to this thread, per §5.
    if sender.blocking_send(packet).is_err() {
        debug!("connection channel closed before packet could be routed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_rejects_frame_without_ethernet_headers() {
        assert!(extract(&[0u8; 4]).is_none());
    }
}
