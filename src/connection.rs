//! The per-connection reassembler: TCP sequencing, MySQL framing, command
//! dispatch and record emission.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::constant::{CommandByte, Dispatch};
use crate::context::CaptureContext;
use crate::framing;
use crate::packet::Packet;
use crate::query::{self, QueryRecord};
use crate::reaper::CloseSignal;

const OUTBOUND_CHANNEL_CAPACITY: usize = 128;

fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

enum Dispatched {
    None,
    Record(QueryRecord),
    Quit,
}

/// One reassembler per distinct source endpoint ever observed.
pub struct Connection {
    id: u64,
    shard_index: usize,
    from: String,
    next_seq: u32,
    buffer: BytesMut,
    last_packet_timestamp: String,
    context: Arc<CaptureContext>,
}

impl Connection {
    pub fn new(id: u64, shard_index: usize, from: String, context: Arc<CaptureContext>) -> Self {
        Self {
            id,
            shard_index,
            from,
            next_seq: 0,
            buffer: BytesMut::new(),
            last_packet_timestamp: now_timestamp(),
            context,
        }
    }

    /// Updates `next_seq`/`buffer` per the TCP sequencing rules (§4.3).
    fn accept(&mut self, packet: &Packet) {
        if self.next_seq == 0 {
            self.buffer.clear();
            self.buffer.extend_from_slice(&packet.payload);
            self.next_seq = packet.seq.wrapping_add(packet.payload.len() as u32);
        } else if packet.seq == self.next_seq {
            self.buffer.extend_from_slice(&packet.payload);
            self.next_seq = self.next_seq.wrapping_add(packet.payload.len() as u32);
        } else if packet.seq > self.next_seq {
            self.context.stats.lost_packets.fetch_add(1, Ordering::Relaxed);
            self.buffer.clear();
            self.buffer.extend_from_slice(&packet.payload);
            self.next_seq = packet.seq.wrapping_add(packet.payload.len() as u32);
        } else {
            self.context.stats.out_of_order.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Interprets one fully-framed MySQL packet body.
    fn dispatch(&mut self, body: Bytes) -> Dispatched {
        let Some(&command) = body.first() else {
            return Dispatched::None;
        };
        match CommandByte::from_u8(command) {
            Dispatch::Known(CommandByte::Quit) => Dispatched::Quit,
            Dispatch::Known(CommandByte::Query) => self.dispatch_query(&body[1..]),
            Dispatch::Known(_) | Dispatch::Ignored => Dispatched::None,
            Dispatch::Unknown(byte) => {
                self.context.stats.unknown_commands.fetch_add(1, Ordering::Relaxed);
                debug!(byte, from = %self.from, "unknown command byte");
                Dispatched::None
            }
        }
    }

    fn dispatch_query(&mut self, raw_body: &[u8]) -> Dispatched {
        self.last_packet_timestamp = now_timestamp();
        let raw = match std::str::from_utf8(raw_body) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, from = %self.from, "COM_QUERY body is not valid UTF-8");
                self.context.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                return Dispatched::None;
            }
        };
        let cleaned = query::clean(raw);
        if cleaned.trim().is_empty() {
            return Dispatched::None;
        }
        let digest = query::digest(&cleaned);
        match query::parse_and_classify(&cleaned) {
            Some((text, kind)) => Dispatched::Record(QueryRecord {
                timestamp: self.last_packet_timestamp.clone(),
                conn: self.id,
                kind,
                digest,
                text,
            }),
            None => {
                self.context.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                Dispatched::None
            }
        }
    }

    /// Drives the reassembler: selects between inbound packets and its own
    /// outbound record channel so record emission never blocks packet
    /// ingress. Exits once the inbound channel closes (the shard map no
    /// longer references it, so no further packets can be routed in).
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Packet>) {
        let (record_tx, mut record_rx) = mpsc::channel::<QueryRecord>(OUTBOUND_CHANNEL_CAPACITY);
        loop {
            tokio::select! {
                maybe_packet = inbound.recv() => {
                    let Some(packet) = maybe_packet else { break };
                    self.accept(&packet);
                    let mut bodies = Vec::new();
                    framing::drain_packets(&mut self.buffer, |b| bodies.push(b.freeze()));
                    for body in bodies {
                        match self.dispatch(body) {
                            Dispatched::Record(record) => {
                                if record_tx.send(record).await.is_err() {
                                    break;
                                }
                            }
                            Dispatched::Quit => {
                                let _ = self.context.close_tx.send(CloseSignal {
                                    shard_index: self.shard_index,
                                    from: self.from.clone(),
                                }).await;
                            }
                            Dispatched::None => {}
                        }
                    }
                }
                Some(record) = record_rx.recv() => {
                    self.emit(&record);
                }
            }
        }
        drop(record_tx);
        while let Some(record) = record_rx.recv().await {
            self.emit(&record);
        }
    }

    fn emit(&self, record: &QueryRecord) {
        match self.context.writer.write(record) {
            Ok(()) => {
                self.context.stats.queries.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!(error = %err, conn = self.id, "failed to write query record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::query::QueryKind;
    use pretty_assertions::assert_eq;

    fn test_context() -> Arc<CaptureContext> {
        let dir = std::env::temp_dir().join(format!(
            "mysql-capture-connection-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        CaptureContext::new(CaptureConfig::default(), &dir, "test").unwrap()
    }

    fn packet(seq: u32, payload: &[u8]) -> Packet {
        Packet {
            seq,
            from: "127.0.0.1:5000".to_string(),
            payload: payload.to_vec(),
        }
    }

    async fn drive(conn: &mut Connection, inbound: &mut mpsc::Receiver<Packet>, tx: &mpsc::Sender<Packet>, packets: Vec<Packet>) -> Vec<Dispatched> {
        let mut out = Vec::new();
        for p in packets {
            tx.send(p).await.unwrap();
            let recv = inbound.recv().await.unwrap();
            conn.accept(&recv);
            let mut bodies = Vec::new();
            framing::drain_packets(&mut conn.buffer, |b| bodies.push(b.freeze()));
            for body in bodies {
                out.push(conn.dispatch(body));
            }
        }
        out
    }

    #[tokio::test]
    async fn single_select_produces_one_record() {
        let context = test_context();
        let mut conn = Connection::new(1, 0, "127.0.0.1:5000".to_string(), context);
        let (tx, mut rx) = mpsc::channel(8);
        // length=11: command byte + "SELECT 1+1" (10 chars)
        let body = b"\x0b\x00\x00\x00\x03SELECT 1+1";
        let outcomes = drive(&mut conn, &mut rx, &tx, vec![packet(1000, body)]).await;
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Dispatched::Record(record) => {
                assert_eq!(record.kind, QueryKind::Select);
                assert_eq!(record.text, "SELECT 1+1;");
                assert_eq!(record.conn, 1);
                assert!(!record.digest.is_empty());
            }
            _ => panic!("expected a record"),
        }
    }

    #[tokio::test]
    async fn two_statements_last_category_wins() {
        let context = test_context();
        let mut conn = Connection::new(1, 0, "127.0.0.1:5000".to_string(), context);
        let (tx, mut rx) = mpsc::channel(8);
        let sql = b"SELECT 1; INSERT INTO t VALUES (1)";
        let mut body = vec![(sql.len() as u32).to_le_bytes()[0], (sql.len() as u32).to_le_bytes()[1], (sql.len() as u32).to_le_bytes()[2], 0, 0x03];
        body.extend_from_slice(sql);
        let outcomes = drive(&mut conn, &mut rx, &tx, vec![packet(1000, &body)]).await;
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Dispatched::Record(record) => {
                assert_eq!(record.kind, QueryKind::Insert);
                assert_eq!(record.text, "SELECT 1;INSERT INTO t VALUES (1);");
            }
            _ => panic!("expected a record"),
        }
    }

    #[tokio::test]
    async fn split_packet_reassembles() {
        let context = test_context();
        let mut conn = Connection::new(1, 0, "127.0.0.1:5000".to_string(), context);
        let (tx, mut rx) = mpsc::channel(8);
        // length=7: command byte + "SELECT" (6 chars); first feed is 1 byte short
        let first = b"\x07\x00\x00\x00\x03SELEC";
        let second = b"T";
        let outcomes = drive(
            &mut conn,
            &mut rx,
            &tx,
            vec![packet(1000, first), packet(1000 + first.len() as u32, second)],
        )
        .await;
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Dispatched::Record(record) => assert_eq!(record.text, "SELECT;"),
            _ => panic!("expected a record"),
        }
    }

    #[tokio::test]
    async fn gap_increments_lost_packets_and_resets_buffer() {
        let context = test_context();
        let mut conn = Connection::new(1, 0, "127.0.0.1:5000".to_string(), Arc::clone(&context));
        let (tx, mut rx) = mpsc::channel(8);
        let p1 = packet(1000, &[0u8; 50]);
        let p2 = packet(1100, &[0u8; 50]); // gap: expected 1050
        let p3 = packet(1150, &[0u8; 50]);
        let _ = drive(&mut conn, &mut rx, &tx, vec![p1, p2, p3]).await;
        assert_eq!(context.stats.lost_packets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn com_quit_signals_close_with_no_record() {
        let context = test_context();
        let mut conn = Connection::new(1, 0, "127.0.0.1:5000".to_string(), context);
        let (tx, mut rx) = mpsc::channel(8);
        let body = b"\x01\x00\x00\x00\x01";
        let outcomes = drive(&mut conn, &mut rx, &tx, vec![packet(1000, body)]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Dispatched::Quit));
    }

    #[tokio::test]
    async fn unknown_command_increments_counter_with_no_record() {
        let context = test_context();
        let mut conn = Connection::new(1, 0, "127.0.0.1:5000".to_string(), Arc::clone(&context));
        let (tx, mut rx) = mpsc::channel(8);
        let body = b"\x01\x00\x00\x00\x7F";
        let outcomes = drive(&mut conn, &mut rx, &tx, vec![packet(1000, body)]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Dispatched::None));
        assert_eq!(context.stats.unknown_commands.load(Ordering::Relaxed), 1);
    }
}
