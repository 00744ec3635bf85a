//! MySQL wire-protocol packet framing.
//!
//! A MySQL packet is a 4-byte header (24-bit little-endian length, 1-byte
//! sequence id) followed by `length` bytes of body. This mirrors a standard
//! `tokio_util::codec::Decoder` over an in-memory buffer rather than a live
//! `AsyncRead`: the reassembler feeds it whatever contiguous, in-order bytes
//! TCP sequencing has produced so far, and it yields zero or more complete
//! packets plus a residual tail.
//!
//! `decode` is non-destructive until a full frame is available: it only
//! peeks the length from the header, and only consumes bytes (`advance` +
//! `split_to`) once the whole frame has arrived. This matters because
//! `drain_packets` builds a fresh `PacketDecoder` on every call over the
//! reassembler's long-lived buffer — unlike the teacher's `FramedRead`,
//! which keeps one decoder alive across reads, there is no surviving state
//! between calls here, so a decoder that consumed the header before
//! confirming the body was complete would lose those bytes for good.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Decodes one MySQL packet body from a buffer of in-order bytes.
///
/// The sequence id (header byte 3) is intentionally discarded: stream
/// sanity here is provided by TCP sequencing, not the MySQL sequence id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketDecoder;

impl Decoder for PacketDecoder {
    type Item = BytesMut;
    type Error = std::convert::Infallible;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_le_bytes([src[0], src[1], src[2], 0]) as usize;
        if src.len() < 4 + length {
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(length)))
    }
}

/// Drains every complete MySQL packet currently sitting in `buffer`,
/// calling `on_packet` for each body (which may be empty — a zero-length
/// body is legal framing and carries no command byte). Leaves any residual
/// partial packet in `buffer` for the next inbound TCP segment.
pub fn drain_packets(buffer: &mut BytesMut, mut on_packet: impl FnMut(BytesMut)) {
    let mut decoder = PacketDecoder;
    while let Ok(Some(body)) = decoder.decode(buffer) {
        on_packet(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_single_complete_packet() {
        // length=11: command byte + "SELECT 1+1" (10 chars)
        let mut buf = BytesMut::from(&b"\x0b\x00\x00\x00\x03SELECT 1+1"[..]);
        let mut bodies = Vec::new();
        drain_packets(&mut buf, |b| bodies.push(b.to_vec()));
        assert_eq!(bodies, vec![b"\x03SELECT 1+1".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn leaves_partial_packet_buffered() {
        // length=7 (command byte + "SELECT"), only 6 of 7 body bytes present
        let mut buf = BytesMut::from(&b"\x07\x00\x00\x00\x03SELEC"[..]);
        let mut bodies: Vec<Vec<u8>> = Vec::new();
        drain_packets(&mut buf, |b| bodies.push(b.to_vec()));
        assert!(bodies.is_empty());
        assert_eq!(&buf[..], b"\x07\x00\x00\x00\x03SELEC");
    }

    #[test]
    fn completes_a_packet_split_across_two_feeds() {
        let mut buf = BytesMut::from(&b"\x07\x00\x00\x00\x03SELEC"[..]);
        buf.extend_from_slice(b"T");
        let mut bodies = Vec::new();
        drain_packets(&mut buf, |b| bodies.push(b.to_vec()));
        assert_eq!(bodies, vec![b"\x03SELECT".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn zero_length_body_has_no_command_byte() {
        let mut buf = BytesMut::from(&b"\x00\x00\x00\x00"[..]);
        let mut bodies: Vec<Vec<u8>> = Vec::new();
        drain_packets(&mut buf, |b| bodies.push(b.to_vec()));
        assert_eq!(bodies, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn max_body_length_parses_without_fragmenting() {
        let max_len = 0xFF_FFFF_usize;
        let mut buf = BytesMut::with_capacity(max_len + 4);
        buf.extend_from_slice(&(max_len as u32).to_le_bytes()[..3]);
        buf.extend_from_slice(&[0u8]); // sequence id
        buf.resize(4 + max_len, 0x41);
        let mut bodies = Vec::new();
        drain_packets(&mut buf, |b| bodies.push(b.len()));
        assert_eq!(bodies, vec![max_len]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drains_multiple_packets_in_one_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\x01\x00\x00\x00\x01"); // COM_QUIT
        buf.extend_from_slice(b"\x02\x00\x00\x00\x03x"); // COM_QUERY "x"
        let mut bodies = Vec::new();
        drain_packets(&mut buf, |b| bodies.push(b.to_vec()));
        assert_eq!(bodies, vec![vec![0x01], vec![0x03, b'x']]);
    }

    #[test]
    fn decode_does_not_consume_header_of_an_incomplete_frame() {
        let mut decoder = PacketDecoder;
        let mut buf = BytesMut::from(&b"\x07\x00\x00\x00\x03SELEC"[..]);
        let result = decoder.decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 10, "header and partial body must remain buffered");
    }
}
