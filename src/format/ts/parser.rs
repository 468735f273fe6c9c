use super::packet::TsPacket;
use super::types::*;
use bytes::{Buf, BytesMut};

/// Splits a raw byte stream into transport packets.
///
/// Bytes are accumulated with [`TSPacketParser::push`]; complete packets
/// are pulled with [`TSPacketParser::next_packet`]. When the stream is not
/// aligned on a sync byte, leading garbage is dropped until a sync byte is
/// found again.
#[derive(Debug, Default)]
pub struct TSPacketParser {
    buffer: BytesMut,
    skipped: u64,
}

impl TSPacketParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(TS_PACKET_SIZE * 64),
            skipped: 0,
        }
    }

    /// Appends raw stream bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete packet, if any.
    pub fn next_packet(&mut self) -> Option<TsPacket> {
        // Resynchronize on the next sync byte.
        match self.buffer.iter().position(|&b| b == SYNC_BYTE) {
            Some(0) => {}
            Some(pos) => {
                log::debug!("skipping {} bytes to resynchronize on sync byte", pos);
                self.skipped += pos as u64;
                self.buffer.advance(pos);
            }
            None => {
                self.skipped += self.buffer.len() as u64;
                self.buffer.clear();
                return None;
            }
        }

        if self.buffer.len() < TS_PACKET_SIZE {
            return None;
        }
        let data = self.buffer.split_to(TS_PACKET_SIZE);
        TsPacket::from_slice(&data)
    }

    /// Number of buffered bytes not yet returned as packets.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of bytes dropped while looking for sync bytes.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parsed_packet_header() {
        let mut data = TsPacket::NULL.b;
        data[1] = 0x40; // Payload unit start indicator set
        data[2] = 0x00; // PID 0
        data[3] = 0x1A; // Payload, continuity counter 10

        let mut parser = TSPacketParser::new();
        parser.push(&data);
        let packet = parser.next_packet().unwrap();
        assert_eq!(packet.pid(), PID_PAT);
        assert!(packet.pusi());
        assert!(packet.has_payload());
        assert!(!packet.has_adaptation_field());
        assert_eq!(packet.cc(), 10);
        assert_eq!(packet.header_size(), TS_HEADER_SIZE);
    }

    #[test]
    fn test_split_and_resync() {
        let mut parser = TSPacketParser::new();
        let mut stream = vec![0x00, 0x12, 0x34];
        stream.extend_from_slice(&TsPacket::NULL.b);
        stream.extend_from_slice(&TsPacket::NULL.b[..100]);

        parser.push(&stream);
        assert_eq!(parser.next_packet(), Some(TsPacket::NULL));
        assert_eq!(parser.next_packet(), None);
        assert_eq!(parser.skipped(), 3);
        assert_eq!(parser.pending(), 100);

        parser.push(&TsPacket::NULL.b[100..]);
        assert_eq!(parser.next_packet(), Some(TsPacket::NULL));
        assert_eq!(parser.pending(), 0);
    }
}
