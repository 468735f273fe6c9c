use super::types::*;
use std::fmt;

/// One 188-byte transport stream packet.
///
/// Only the fields the section layer needs are exposed. Adaptation fields
/// are skipped when locating the payload but never generated.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TsPacket {
    pub b: [u8; TS_PACKET_SIZE],
}

impl TsPacket {
    /// A null packet: PID 0x1FFF, payload only, all payload bytes 0xFF.
    pub const NULL: TsPacket = {
        let mut b = [0xFFu8; TS_PACKET_SIZE];
        b[0] = SYNC_BYTE;
        b[1] = 0x1F;
        b[2] = 0xFF;
        b[3] = 0x10;
        TsPacket { b }
    };

    /// Builds a packet from a buffer of exactly 188 bytes.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let b: [u8; TS_PACKET_SIZE] = data.try_into().ok()?;
        Some(Self { b })
    }

    pub fn has_valid_sync(&self) -> bool {
        self.b[0] == SYNC_BYTE
    }

    pub fn pid(&self) -> Pid {
        (((self.b[1] & 0x1F) as Pid) << 8) | self.b[2] as Pid
    }

    pub fn set_pid(&mut self, pid: Pid) {
        self.b[1] = (self.b[1] & 0xE0) | ((pid >> 8) & 0x1F) as u8;
        self.b[2] = (pid & 0xFF) as u8;
    }

    pub fn pusi(&self) -> bool {
        self.b[1] & 0x40 != 0
    }

    pub fn scrambling(&self) -> u8 {
        self.b[3] >> 6
    }

    pub fn cc(&self) -> u8 {
        self.b[3] & 0x0F
    }

    pub fn set_cc(&mut self, cc: u8) {
        self.b[3] = (self.b[3] & 0xF0) | (cc & 0x0F);
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.b[3] & 0x20 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.b[3] & 0x10 != 0
    }

    /// Size of the header including the adaptation field, if any.
    /// May exceed the packet size on corrupted packets.
    pub fn header_size(&self) -> usize {
        if self.has_adaptation_field() {
            TS_HEADER_SIZE + 1 + self.b[4] as usize
        } else {
            TS_HEADER_SIZE
        }
    }

    /// Payload bytes, empty when there is no payload or the header is corrupted.
    pub fn payload(&self) -> &[u8] {
        let start = self.header_size();
        if !self.has_payload() || start >= TS_PACKET_SIZE {
            &[]
        } else {
            &self.b[start..]
        }
    }

    pub fn is_null(&self) -> bool {
        self.pid() == PID_NULL
    }
}

impl Default for TsPacket {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for TsPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsPacket")
            .field("pid", &format_args!("0x{:04X}", self.pid()))
            .field("pusi", &self.pusi())
            .field("cc", &self.cc())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}
