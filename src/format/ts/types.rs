use bytes::{BufMut, BytesMut};

/// Packet identifier, 13 bits.
pub type Pid = u16;
/// Table identifier.
pub type Tid = u8;
/// Bitrate in bits/second, based on 188-byte packets.
pub type BitRate = u64;
/// Count of transport packets.
pub type PacketCounter = u64;
/// Count of sections.
pub type SectionCounter = u64;
/// Duration in milliseconds.
pub type MilliSecond = u64;

// PIDs
pub const PID_PAT: Pid = 0x0000;
pub const PID_CAT: Pid = 0x0001;
pub const PID_NIT: Pid = 0x0010;
pub const PID_SDT: Pid = 0x0011;
pub const PID_EIT: Pid = 0x0012;
pub const PID_TDT: Pid = 0x0014;
pub const PID_NULL: Pid = 0x1FFF;
pub const PID_MAX: usize = 0x2000;

// Table IDs
pub const TID_PAT: Tid = 0x00;
pub const TID_CAT: Tid = 0x01;
pub const TID_PMT: Tid = 0x02;
pub const TID_NIT_ACT: Tid = 0x40;
pub const TID_SDT_ACT: Tid = 0x42;
pub const TID_BAT: Tid = 0x4A;
pub const TID_TDT: Tid = 0x70;
pub const TID_NULL: Tid = 0xFF;

// Constants
pub const SYNC_BYTE: u8 = 0x47;
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const TS_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
pub const CC_MAX: u8 = 16;

// Section sizes
pub const SHORT_SECTION_HEADER_SIZE: usize = 3;
pub const LONG_SECTION_HEADER_SIZE: usize = 8;
pub const SECTION_CRC32_SIZE: usize = 4;
pub const MAX_PSI_SECTION_SIZE: usize = 1024;
pub const MAX_PRIVATE_SECTION_SIZE: usize = 4096;
pub const MIN_SHORT_SECTION_SIZE: usize = SHORT_SECTION_HEADER_SIZE;
pub const MIN_LONG_SECTION_SIZE: usize = LONG_SECTION_HEADER_SIZE + SECTION_CRC32_SIZE;

const MILLISEC_PER_SEC: u64 = 1000;
const BITS_PER_PACKET: u64 = 8 * TS_PACKET_SIZE as u64;

/// Number of packets transmitted during `duration` milliseconds at `bitrate`.
pub fn packet_distance(bitrate: BitRate, duration: MilliSecond) -> PacketCounter {
    bitrate.saturating_mul(duration) / (MILLISEC_PER_SEC * BITS_PER_PACKET)
}

/// Interval in milliseconds between two packets `distance` packets apart.
/// Zero when the bitrate is unknown.
pub fn packet_interval(bitrate: BitRate, distance: PacketCounter) -> MilliSecond {
    if bitrate == 0 {
        0
    } else {
        distance.saturating_mul(BITS_PER_PACKET * MILLISEC_PER_SEC) / bitrate
    }
}

/// Bitrate of a PID carrying `packets` packets during `duration` milliseconds.
pub fn packet_bitrate(packets: PacketCounter, duration: MilliSecond) -> BitRate {
    if duration == 0 {
        0
    } else {
        packets.saturating_mul(BITS_PER_PACKET * MILLISEC_PER_SEC) / duration
    }
}

/// Minimum number of packets required to transport a section of `section_size` bytes.
pub fn section_packet_count(section_size: usize) -> PacketCounter {
    // One extra byte for the pointer field in the first packet.
    ((section_size + TS_PAYLOAD_SIZE) / TS_PAYLOAD_SIZE) as PacketCounter
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TSHeader {
    pub sync_byte: u8, // Always 0x47
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: Pid,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            sync_byte: SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    /// Header of a payload-only packet on `pid`.
    pub fn payload_only(pid: Pid, payload_unit_start: bool, continuity_counter: u8) -> Self {
        Self {
            payload_unit_start,
            pid,
            continuity_counter,
            ..Default::default()
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = (self.scrambling_control & 0x03) << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_packet_distance() {
        // 10 packets per second
        let bitrate = (TS_PACKET_SIZE * 8 * 10) as BitRate;
        assert_eq!(packet_distance(bitrate, 1000), 10);
        assert_eq!(packet_distance(bitrate, 250), 2);
        assert_eq!(packet_distance(bitrate, 0), 0);
        assert_eq!(packet_distance(0, 1000), 0);
        assert_eq!(packet_distance(1_000_000, 100), 66);
    }

    #[test]
    fn test_packet_interval_and_bitrate() {
        let bitrate = (TS_PACKET_SIZE * 8 * 10) as BitRate;
        assert_eq!(packet_interval(bitrate, 1), 100);
        assert_eq!(packet_interval(0, 1), 0);
        assert_eq!(packet_bitrate(10, 1000), bitrate);
        assert_eq!(packet_bitrate(10, 0), 0);
    }

    #[test]
    fn test_section_packet_count() {
        assert_eq!(section_packet_count(3), 1);
        assert_eq!(section_packet_count(183), 1);
        assert_eq!(section_packet_count(184), 2);
        assert_eq!(section_packet_count(367), 2);
        assert_eq!(section_packet_count(368), 3);
        assert_eq!(section_packet_count(4096), 23);
    }

    #[test]
    fn test_header_write() {
        let mut buf = BytesMut::new();
        TSHeader::payload_only(0x1234, true, 0x1F).write_to(&mut buf);
        assert_eq!(&buf[..], &[0x47, 0x52, 0x34, 0x1F]);
    }
}
