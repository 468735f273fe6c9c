use super::packet::TsPacket;
use super::section::SectionPtr;
use super::types::*;
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use std::fmt;

/// Source of sections for a [`Packetizer`].
///
/// The packetizer calls `provide_section` each time it needs a new section
/// and `do_stuffing` each time it could start a new section in the middle
/// of a packet.
pub trait SectionProvider {
    /// Returns the next section to packetize, `None` when there is none.
    /// `counter` is the number of sections provided so far.
    fn provide_section(&mut self, counter: SectionCounter) -> Option<SectionPtr>;

    /// Returns true when the rest of the current packet must be stuffed
    /// instead of starting the next section in it.
    fn do_stuffing(&mut self) -> bool;
}

/// A plain FIFO of sections, each packetized once, sections packed
/// back to back.
impl SectionProvider for VecDeque<SectionPtr> {
    fn provide_section(&mut self, _counter: SectionCounter) -> Option<SectionPtr> {
        self.pop_front()
    }

    fn do_stuffing(&mut self) -> bool {
        self.is_empty()
    }
}

/// Packetization of sections into transport packets on one PID.
///
/// The packetizer keeps the section being sliced across calls to
/// [`Packetizer::next_packet`]. When the provider has no section, a null
/// packet is returned and the continuity counter is left untouched.
#[derive(Debug)]
pub struct Packetizer {
    pid: Pid,
    continuity: u8,
    section: Option<SectionPtr>,
    next_byte: usize,
    packet_count: PacketCounter,
    section_out_count: SectionCounter,
    section_in_count: SectionCounter,
}

impl Packetizer {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid: pid & 0x1FFF,
            continuity: 0,
            section: None,
            next_byte: 0,
            packet_count: 0,
            section_out_count: 0,
            section_in_count: 0,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn set_pid(&mut self, pid: Pid) {
        self.pid = pid & 0x1FFF;
    }

    /// Continuity counter of the next packet.
    pub fn next_continuity_counter(&self) -> u8 {
        self.continuity
    }

    /// Forces the continuity counter of the next packet, typically to
    /// continue an existing PID without discontinuity.
    pub fn set_next_continuity_counter(&mut self, cc: u8) {
        self.continuity = cc & 0x0F;
    }

    /// True when the last packet ended exactly at the end of a section.
    pub fn at_section_boundary(&self) -> bool {
        self.next_byte == 0
    }

    /// Number of packets generated so far, null packets included.
    pub fn packet_count(&self) -> PacketCounter {
        self.packet_count
    }

    /// Number of sections completely packetized so far.
    pub fn section_count(&self) -> SectionCounter {
        self.section_out_count
    }

    /// Drops the section in progress and resets all counters.
    /// An unfinished section is lost.
    pub fn reset(&mut self) {
        self.continuity = 0;
        self.section = None;
        self.next_byte = 0;
        self.packet_count = 0;
        self.section_out_count = 0;
        self.section_in_count = 0;
    }

    fn fetch_section<P: SectionProvider + ?Sized>(&mut self, provider: &mut P) {
        self.next_byte = 0;
        self.section = provider
            .provide_section(self.section_in_count)
            .filter(|s| s.is_valid());
        if self.section.is_some() {
            self.section_in_count += 1;
        }
    }

    /// Builds the next packet.
    ///
    /// Returns the packet and true when it carries section data, or a null
    /// packet and false when the provider had nothing to send.
    pub fn next_packet<P: SectionProvider + ?Sized>(&mut self, provider: &mut P) -> (TsPacket, bool) {
        if self.section.is_none() {
            self.fetch_section(provider);
        }
        let Some(section) = self.section.as_ref() else {
            self.packet_count += 1;
            return (TsPacket::NULL, false);
        };

        let mut remain = TS_PAYLOAD_SIZE;

        // A pointer field is present when a section starts in this packet:
        // either the current one starts here, or it ends here early enough
        // to leave room for the next one.
        let pointer_field = if self.next_byte == 0 {
            Some(0u8)
        } else {
            let tail = section.size() - self.next_byte;
            if tail < remain - 1 && !provider.do_stuffing() {
                Some(tail as u8)
            } else {
                None
            }
        };
        let pusi = pointer_field.is_some();

        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        TSHeader::payload_only(self.pid, pusi, self.continuity).write_to(&mut buf);
        self.continuity = (self.continuity + 1) % CC_MAX;

        if let Some(pointer) = pointer_field {
            buf.put_u8(pointer);
            remain -= 1;
        }

        while remain > 0 {
            if let Some(section) = self.section.as_ref() {
                let length = (section.size() - self.next_byte).min(remain);
                buf.put_slice(&section.content()[self.next_byte..self.next_byte + length]);
                remain -= length;
                self.next_byte += length;
                if self.next_byte >= section.size() {
                    self.section = None;
                    self.next_byte = 0;
                    self.section_out_count += 1;
                }
            }

            if remain > 0 && self.section.is_none() {
                // Without a pointer field, no section may start in this packet.
                if !pusi || provider.do_stuffing() {
                    buf.put_bytes(0xFF, remain);
                    remain = 0;
                } else {
                    self.fetch_section(provider);
                    if self.section.is_none() {
                        buf.put_bytes(0xFF, remain);
                        remain = 0;
                    }
                }
            }
        }

        self.packet_count += 1;
        let mut packet = TsPacket::NULL;
        packet.b.copy_from_slice(&buf);
        (packet, true)
    }
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new(PID_NULL)
    }
}

impl fmt::Display for Packetizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  PID: 0x{:04X} ({})", self.pid, self.pid)?;
        writeln!(f, "  Next CC: {}", self.continuity)?;
        match &self.section {
            Some(section) => writeln!(
                f,
                "  Current section: {}, next byte: {}/{}",
                section.etid(),
                self.next_byte,
                section.size()
            )?,
            None => writeln!(f, "  Current section: none")?,
        }
        writeln!(f, "  Output packets: {}", self.packet_count)?;
        writeln!(f, "  Output sections: {}", self.section_out_count)?;
        writeln!(f, "  Provided sections: {}", self.section_in_count)
    }
}
