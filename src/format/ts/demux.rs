use super::packet::TsPacket;
use super::section::{Etid, Section, SectionPtr};
use super::table::BinaryTable;
use super::types::*;
use crate::utils::CrcValidation;
use bitvec::prelude::*;
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Set of PIDs, one bit per PID.
pub type PidSet = BitArr!(for PID_MAX, in u64, Lsb0);

/// A set containing all PIDs.
pub fn all_pids() -> PidSet {
    let mut set = PidSet::ZERO;
    set.fill(true);
    set
}

/// A set containing only `pid`.
pub fn single_pid(pid: Pid) -> PidSet {
    let mut set = PidSet::ZERO;
    set.set(pid as usize & (PID_MAX - 1), true);
    set
}

/// Error counters of a [`SectionDemux`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStatus {
    pub invalid_ts: u64,
    pub discontinuities: u64,
    pub scrambled: u64,
    pub inv_sect_length: u64,
    pub inv_sect_index: u64,
    pub wrong_crc: u64,
    pub is_next: u64,
}

impl DemuxStatus {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_errors(&self) -> bool {
        *self != Self::default()
    }
}

impl fmt::Display for DemuxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Invalid TS packets: {}", self.invalid_ts)?;
        writeln!(f, "TS packets discontinuities: {}", self.discontinuities)?;
        writeln!(f, "Scrambled TS packets: {}", self.scrambled)?;
        writeln!(f, "Invalid section lengths: {}", self.inv_sect_length)?;
        writeln!(f, "Invalid section index: {}", self.inv_sect_index)?;
        writeln!(f, "Corrupted sections (bad CRC): {}", self.wrong_crc)?;
        writeln!(f, "Next sections (not yet applicable): {}", self.is_next)
    }
}

/// Reassembly state of one table (table id, extension) on one PID.
#[derive(Debug, Default)]
struct EtidContext {
    /// Table already returned to the application
    notified: bool,
    version: u8,
    /// Number of sections in the table, zero before the first section
    sect_expected: usize,
    sect_received: usize,
    sects: Vec<Option<SectionPtr>>,
}

impl EtidContext {
    fn init(&mut self, version: u8, last_section: u8) {
        self.notified = false;
        self.version = version;
        self.sect_expected = last_section as usize + 1;
        self.sect_received = 0;
        self.sects = vec![None; self.sect_expected];
    }

    /// Builds the table when complete, or when forced with the sections
    /// received so far.
    fn notify(&mut self, force: bool) -> Option<BinaryTable> {
        if self.notified || !(force || self.sect_received == self.sect_expected) {
            return None;
        }
        let mut table = BinaryTable::from_sections(self.sects.iter().flatten().cloned());
        if force {
            table.pack_sections();
        }
        if table.is_valid() {
            self.notified = true;
            Some(table)
        } else {
            None
        }
    }
}

/// Reassembly state of one PID.
#[derive(Debug, Default)]
struct PidContext {
    continuity: u8,
    /// Synchronized on a section start
    sync: bool,
    /// Section bytes not yet processed
    ts: BytesMut,
    tids: HashMap<Etid, EtidContext>,
    /// Index of the last packet with a payload unit start
    pusi_pkt_index: PacketCounter,
}

impl PidContext {
    fn sync_lost(&mut self) {
        self.sync = false;
        self.ts.clear();
    }
}

/// Extracts sections from transport packets and reassembles complete
/// tables.
///
/// Only PIDs in the filter are analyzed. Continuity errors, scrambled
/// packets and malformed sections make the demux lose synchronization on
/// the PID until the next payload unit start. Long sections are checked
/// against their CRC32.
#[derive(Debug)]
pub struct SectionDemux {
    pid_filter: PidSet,
    pids: HashMap<Pid, PidContext>,
    status: DemuxStatus,
    packet_count: PacketCounter,
    get_current: bool,
    get_next: bool,
}

impl SectionDemux {
    pub fn new(pid_filter: PidSet) -> Self {
        Self {
            pid_filter,
            pids: HashMap::new(),
            status: DemuxStatus::default(),
            packet_count: 0,
            get_current: true,
            get_next: false,
        }
    }

    pub fn pid_filter(&self) -> &PidSet {
        &self.pid_filter
    }

    /// Replaces the PID filter. Removed PIDs lose their reassembly state.
    pub fn set_pid_filter(&mut self, pid_filter: PidSet) {
        self.pids.retain(|pid, _| pid_filter[*pid as usize]);
        self.pid_filter = pid_filter;
    }

    pub fn add_pid(&mut self, pid: Pid) {
        self.pid_filter.set(pid as usize & (PID_MAX - 1), true);
    }

    pub fn remove_pid(&mut self, pid: Pid) {
        self.pid_filter.set(pid as usize & (PID_MAX - 1), false);
        self.pids.remove(&pid);
    }

    /// Selects which sections are reassembled: those with the current
    /// indicator, those with the next indicator, or both.
    pub fn set_current_next(&mut self, get_current: bool, get_next: bool) {
        self.get_current = get_current;
        self.get_next = get_next;
    }

    pub fn status(&self) -> &DemuxStatus {
        &self.status
    }

    pub fn reset_status(&mut self) {
        self.status.reset();
    }

    /// Number of packets fed so far.
    pub fn packet_count(&self) -> PacketCounter {
        self.packet_count
    }

    /// Drops all partially reassembled sections and tables.
    pub fn reset(&mut self) {
        self.pids.clear();
    }

    pub fn reset_pid(&mut self, pid: Pid) {
        self.pids.remove(&pid);
    }

    /// Analyzes one packet and returns the tables it completes.
    pub fn feed_packet(&mut self, pkt: &TsPacket) -> Vec<BinaryTable> {
        let mut tables = Vec::new();
        if self.pid_filter[pkt.pid() as usize] {
            self.process_packet(pkt, &mut tables);
        }
        self.packet_count += 1;
        tables
    }

    /// Returns all tables not yet complete, with the sections received so
    /// far, renumbered.
    pub fn pack_and_flush(&mut self) -> Vec<BinaryTable> {
        self.pids
            .values_mut()
            .flat_map(|pc| pc.tids.values_mut())
            .filter_map(|tc| tc.notify(true))
            .collect()
    }

    fn process_packet(&mut self, pkt: &TsPacket, tables: &mut Vec<BinaryTable>) {
        if !pkt.has_valid_sync() {
            self.status.invalid_ts += 1;
            return;
        }

        let pid = pkt.pid();
        let packet_index = self.packet_count;
        let (get_current, get_next) = (self.get_current, self.get_next);
        let status = &mut self.status;
        let pc = self.pids.entry(pid).or_default();

        if pkt.scrambling() != 0 {
            status.scrambled += 1;
            pc.sync_lost();
            return;
        }

        if pc.sync {
            // Duplicate packet.
            if pkt.cc() == pc.continuity {
                return;
            }
            if pkt.cc() != (pc.continuity + 1) % CC_MAX {
                status.discontinuities += 1;
                pc.sync_lost();
            }
        }
        pc.continuity = pkt.cc();

        let header_size = pkt.header_size();
        if !pkt.has_payload() || header_size >= TS_PACKET_SIZE {
            return;
        }

        let mut pusi_pkt_index = pc.pusi_pkt_index;
        let (mut pointer_field, mut payload) = if pkt.pusi() {
            pc.pusi_pkt_index = packet_index;
            let data = &pkt.b[header_size..];
            // PES start code prefix, cannot start a section.
            if data.starts_with(&[0x00, 0x00, 0x01]) {
                pc.sync_lost();
                return;
            }
            let pointer = data[0] as usize;
            let payload = &data[1..];
            if pointer >= payload.len() {
                pc.sync_lost();
                return;
            }
            if pointer == 0 {
                pusi_pkt_index = packet_index;
            }
            (Some(pointer), payload)
        } else {
            (None, &pkt.b[header_size..])
        };

        if payload.is_empty() {
            return;
        }

        if !pc.sync {
            // Skip the end of a section we did not see starting.
            let Some(pointer) = pointer_field else {
                return;
            };
            payload = &payload[pointer..];
            pointer_field = Some(0);
            pc.sync = true;
        }

        pc.ts.extend_from_slice(payload);

        // Start of the new section in this packet. A previous section
        // overlapping it was truncated.
        let pusi_section = pointer_field.map(|pointer| pc.ts.len() - payload.len() + pointer);

        let mut start = 0;
        while pc.ts.len() - start >= SHORT_SECTION_HEADER_SIZE {
            let ts = &pc.ts[start..];
            let tid = ts[0];
            let length_field = u16::from_be_bytes([ts[1], ts[2]]);
            let long_header = length_field & 0x8000 != 0;
            let mut section_length = (length_field & 0x0FFF) as usize + SHORT_SECTION_HEADER_SIZE;

            if section_length > MAX_PRIVATE_SECTION_SIZE
                || (long_header && section_length < MIN_LONG_SECTION_SIZE)
            {
                status.inv_sect_length += 1;
                pc.sync_lost();
                return;
            }

            // Wait for the end of the section.
            if ts.len() < section_length {
                break;
            }

            let mut section_ok = true;
            if let Some(pusi_at) = pusi_section {
                if start < pusi_at && start + section_length > pusi_at {
                    section_ok = false;
                    section_length = pusi_at - start;
                }
            }

            let mut etid = Etid::short(tid);
            let mut version = 0;
            let mut is_next = false;
            let mut section_number = 0;
            let mut last_section_number = 0;

            if section_ok && long_header {
                etid = Etid::long(tid, u16::from_be_bytes([ts[3], ts[4]]));
                version = (ts[5] >> 1) & 0x1F;
                is_next = ts[5] & 0x01 == 0;
                section_number = ts[6];
                last_section_number = ts[7];
                if section_number > last_section_number {
                    status.inv_sect_index += 1;
                    section_ok = false;
                }
            }

            if is_next && !get_next {
                status.is_next += 1;
                section_ok = false;
            }
            if !is_next && !get_current {
                section_ok = false;
            }

            if section_ok {
                let tc = pc.tids.entry(etid).or_default();

                // Short sections have no version: each one is a new table.
                if !long_header || tc.sect_expected == 0 || tc.version != version {
                    tc.init(version, last_section_number);
                }

                if last_section_number as usize + 1 != tc.sect_expected {
                    status.inv_sect_index += 1;
                } else if tc.sects[section_number as usize].is_none() {
                    let mut section =
                        Section::from_slice(&ts[..section_length], pid, CrcValidation::Check);
                    if section.is_valid() {
                        section.set_first_packet_index(pusi_pkt_index);
                        section.set_last_packet_index(packet_index);
                        tc.sects[section_number as usize] = Some(Arc::new(section));
                        tc.sect_received += 1;
                        if let Some(table) = tc.notify(false) {
                            log::debug!(
                                "table {} version {} complete on PID 0x{:04X}",
                                table.etid(),
                                table.version(),
                                pid
                            );
                            tables.push(table);
                        }
                    } else {
                        status.wrong_crc += 1;
                    }
                }
            }

            start += section_length;

            // The next section starts in this packet.
            pusi_pkt_index = packet_index;

            // The rest of the packet is stuffing.
            if start < pc.ts.len() && pc.ts[start] == TID_NULL {
                start = pc.ts.len();
            }
        }

        if start >= pc.ts.len() {
            pc.ts.clear();
        } else {
            pc.ts.advance(start);
        }
    }
}

impl Default for SectionDemux {
    fn default() -> Self {
        Self::new(all_pids())
    }
}
