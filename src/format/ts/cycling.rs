use super::packet::TsPacket;
use super::packetizer::{Packetizer, SectionProvider};
use super::section::SectionPtr;
use super::table::BinaryTable;
use super::types::*;
use std::collections::VecDeque;
use std::fmt;

/// When the packetizer pads the current packet instead of packing the next
/// section right after the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StuffingPolicy {
    /// Pack sections, stuff only when there is nothing to send.
    #[default]
    Never,
    /// Stuff after the last section of each cycle.
    AtEnd,
    /// Stuff after every section.
    Always,
}

/// One section in the repository, with its scheduling state.
#[derive(Debug)]
struct SectionDesc {
    section: SectionPtr,
    repetition: MilliSecond,
    last_cycle: SectionCounter,
    last_packet: PacketCounter,
    due_packet: PacketCounter,
}

impl SectionDesc {
    fn new(section: SectionPtr, repetition: MilliSecond) -> Self {
        Self {
            section,
            repetition,
            last_cycle: 0,
            last_packet: 0,
            due_packet: 0,
        }
    }

    fn matches(&self, tid: Tid, tid_ext: Option<u16>) -> bool {
        self.section.table_id() == tid
            && tid_ext.map_or(true, |ext| self.section.table_id_extension() == ext)
    }
}

impl fmt::Display for SectionDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    - TID {}", self.section.etid())?;
        writeln!(f, "      Repetition rate: {} ms", self.repetition)?;
        writeln!(f, "      Last provided at cycle: {}", self.last_cycle)?;
        writeln!(f, "      Last provided at packet: {}", self.last_packet)?;
        writeln!(f, "      Due packet: {}", self.due_packet)
    }
}

/// The section repository and its scheduling policy.
///
/// `sched` is sorted by due packet, FIFO among equal due packets.
/// `other` is a round-robin queue of sections without repetition rate
/// (or all sections while the bitrate is unknown).
#[derive(Debug)]
struct Schedule {
    stuffing: StuffingPolicy,
    bitrate: BitRate,
    current_packet: PacketCounter,
    section_count: SectionCounter,
    sched: VecDeque<SectionDesc>,
    other: VecDeque<SectionDesc>,
    sched_packets: PacketCounter,
    current_cycle: SectionCounter,
    remain_in_cycle: SectionCounter,
    cycle_end: Option<SectionCounter>,
}

impl Schedule {
    fn new(stuffing: StuffingPolicy, bitrate: BitRate) -> Self {
        Self {
            stuffing,
            bitrate,
            current_packet: 0,
            section_count: 0,
            sched: VecDeque::new(),
            other: VecDeque::new(),
            sched_packets: 0,
            current_cycle: 1,
            remain_in_cycle: 0,
            cycle_end: None,
        }
    }

    fn add_scheduled(&mut self, desc: SectionDesc) {
        let pos = self.sched.partition_point(|d| d.due_packet <= desc.due_packet);
        self.sched.insert(pos, desc);
    }

    fn add_section(&mut self, section: SectionPtr, repetition: MilliSecond) {
        let mut desc = SectionDesc::new(section, repetition);
        if repetition == 0 || self.bitrate == 0 {
            self.other.push_back(desc);
        } else {
            // Due now.
            desc.due_packet = self.current_packet;
            self.sched_packets += desc.section.packet_count();
            self.add_scheduled(desc);
        }
        self.section_count += 1;
        self.remain_in_cycle += 1;
    }

    fn remove_sections(&mut self, tid: Tid, tid_ext: Option<u16>) {
        for scheduled in [true, false] {
            let mut list = std::mem::take(if scheduled { &mut self.sched } else { &mut self.other });
            list.retain(|desc| {
                if !desc.matches(tid, tid_ext) {
                    return true;
                }
                debug_assert!(self.section_count > 0);
                self.section_count -= 1;
                if desc.last_cycle != self.current_cycle {
                    debug_assert!(self.remain_in_cycle > 0);
                    self.remain_in_cycle -= 1;
                }
                if scheduled {
                    let packets = desc.section.packet_count();
                    debug_assert!(self.sched_packets >= packets);
                    self.sched_packets -= packets;
                }
                false
            });
            *(if scheduled { &mut self.sched } else { &mut self.other }) = list;
        }
    }

    fn remove_all(&mut self) {
        self.section_count = 0;
        self.remain_in_cycle = 0;
        self.sched_packets = 0;
        self.sched.clear();
        self.other.clear();
    }

    fn set_bitrate(&mut self, new_bitrate: BitRate) {
        if self.bitrate == new_bitrate {
            return;
        }

        if new_bitrate == 0 {
            // Unable to schedule anything without bitrate.
            self.other.extend(self.sched.drain(..));
            self.sched_packets = 0;
        } else if self.bitrate == 0 {
            // Move the sections with a repetition rate back to the schedule.
            let current_packet = self.current_packet;
            for mut desc in std::mem::take(&mut self.other) {
                if desc.repetition == 0 {
                    self.other.push_back(desc);
                } else {
                    desc.due_packet = desc.due_packet.max(current_packet);
                    self.sched_packets += desc.section.packet_count();
                    self.add_scheduled(desc);
                }
            }
        } else {
            // Recompute all due packets and sort again.
            for mut desc in std::mem::take(&mut self.sched) {
                desc.due_packet = desc.last_packet + packet_distance(new_bitrate, desc.repetition);
                self.add_scheduled(desc);
            }
        }

        log::debug!("section bitrate changed from {} to {} b/s", self.bitrate, new_bitrate);
        self.bitrate = new_bitrate;
    }

    // When the scheduled sections require more than the PID bitrate, the
    // unscheduled ones would never pass: force one from time to time.
    fn force_unscheduled(&self) -> bool {
        match self.other.back() {
            Some(last) if !self.sched.is_empty() => {
                last.last_cycle != self.current_cycle
                    || last.last_packet + last.section.packet_count() + self.sched_packets
                        < self.current_packet
            }
            _ => false,
        }
    }
}

impl SectionProvider for Schedule {
    fn provide_section(&mut self, counter: SectionCounter) -> Option<SectionPtr> {
        let current_packet = self.current_packet;

        // Defined again below only when this section ends a cycle.
        self.cycle_end = None;

        let force_unscheduled = self.force_unscheduled();
        let sched_ready = self.sched.front().is_some_and(|d| d.due_packet <= current_packet);

        let (mut desc, scheduled) = if !force_unscheduled && sched_ready {
            let mut desc = self.sched.pop_front()?;
            // At least one packet later, so that every scheduled section passes.
            desc.due_packet =
                current_packet + packet_distance(self.bitrate, desc.repetition).max(1);
            (desc, true)
        } else {
            (self.other.pop_front()?, false)
        };

        let section = desc.section.clone();
        desc.last_packet = current_packet;
        if desc.last_cycle != self.current_cycle {
            // First time in this cycle.
            desc.last_cycle = self.current_cycle;
            debug_assert!(self.remain_in_cycle > 0);
            self.remain_in_cycle = self.remain_in_cycle.saturating_sub(1);
            if self.remain_in_cycle == 0 {
                log::debug!("cycle {} ends with section #{}", self.current_cycle, counter);
                self.cycle_end = Some(counter);
                self.current_cycle += 1;
                self.remain_in_cycle = self.section_count;
            }
        }

        if scheduled {
            self.add_scheduled(desc);
        } else {
            self.other.push_back(desc);
        }
        Some(section)
    }

    fn do_stuffing(&mut self) -> bool {
        self.section_count == 0
            || self.stuffing == StuffingPolicy::Always
            || (self.stuffing == StuffingPolicy::AtEnd && self.remain_in_cycle == self.section_count)
    }
}

/// Cyclic packetization of a set of sections on one PID.
///
/// Sections with a repetition rate are scheduled: each one becomes due
/// again `rate` milliseconds (converted to packets using the PID bitrate)
/// after it was sent. Sections without repetition rate, or all sections
/// while the bitrate is unknown, are sent round-robin when no scheduled
/// section is due.
///
/// A cycle ends when every section has been sent at least once since the
/// start of the cycle.
///
/// ```rust
/// use std::sync::Arc;
/// use tscarousel::format::ts::{CyclingPacketizer, Section, StuffingPolicy};
///
/// let mut pzer = CyclingPacketizer::new(0x0100, StuffingPolicy::Always, 1_000_000);
/// pzer.add_section(Arc::new(Section::new_short(0x42, true, &[0u8; 10])), 100);
///
/// let (packet, real) = pzer.next_packet();
/// assert!(real);
/// assert_eq!(packet.pid(), 0x0100);
/// assert!(pzer.at_cycle_boundary());
/// ```
#[derive(Debug)]
pub struct CyclingPacketizer {
    packetizer: Packetizer,
    schedule: Schedule,
}

impl CyclingPacketizer {
    pub fn new(pid: Pid, stuffing: StuffingPolicy, bitrate: BitRate) -> Self {
        Self {
            packetizer: Packetizer::new(pid),
            schedule: Schedule::new(stuffing, bitrate),
        }
    }

    fn sync_packet_count(&mut self) {
        self.schedule.current_packet = self.packetizer.packet_count();
    }

    /// Adds a section. A zero repetition rate makes it unscheduled.
    /// Invalid sections are ignored.
    pub fn add_section(&mut self, section: SectionPtr, repetition: MilliSecond) {
        if !section.is_valid() {
            log::warn!("ignoring invalid section in packetizer on PID 0x{:04X}", self.pid());
            return;
        }
        self.sync_packet_count();
        self.schedule.add_section(section, repetition);
    }

    pub fn add_sections<I>(&mut self, sections: I, repetition: MilliSecond)
    where
        I: IntoIterator<Item = SectionPtr>,
    {
        for section in sections {
            self.add_section(section, repetition);
        }
    }

    /// Adds all sections of a table.
    pub fn add_table(&mut self, table: &BinaryTable, repetition: MilliSecond) {
        self.add_sections(table.sections().cloned(), repetition);
    }

    /// Removes all sections with table id `tid`.
    pub fn remove_sections(&mut self, tid: Tid) {
        self.schedule.remove_sections(tid, None);
    }

    /// Removes all sections with table id `tid` and extension `tid_ext`.
    pub fn remove_sections_ext(&mut self, tid: Tid, tid_ext: u16) {
        self.schedule.remove_sections(tid, Some(tid_ext));
    }

    pub fn remove_all(&mut self) {
        self.schedule.remove_all();
    }

    /// Empties the packetizer. An unfinished section is lost.
    pub fn reset(&mut self) {
        self.schedule.remove_all();
        self.packetizer.reset();
    }

    pub fn bitrate(&self) -> BitRate {
        self.schedule.bitrate
    }

    /// Sets the bitrate of the PID, used to convert repetition rates into
    /// packet distances. Zero means unknown: all sections become unscheduled.
    pub fn set_bitrate(&mut self, bitrate: BitRate) {
        self.sync_packet_count();
        self.schedule.set_bitrate(bitrate);
    }

    pub fn stuffing_policy(&self) -> StuffingPolicy {
        self.schedule.stuffing
    }

    pub fn set_stuffing_policy(&mut self, stuffing: StuffingPolicy) {
        self.schedule.stuffing = stuffing;
    }

    /// Builds the next packet, see [`Packetizer::next_packet`].
    pub fn next_packet(&mut self) -> (TsPacket, bool) {
        self.sync_packet_count();
        self.packetizer.next_packet(&mut self.schedule)
    }

    /// Selects the next section to send, as the packetizer does.
    pub fn provide_section(&mut self, counter: SectionCounter) -> Option<SectionPtr> {
        self.sync_packet_count();
        self.schedule.provide_section(counter)
    }

    /// True when the packetizer must stuff before the next section.
    pub fn do_stuffing(&mut self) -> bool {
        self.schedule.do_stuffing()
    }

    /// True when the last packet ended the last section of a cycle.
    pub fn at_cycle_boundary(&self) -> bool {
        self.packetizer.at_section_boundary()
            && self
                .schedule
                .cycle_end
                .is_some_and(|end| end + 1 == self.packetizer.section_count())
    }

    pub fn at_section_boundary(&self) -> bool {
        self.packetizer.at_section_boundary()
    }

    pub fn pid(&self) -> Pid {
        self.packetizer.pid()
    }

    pub fn set_pid(&mut self, pid: Pid) {
        self.packetizer.set_pid(pid);
    }

    pub fn next_continuity_counter(&self) -> u8 {
        self.packetizer.next_continuity_counter()
    }

    pub fn set_next_continuity_counter(&mut self, cc: u8) {
        self.packetizer.set_next_continuity_counter(cc);
    }

    /// Number of packets generated so far.
    pub fn packet_count(&self) -> PacketCounter {
        self.packetizer.packet_count()
    }

    /// Number of sections completely packetized so far.
    pub fn section_count(&self) -> SectionCounter {
        self.packetizer.section_count()
    }

    /// Number of sections currently held.
    pub fn stored_section_count(&self) -> SectionCounter {
        self.schedule.section_count
    }

    /// Sum of the packet counts of all scheduled sections.
    pub fn scheduled_packets(&self) -> PacketCounter {
        self.schedule.sched_packets
    }

    pub fn current_cycle(&self) -> SectionCounter {
        self.schedule.current_cycle
    }

    /// Number of sections not yet sent in the current cycle.
    pub fn remaining_in_cycle(&self) -> SectionCounter {
        self.schedule.remain_in_cycle
    }

    /// Scheduled sections with their due packet, in schedule order.
    pub fn scheduled_sections(&self) -> impl Iterator<Item = (&SectionPtr, PacketCounter)> {
        self.schedule.sched.iter().map(|d| (&d.section, d.due_packet))
    }

    /// Unscheduled sections in round-robin order.
    pub fn unscheduled_sections(&self) -> impl Iterator<Item = &SectionPtr> {
        self.schedule.other.iter().map(|d| &d.section)
    }
}

impl fmt::Display for CyclingPacketizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.schedule;
        write!(f, "{}", self.packetizer)?;
        writeln!(f, "  Stuffing policy: {:?}", s.stuffing)?;
        writeln!(f, "  Bitrate: {} b/s", s.bitrate)?;
        writeln!(f, "  Current cycle: {}", s.current_cycle)?;
        writeln!(f, "  Remaining sections in cycle: {}", s.remain_in_cycle)?;
        match s.cycle_end {
            Some(end) => writeln!(f, "  Section cycle end: {}", end)?,
            None => writeln!(f, "  Section cycle end: undefined")?,
        }
        writeln!(f, "  Stored sections: {}", s.section_count)?;
        writeln!(f, "  Scheduled sections: {}", s.sched.len())?;
        writeln!(f, "  Scheduled packets max: {}", s.sched_packets)?;
        for desc in &s.sched {
            write!(f, "{}", desc)?;
        }
        writeln!(f, "  Unscheduled sections: {}", s.other.len())?;
        for desc in &s.other {
            write!(f, "{}", desc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ts::section::Section;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    // 10 packets per second
    const BITRATE: BitRate = (TS_PACKET_SIZE * 8 * 10) as BitRate;

    fn section(tid: Tid, payload_size: usize) -> SectionPtr {
        Arc::new(Section::new_short(tid, true, &vec![tid; payload_size]))
    }

    fn long_section(tid: Tid, tid_ext: u16) -> SectionPtr {
        Arc::new(Section::new_long(tid, true, tid_ext, 0, true, 0, 0, &[1, 2, 3]))
    }

    #[test]
    fn test_add_section_lists() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Always, BITRATE);
        pzer.add_section(section(0x40, 10), 0);
        pzer.add_section(section(0x41, 200), 1000);
        pzer.add_section(section(0x42, 10), 250);
        pzer.add_section(Arc::new(Section::invalid()), 250);

        assert_eq!(pzer.stored_section_count(), 3);
        assert_eq!(pzer.remaining_in_cycle(), 3);
        assert_eq!(pzer.scheduled_packets(), 3);
        let due: Vec<(Tid, PacketCounter)> =
            pzer.scheduled_sections().map(|(s, due)| (s.table_id(), due)).collect();
        assert_eq!(due, vec![(0x41, 0), (0x42, 0)]);
        assert_eq!(pzer.unscheduled_sections().count(), 1);
    }

    #[test]
    fn test_unknown_bitrate_makes_everything_unscheduled() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Always, 0);
        pzer.add_section(section(0x41, 10), 1000);
        assert_eq!(pzer.scheduled_sections().count(), 0);
        assert_eq!(pzer.scheduled_packets(), 0);

        pzer.set_bitrate(BITRATE);
        assert_eq!(pzer.scheduled_sections().count(), 1);
        assert_eq!(pzer.scheduled_packets(), 1);

        pzer.set_bitrate(0);
        assert_eq!(pzer.scheduled_sections().count(), 0);
        assert_eq!(pzer.unscheduled_sections().count(), 1);
        assert_eq!(pzer.scheduled_packets(), 0);
    }

    #[test]
    fn test_bitrate_change_recomputes_due_packets() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Always, BITRATE);
        pzer.add_section(section(0x41, 10), 1000);
        pzer.add_section(section(0x42, 10), 500);
        // Both sent once, at packets 0 and 1.
        pzer.next_packet();
        pzer.next_packet();

        pzer.set_bitrate(BITRATE * 2);
        let due: Vec<(Tid, PacketCounter)> =
            pzer.scheduled_sections().map(|(s, due)| (s.table_id(), due)).collect();
        assert_eq!(due, vec![(0x42, 1 + 10), (0x41, 20)]);
    }

    #[test]
    fn test_remove_sections_by_extension() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Always, BITRATE);
        pzer.add_section(long_section(0x42, 1), 100);
        pzer.add_section(long_section(0x42, 2), 0);
        pzer.add_section(long_section(0x46, 1), 0);

        pzer.remove_sections_ext(0x42, 2);
        assert_eq!(pzer.stored_section_count(), 2);
        assert_eq!(pzer.scheduled_packets(), 1);

        pzer.remove_sections(0x42);
        assert_eq!(pzer.stored_section_count(), 1);
        assert_eq!(pzer.scheduled_packets(), 0);
        assert_eq!(pzer.remaining_in_cycle(), 1);
    }

    #[test]
    fn test_removal_after_send_keeps_cycle_count() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Always, 0);
        pzer.add_section(section(0x40, 10), 0);
        pzer.add_section(section(0x41, 10), 0);
        pzer.add_section(section(0x42, 10), 0);
        pzer.next_packet(); // sends 0x40
        assert_eq!(pzer.remaining_in_cycle(), 2);

        // Already sent in this cycle: remaining count unchanged.
        pzer.remove_sections(0x40);
        assert_eq!(pzer.remaining_in_cycle(), 2);
        // Not sent yet: one less to wait for.
        pzer.remove_sections(0x41);
        assert_eq!(pzer.remaining_in_cycle(), 1);

        pzer.next_packet(); // sends 0x42, ends the cycle
        assert!(pzer.at_cycle_boundary());
        assert_eq!(pzer.current_cycle(), 2);
        assert_eq!(pzer.remaining_in_cycle(), 1);
    }

    #[test]
    fn test_do_stuffing_policies() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Never, 0);
        assert!(pzer.do_stuffing());

        pzer.add_section(section(0x40, 10), 0);
        pzer.add_section(section(0x41, 10), 0);
        assert!(!pzer.do_stuffing());

        pzer.set_stuffing_policy(StuffingPolicy::Always);
        assert!(pzer.do_stuffing());

        pzer.set_stuffing_policy(StuffingPolicy::AtEnd);
        // Nothing sent yet: the next section starts a cycle.
        assert!(pzer.do_stuffing());
        pzer.provide_section(0);
        assert!(!pzer.do_stuffing());
        pzer.provide_section(1);
        assert!(pzer.do_stuffing());
    }

    #[test]
    fn test_never_stuffing_packs_sections() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Never, 0);
        pzer.add_section(section(0x40, 10), 0);
        pzer.add_section(section(0x41, 10), 0);

        let (pkt, real) = pzer.next_packet();
        assert!(real);
        // The packet is filled with the two sections, repeatedly.
        assert_eq!(pkt.b[5], 0x40);
        assert_eq!(pkt.b[5 + 13], 0x41);
        assert_eq!(pkt.b[5 + 26], 0x40);
        assert!(!pzer.at_section_boundary());
    }

    #[test]
    fn test_reset() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::Never, BITRATE);
        pzer.add_section(section(0x40, 500), 100);
        pzer.next_packet();
        pzer.reset();
        assert_eq!(pzer.stored_section_count(), 0);
        assert_eq!(pzer.scheduled_packets(), 0);
        assert_eq!(pzer.packet_count(), 0);
        assert!(pzer.at_section_boundary());
        let (pkt, real) = pzer.next_packet();
        assert!(!real);
        assert!(pkt.is_null());
    }

    #[test]
    fn test_display() {
        let mut pzer = CyclingPacketizer::new(0x100, StuffingPolicy::AtEnd, BITRATE);
        pzer.add_section(section(0x40, 10), 100);
        let text = pzer.to_string();
        assert!(text.contains("Stored sections: 1"));
        assert!(text.contains("Section cycle end: undefined"));
        assert!(text.contains("Repetition rate: 100 ms"));
    }
}
