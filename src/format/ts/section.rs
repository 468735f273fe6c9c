use super::types::*;
use crate::utils::{Crc32Mpeg2, CrcValidation};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

/// Shared handle on an immutable section.
///
/// Tables, packetizers and demuxers hold sections through this handle.
/// A section is never modified through a shared handle: use
/// [`Arc::make_mut`], which duplicates the section when it is shared.
pub type SectionPtr = Arc<Section>;

/// Whether binary content is referenced or duplicated by a new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// Reference the same binary content.
    Share,
    /// Duplicate the binary content.
    Copy,
}

/// Table id plus table id extension for long sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Etid {
    pub tid: Tid,
    pub tid_ext: Option<u16>,
}

impl Etid {
    pub fn short(tid: Tid) -> Self {
        Self { tid, tid_ext: None }
    }

    pub fn long(tid: Tid, tid_ext: u16) -> Self {
        Self {
            tid,
            tid_ext: Some(tid_ext),
        }
    }

    pub fn is_long_section(&self) -> bool {
        self.tid_ext.is_some()
    }
}

impl fmt::Display for Etid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tid_ext {
            Some(ext) => write!(f, "0x{:02X}/0x{:04X}", self.tid, ext),
            None => write!(f, "0x{:02X}", self.tid),
        }
    }
}

/// One MPEG/DVB section: header, payload and, for long sections, CRC32.
///
/// A section built from malformed content is permanently invalid. All
/// accessors of an invalid section return sentinel values: table id 0xFF,
/// zero for numeric header fields, empty content and payload.
#[derive(Clone)]
pub struct Section {
    is_valid: bool,
    source_pid: Pid,
    first_pkt: PacketCounter,
    last_pkt: PacketCounter,
    data: Bytes,
}

impl Section {
    /// Builds a section from its full binary content.
    ///
    /// The content is referenced, not copied. Use [`Section::from_slice`]
    /// to build from borrowed data.
    pub fn new(content: impl Into<Bytes>, source_pid: Pid, crc_op: CrcValidation) -> Self {
        let mut section = Self {
            is_valid: false,
            source_pid,
            first_pkt: 0,
            last_pkt: 0,
            data: content.into(),
        };
        section.initialize(crc_op);
        section
    }

    /// Builds a section from a copy of `content`.
    pub fn from_slice(content: &[u8], source_pid: Pid, crc_op: CrcValidation) -> Self {
        Self::new(Bytes::copy_from_slice(content), source_pid, crc_op)
    }

    /// Builds a short section from its payload.
    pub fn new_short(tid: Tid, is_private_section: bool, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(SHORT_SECTION_HEADER_SIZE + payload.len());
        buf.put_u8(tid);
        buf.put_u16(
            (if is_private_section { 0x4000 } else { 0x0000 })
                | 0x3000
                | (payload.len() as u16 & 0x0FFF),
        );
        buf.put_slice(payload);
        if payload.len() > MAX_PRIVATE_SECTION_SIZE - SHORT_SECTION_HEADER_SIZE {
            return Self::invalid();
        }
        Self::new(buf.freeze(), PID_NULL, CrcValidation::Ignore)
    }

    /// Builds a long section from its payload. The CRC32 is computed.
    #[allow(clippy::too_many_arguments)]
    pub fn new_long(
        tid: Tid,
        is_private_section: bool,
        tid_ext: u16,
        version: u8,
        is_current: bool,
        section_number: u8,
        last_section_number: u8,
        payload: &[u8],
    ) -> Self {
        if payload.len() > MAX_PRIVATE_SECTION_SIZE - MIN_LONG_SECTION_SIZE {
            return Self::invalid();
        }
        let length = LONG_SECTION_HEADER_SIZE - SHORT_SECTION_HEADER_SIZE
            + payload.len()
            + SECTION_CRC32_SIZE;
        let mut buf = BytesMut::with_capacity(SHORT_SECTION_HEADER_SIZE + length);
        buf.put_u8(tid);
        buf.put_u16(
            0x8000
                | (if is_private_section { 0x4000 } else { 0x0000 })
                | 0x3000
                | (length as u16 & 0x0FFF),
        );
        buf.put_u16(tid_ext);
        buf.put_u8(0xC0 | ((version & 0x1F) << 1) | u8::from(is_current));
        buf.put_u8(section_number);
        buf.put_u8(last_section_number);
        buf.put_slice(payload);
        buf.put_u32(0);
        Self::new(buf.freeze(), PID_NULL, CrcValidation::Compute)
    }

    /// An invalid section.
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            source_pid: PID_NULL,
            first_pkt: 0,
            last_pkt: 0,
            data: Bytes::new(),
        }
    }

    /// Duplicates this section, sharing or copying the binary content.
    pub fn duplicate(&self, mode: ShareMode) -> Self {
        let mut other = self.clone();
        if mode == ShareMode::Copy {
            other.data = Bytes::copy_from_slice(&self.data);
        }
        other
    }

    fn initialize(&mut self, crc_op: CrcValidation) {
        let size = self.data.len();
        self.is_valid = size >= MIN_SHORT_SECTION_SIZE && Self::section_size(&self.data) == size;

        if self.is_valid && self.is_long_section() {
            match crc_op {
                CrcValidation::Ignore => {}
                CrcValidation::Check => {
                    if !Crc32Mpeg2::new().verify(&self.data) {
                        log::debug!("section 0x{:02X}: CRC32 mismatch", self.data[0]);
                        self.is_valid = false;
                    }
                }
                CrcValidation::Compute => self.recompute_crc(),
            }
        }

        if !self.is_valid {
            self.data = Bytes::new();
        }
    }

    /// Size of the first well-formed section at the start of `content`,
    /// zero when the header is malformed or the section is truncated.
    pub fn section_size(content: &[u8]) -> usize {
        if content.len() < MIN_SHORT_SECTION_SIZE {
            return 0;
        }
        let is_long = content[1] & 0x80 != 0;
        let size = ((((content[1] & 0x0F) as usize) << 8) | content[2] as usize)
            + SHORT_SECTION_HEADER_SIZE;
        if size > MAX_PRIVATE_SECTION_SIZE
            || size > content.len()
            || (is_long && size < MIN_LONG_SECTION_SIZE)
        {
            0
        } else {
            size
        }
    }

    /// Minimum number of packets needed to transport `sections`.
    ///
    /// When `pack` is false, each section is assumed to start at a packet
    /// boundary with stuffing after its last byte.
    pub fn packet_count_of<'a, I>(sections: I, pack: bool) -> PacketCounter
    where
        I: IntoIterator<Item = &'a SectionPtr>,
    {
        let valid = sections.into_iter().filter(|s| s.is_valid());
        if pack {
            let total: usize = valid.map(|s| s.size()).sum();
            if total == 0 {
                0
            } else {
                section_packet_count(total)
            }
        } else {
            valid.map(|s| s.packet_count()).sum()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn table_id(&self) -> Tid {
        if self.is_valid {
            self.data[0]
        } else {
            TID_NULL
        }
    }

    pub fn is_long_section(&self) -> bool {
        self.is_valid && self.data[1] & 0x80 != 0
    }

    pub fn is_short_section(&self) -> bool {
        self.is_valid && self.data[1] & 0x80 == 0
    }

    pub fn is_private_section(&self) -> bool {
        self.is_valid && self.data[1] & 0x40 != 0
    }

    pub fn table_id_extension(&self) -> u16 {
        if self.is_long_section() {
            u16::from_be_bytes([self.data[3], self.data[4]])
        } else {
            0
        }
    }

    pub fn version(&self) -> u8 {
        if self.is_long_section() {
            (self.data[5] >> 1) & 0x1F
        } else {
            0
        }
    }

    pub fn is_current(&self) -> bool {
        self.is_long_section() && self.data[5] & 0x01 != 0
    }

    pub fn is_next(&self) -> bool {
        self.is_long_section() && self.data[5] & 0x01 == 0
    }

    pub fn section_number(&self) -> u8 {
        if self.is_long_section() {
            self.data[6]
        } else {
            0
        }
    }

    pub fn last_section_number(&self) -> u8 {
        if self.is_long_section() {
            self.data[7]
        } else {
            0
        }
    }

    pub fn etid(&self) -> Etid {
        if self.is_long_section() {
            Etid::long(self.table_id(), self.table_id_extension())
        } else {
            Etid::short(self.table_id())
        }
    }

    pub fn source_pid(&self) -> Pid {
        self.source_pid
    }

    pub fn set_source_pid(&mut self, pid: Pid) {
        self.source_pid = pid;
    }

    /// Full binary content: header, payload and CRC32.
    pub fn content(&self) -> &[u8] {
        &self.data
    }

    /// The binary content as a shared buffer.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn header_size(&self) -> usize {
        if !self.is_valid {
            0
        } else if self.is_long_section() {
            LONG_SECTION_HEADER_SIZE
        } else {
            SHORT_SECTION_HEADER_SIZE
        }
    }

    /// Payload: after the header, before the CRC32 of long sections.
    pub fn payload(&self) -> &[u8] {
        if !self.is_valid {
            return &[];
        }
        let end = if self.is_long_section() {
            self.data.len() - SECTION_CRC32_SIZE
        } else {
            self.data.len()
        };
        &self.data[self.header_size()..end]
    }

    pub fn payload_size(&self) -> usize {
        self.payload().len()
    }

    /// Minimum number of packets required to transport this section.
    pub fn packet_count(&self) -> PacketCounter {
        section_packet_count(self.size())
    }

    /// True when the payload has at least two bytes and two distinct values.
    pub fn has_diversified_payload(&self) -> bool {
        match self.payload().split_first() {
            Some((first, rest)) => rest.iter().any(|b| b != first),
            None => false,
        }
    }

    pub fn first_packet_index(&self) -> PacketCounter {
        self.first_pkt
    }

    pub fn last_packet_index(&self) -> PacketCounter {
        self.last_pkt
    }

    pub fn set_first_packet_index(&mut self, index: PacketCounter) {
        self.first_pkt = index;
    }

    pub fn set_last_packet_index(&mut self, index: PacketCounter) {
        self.last_pkt = index;
    }

    pub fn set_table_id_extension(&mut self, tid_ext: u16, recompute_crc: bool) {
        if self.is_long_section() {
            self.modify(recompute_crc, |data| {
                data[3..5].copy_from_slice(&tid_ext.to_be_bytes());
            });
        }
    }

    pub fn set_version(&mut self, version: u8, recompute_crc: bool) {
        if self.is_long_section() {
            self.modify(recompute_crc, |data| {
                data[5] = (data[5] & 0xC1) | ((version & 0x1F) << 1);
            });
        }
    }

    pub fn set_is_current(&mut self, is_current: bool, recompute_crc: bool) {
        if self.is_long_section() {
            self.modify(recompute_crc, |data| {
                data[5] = (data[5] & 0xFE) | u8::from(is_current);
            });
        }
    }

    pub fn set_section_number(&mut self, num: u8, recompute_crc: bool) {
        if self.is_long_section() {
            self.modify(recompute_crc, |data| data[6] = num);
        }
    }

    pub fn set_last_section_number(&mut self, num: u8, recompute_crc: bool) {
        if self.is_long_section() {
            self.modify(recompute_crc, |data| data[7] = num);
        }
    }

    /// Writes one byte at `offset` in the payload. Ignored past the payload.
    pub fn set_u8(&mut self, offset: usize, value: u8, recompute_crc: bool) {
        if offset < self.payload_size() {
            let pos = self.header_size() + offset;
            self.modify(recompute_crc, |data| data[pos] = value);
        }
    }

    /// Writes a big-endian 16-bit value at `offset` in the payload.
    /// Ignored when it does not fit in the payload.
    pub fn set_u16(&mut self, offset: usize, value: u16, recompute_crc: bool) {
        if offset + 2 <= self.payload_size() {
            let pos = self.header_size() + offset;
            self.modify(recompute_crc, |data| {
                data[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
            });
        }
    }

    /// Recomputes and replaces the CRC32 of a long section.
    pub fn recompute_crc(&mut self) {
        if self.is_long_section() {
            let end = self.data.len() - SECTION_CRC32_SIZE;
            let crc = Crc32Mpeg2::new().calculate(&self.data[..end]);
            let mut buf = BytesMut::from(&self.data[..]);
            buf[end..].copy_from_slice(&crc.to_be_bytes());
            self.data = buf.freeze();
        }
    }

    // Content is immutable once shared: edit a private copy, then swap it in.
    fn modify<F: FnOnce(&mut [u8])>(&mut self, recompute_crc: bool, edit: F) {
        let mut buf = BytesMut::from(&self.data[..]);
        edit(&mut buf);
        self.data = buf.freeze();
        if recompute_crc {
            self.recompute_crc();
        }
    }
}

impl Default for Section {
    fn default() -> Self {
        Self::invalid()
    }
}

impl PartialEq for Section {
    /// Compares binary content only. Invalid sections are never equal.
    fn eq(&self, other: &Self) -> bool {
        self.is_valid && other.is_valid && self.data == other.data
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid {
            return f.write_str("Section(invalid)");
        }
        f.debug_struct("Section")
            .field("etid", &format_args!("{}", self.etid()))
            .field("version", &self.version())
            .field("section_number", &self.section_number())
            .field("last_section_number", &self.last_section_number())
            .field("size", &self.size())
            .field("source_pid", &self.source_pid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pat_section() -> Section {
        // program 1 -> PMT PID 0x0100
        Section::new_long(TID_PAT, false, 0x0001, 3, true, 0, 0, &[0x00, 0x01, 0xE1, 0x00])
    }

    #[test]
    fn test_long_section_fields() {
        let sect = pat_section();
        assert!(sect.is_valid());
        assert!(sect.is_long_section());
        assert!(!sect.is_private_section());
        assert_eq!(sect.table_id(), TID_PAT);
        assert_eq!(sect.table_id_extension(), 1);
        assert_eq!(sect.version(), 3);
        assert!(sect.is_current());
        assert_eq!(sect.size(), 16);
        assert_eq!(sect.header_size(), 8);
        assert_eq!(sect.payload(), &[0x00, 0x01, 0xE1, 0x00]);
        assert_eq!(sect.etid(), Etid::long(TID_PAT, 1));
        assert_eq!(&sect.content()[..3], &[0x00, 0xB0, 0x0D]);
        assert!(Crc32Mpeg2::new().verify(sect.content()));
    }

    #[test]
    fn test_short_section_fields() {
        let sect = Section::new_short(0x70, false, &[1, 2, 3, 4, 5]);
        assert!(sect.is_valid());
        assert!(sect.is_short_section());
        assert_eq!(sect.size(), 8);
        assert_eq!(sect.table_id_extension(), 0);
        assert_eq!(sect.version(), 0);
        assert_eq!(sect.payload(), &[1, 2, 3, 4, 5]);
        assert_eq!(sect.etid(), Etid::short(0x70));
        assert!(sect.has_diversified_payload());
    }

    #[test]
    fn test_crc_check_mode() {
        let good = pat_section();
        let mut raw = good.content().to_vec();
        assert!(Section::from_slice(&raw, PID_PAT, CrcValidation::Check).is_valid());

        raw[9] ^= 0xFF;
        let bad = Section::from_slice(&raw, PID_PAT, CrcValidation::Check);
        assert!(!bad.is_valid());
        assert_eq!(bad.table_id(), 0xFF);
        assert_eq!(bad.size(), 0);
        assert!(bad.payload().is_empty());

        // Ignore keeps it, Compute repairs it.
        assert!(Section::from_slice(&raw, PID_PAT, CrcValidation::Ignore).is_valid());
        let fixed = Section::from_slice(&raw, PID_PAT, CrcValidation::Compute);
        assert!(Crc32Mpeg2::new().verify(fixed.content()));
    }

    #[test]
    fn test_malformed_length() {
        // Length field says 20 bytes, only 5 present.
        let sect = Section::from_slice(&[0x42, 0x00, 0x14, 0x00, 0x00], PID_NULL, CrcValidation::Ignore);
        assert!(!sect.is_valid());
        assert_eq!(sect.section_number(), 0);
        assert_eq!(sect.etid(), Etid::short(0xFF));

        // Long section shorter than header + CRC.
        let sect = Section::from_slice(&[0x42, 0x80, 0x02, 0x00, 0x00], PID_NULL, CrcValidation::Ignore);
        assert!(!sect.is_valid());

        assert!(!Section::from_slice(&[0x42], PID_NULL, CrcValidation::Ignore).is_valid());
    }

    #[test]
    fn test_section_size() {
        let sect = pat_section();
        let mut buf = sect.content().to_vec();
        buf.extend_from_slice(&[0xFF; 10]);
        assert_eq!(Section::section_size(&buf), 16);
        assert_eq!(Section::section_size(&buf[..10]), 0);
        assert_eq!(Section::section_size(&[0x00, 0x00]), 0);
        assert_eq!(Section::section_size(&[0x70, 0x70, 0x00]), 3);
    }

    #[test]
    fn test_mutators_recompute_crc() {
        let mut sect = pat_section();
        sect.set_version(31, true);
        assert_eq!(sect.version(), 31);
        assert!(sect.is_current());
        assert!(Crc32Mpeg2::new().verify(sect.content()));

        sect.set_version(32 + 4, false);
        assert_eq!(sect.version(), 4);
        assert!(!Crc32Mpeg2::new().verify(sect.content()));
        sect.recompute_crc();
        assert!(Crc32Mpeg2::new().verify(sect.content()));

        sect.set_table_id_extension(0x1234, true);
        sect.set_is_current(false, true);
        sect.set_section_number(1, true);
        sect.set_last_section_number(2, true);
        sect.set_u16(2, 0xE2_00, true);
        sect.set_u8(0, 0x7F, true);
        sect.set_u8(100, 0x7F, true);
        assert_eq!(sect.table_id_extension(), 0x1234);
        assert!(sect.is_next());
        assert_eq!(sect.section_number(), 1);
        assert_eq!(sect.last_section_number(), 2);
        assert_eq!(sect.payload(), &[0x7F, 0x01, 0xE2, 0x00]);
        assert!(Crc32Mpeg2::new().verify(sect.content()));
    }

    #[test]
    fn test_short_section_ignores_long_mutators() {
        let mut sect = Section::new_short(0x70, false, &[0; 5]);
        let before = sect.clone();
        sect.set_version(5, true);
        sect.set_table_id_extension(5, true);
        assert_eq!(sect, before);
        assert!(!sect.has_diversified_payload());
    }

    #[test]
    fn test_equality_ignores_annotations() {
        let a = pat_section();
        let mut b = a.duplicate(ShareMode::Copy);
        b.set_source_pid(0x0100);
        b.set_first_packet_index(12);
        assert_eq!(a, b);
        assert_ne!(Section::invalid(), Section::invalid());

        let shared = a.duplicate(ShareMode::Share);
        assert_eq!(shared.content().as_ptr(), a.content().as_ptr());
        assert_ne!(b.content().as_ptr(), a.content().as_ptr());
    }

    #[test]
    fn test_packet_count_of() {
        let small: SectionPtr = Arc::new(Section::new_short(0x70, false, &[0; 100]));
        let list = vec![small.clone(), small.clone()];
        assert_eq!(small.packet_count(), 1);
        assert_eq!(Section::packet_count_of(&list, false), 2);
        assert_eq!(Section::packet_count_of(&list, true), 2);
        let empty: Vec<SectionPtr> = Vec::new();
        assert_eq!(Section::packet_count_of(&empty, true), 0);
    }
}
