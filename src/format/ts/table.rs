use super::section::{Etid, Section, SectionPtr, ShareMode};
use super::types::*;
use std::sync::Arc;

/// All sections of one table, indexed by section number.
///
/// Slots are `None` until the corresponding section is added. A table is
/// valid when every slot is filled and all sections agree on table id,
/// table id extension and version.
#[derive(Debug, Clone, Default)]
pub struct BinaryTable {
    sections: Vec<Option<SectionPtr>>,
    missing: usize,
}

impl BinaryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from a list of sections.
    pub fn from_sections<I>(sections: I) -> Self
    where
        I: IntoIterator<Item = SectionPtr>,
    {
        let mut table = Self::new();
        for section in sections {
            table.add_section(section);
        }
        table
    }

    /// Adds a section at the slot given by its section number.
    /// Returns false when the section is invalid or inconsistent with the
    /// sections already in the table.
    pub fn add_section(&mut self, section: SectionPtr) -> bool {
        if !section.is_valid() {
            return false;
        }
        if let Some(first) = self.first() {
            if first.etid() != section.etid() || first.version() != section.version() {
                return false;
            }
        }

        let index = section.section_number() as usize;
        let needed = (section.last_section_number() as usize + 1).max(index + 1);
        if self.sections.len() < needed {
            self.missing += needed - self.sections.len();
            self.sections.resize(needed, None);
        }
        if self.sections[index].is_none() {
            self.missing -= 1;
        }
        self.sections[index] = Some(section);
        true
    }

    /// Removes the empty slots and renumbers the sections, making the
    /// table valid if it holds at least one section.
    pub fn pack_sections(&mut self) {
        let kept: Vec<SectionPtr> = self.sections.drain(..).flatten().collect();
        let last = kept.len().saturating_sub(1) as u8;
        self.missing = 0;
        self.sections = kept
            .into_iter()
            .enumerate()
            .map(|(i, mut section)| {
                if section.section_number() != i as u8 || section.last_section_number() != last {
                    let s = Arc::make_mut(&mut section);
                    s.set_section_number(i as u8, false);
                    s.set_last_section_number(last, true);
                }
                Some(section)
            })
            .collect();
    }

    pub fn is_valid(&self) -> bool {
        !self.sections.is_empty() && self.missing == 0
    }

    pub fn clear(&mut self) {
        self.sections.clear();
        self.missing = 0;
    }

    fn first(&self) -> Option<&SectionPtr> {
        self.sections.iter().flatten().next()
    }

    pub fn table_id(&self) -> Tid {
        self.first().map_or(TID_NULL, |s| s.table_id())
    }

    pub fn table_id_extension(&self) -> u16 {
        self.first().map_or(0, |s| s.table_id_extension())
    }

    pub fn etid(&self) -> Etid {
        self.first().map_or(Etid::short(TID_NULL), |s| s.etid())
    }

    pub fn version(&self) -> u8 {
        self.first().map_or(0, |s| s.version())
    }

    pub fn is_short_section(&self) -> bool {
        self.first().is_some_and(|s| s.is_short_section())
    }

    pub fn source_pid(&self) -> Pid {
        self.first().map_or(PID_NULL, |s| s.source_pid())
    }

    /// Sets the version of all sections, recomputing their CRC32.
    /// Shared sections are duplicated first.
    pub fn set_version(&mut self, version: u8) {
        for section in self.sections.iter_mut().flatten() {
            Arc::make_mut(section).set_version(version, true);
        }
    }

    /// Number of slots, including missing sections.
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section_at(&self, index: usize) -> Option<&SectionPtr> {
        self.sections.get(index).and_then(Option::as_ref)
    }

    /// Present sections in section number order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionPtr> {
        self.sections.iter().flatten()
    }

    pub fn total_size(&self) -> usize {
        self.sections().map(|s| s.size()).sum()
    }

    /// Minimum number of packets to transport the table.
    pub fn packet_count(&self, pack: bool) -> PacketCounter {
        Section::packet_count_of(self.sections(), pack)
    }

    /// Duplicates the table, sharing or copying the sections.
    pub fn duplicate(&self, mode: ShareMode) -> Self {
        match mode {
            ShareMode::Share => self.clone(),
            ShareMode::Copy => Self {
                sections: self
                    .sections
                    .iter()
                    .map(|s| s.as_ref().map(|s| Arc::new(s.duplicate(ShareMode::Copy))))
                    .collect(),
                missing: self.missing,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sdt_section(number: u8, last: u8, version: u8) -> SectionPtr {
        Arc::new(Section::new_long(
            TID_SDT_ACT,
            true,
            0x0010,
            version,
            true,
            number,
            last,
            &[0x00, 0x01, 0xFF, number],
        ))
    }

    #[test]
    fn test_assemble_out_of_order() {
        let mut table = BinaryTable::new();
        assert!(!table.is_valid());
        assert!(table.add_section(sdt_section(2, 2, 1)));
        assert!(table.add_section(sdt_section(0, 2, 1)));
        assert!(!table.is_valid());
        assert!(table.add_section(sdt_section(1, 2, 1)));
        assert!(table.is_valid());
        assert_eq!(table.section_count(), 3);
        assert_eq!(table.table_id(), TID_SDT_ACT);
        assert_eq!(table.table_id_extension(), 0x0010);
        assert!(!table.is_short_section());
        let numbers: Vec<u8> = table.sections().map(|s| s.section_number()).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[test]
    fn test_reject_inconsistent_section() {
        let mut table = BinaryTable::from_sections(vec![sdt_section(0, 1, 1)]);
        assert!(!table.add_section(sdt_section(1, 1, 2)));
        assert!(!table.add_section(Arc::new(Section::invalid())));
        assert!(!table.is_valid());
    }

    #[test]
    fn test_pack_sections() {
        let mut table = BinaryTable::from_sections(vec![sdt_section(0, 3, 1), sdt_section(2, 3, 1)]);
        assert!(!table.is_valid());
        table.pack_sections();
        assert!(table.is_valid());
        assert_eq!(table.section_count(), 2);
        let second = table.section_at(1).unwrap();
        assert_eq!(second.section_number(), 1);
        assert_eq!(second.last_section_number(), 1);
        assert_eq!(second.payload()[3], 2);
    }

    #[test]
    fn test_set_version_copies_shared_sections() {
        let shared = sdt_section(0, 0, 4);
        let mut table = BinaryTable::from_sections(vec![shared.clone()]);
        table.set_version(5);
        assert_eq!(table.version(), 5);
        assert_eq!(shared.version(), 4);
    }
}
