/// CRC32 implementation specifically for MPEG-2 TS PSI sections
/// Based on ITU-T H.222.0 / ISO/IEC 13818-1
/// Polynomial: x32 + x26 + x23 + x22 + x16 + x12 + x11 + x10 + x8 + x7 + x5 + x4 + x2 + x + 1
/// Initial value: 0xFFFFFFFF, no reflection, no final xor
use crc::{Crc, CRC_32_MPEG_2};

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// How the CRC32 of a long section is processed when the section is built
/// from binary content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcValidation {
    /// Keep the CRC32 field as it is, do not check it.
    #[default]
    Ignore,
    /// Check the CRC32 field, the section becomes invalid on mismatch.
    Check,
    /// Recompute the CRC32 field from the section content.
    Compute,
}

/// MPEG-2 CRC32 calculator used for PSI/SI section validation
///
/// Thin wrapper over the `crc` crate using the `CRC_32_MPEG_2` algorithm
/// (ITU-T H.222.0 annex B). The checksum of a complete long section,
/// including its trailing CRC32 field, is always zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Mpeg2;

impl Crc32Mpeg2 {
    /// Creates a new CRC32 calculator
    pub fn new() -> Self {
        Self
    }

    /// Calculates the CRC32 checksum for the given data using the MPEG-2 algorithm
    ///
    /// # Examples
    ///
    /// ```
    /// use tscarousel::utils::Crc32Mpeg2;
    ///
    /// let crc = Crc32Mpeg2::new();
    /// assert_eq!(crc.calculate(&[0x01, 0x01]), 0xD66FB816);
    /// ```
    pub fn calculate(&self, data: &[u8]) -> u32 {
        CRC_MPEG.checksum(data)
    }

    /// Checks that the last four bytes of `data` are the big-endian CRC32
    /// of everything before them.
    pub fn verify(&self, data: &[u8]) -> bool {
        if data.len() < 4 {
            return false;
        }
        let (body, tail) = data.split_at(data.len() - 4);
        let stored = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        self.calculate(body) == stored
    }
}
