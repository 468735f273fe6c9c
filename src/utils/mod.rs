//! # Utility Functions and Types
//!
//! Common helpers used throughout the tscarousel library.
//!
//! ## CRC Calculation
//!
//! The crc module provides the MPEG-2 CRC32 used by long PSI/SI sections:
//!
//! ```rust
//! use tscarousel::utils::Crc32Mpeg2;
//!
//! # fn main() {
//! let data = b"Hello, world!";
//! let crc = Crc32Mpeg2::new().calculate(data);
//! println!("CRC32: {:08x}", crc);
//! # }
//! ```

/// CRC calculation implementations
pub mod crc;

// Re-export commonly used types
pub use crc::{Crc32Mpeg2, CrcValidation};
