#![doc(html_root_url = "https://docs.rs/tscarousel/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tscarousel - MPEG-TS Section Carousel
//!
//! `tscarousel` carries PSI/SI sections (PAT, PMT, SDT, NIT, ...) over MPEG
//! transport streams. It slices sections into packets, repeats them on a
//! PID at configurable rates, and finds, modifies or creates tables in a
//! live stream.
//!
//! ## Features
//!
//! ### Sections and Tables
//! - Short and long sections with MPEG-2 CRC32 checking
//! - Shared, copy-on-write section handles
//! - Tables assembled from sections, with version updates
//!
//! ### Packetization
//! - Section slicing into 188-byte packets with pointer fields
//! - Cyclic scheduling with per-section repetition rates
//! - Stuffing policies and cycle boundary detection
//!
//! ### Stream Processing
//! - Section demultiplexing with continuity and CRC checks
//! - Table plugin replacing a table in a stream, or creating it when missing
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tscarousel = "0.1.0"
//! ```
//!
//! ### Repeating a Section
//!
//! ```rust
//! use std::sync::Arc;
//! use tscarousel::format::ts::{CyclingPacketizer, Section, StuffingPolicy};
//!
//! # fn main() {
//! let mut pzer = CyclingPacketizer::new(0x0100, StuffingPolicy::Always, 1_000_000);
//! pzer.add_section(Arc::new(Section::new_short(0x42, true, &[0u8; 10])), 100);
//!
//! let packets: Vec<_> = (0..100).map(|_| pzer.next_packet()).collect();
//! let sent = packets.iter().filter(|(_, real)| *real).count();
//! assert_eq!(sent, 2);
//! # }
//! ```
//!
//! ### Modifying a Table in a Stream
//!
//! ```rust,no_run
//! use tscarousel::config::TablePluginConfig;
//! use tscarousel::format::ts::{BinaryTable, TableDisposition, TableHandler, TablePlugin, PID_SDT};
//!
//! struct Sdt;
//!
//! impl TableHandler for Sdt {
//!     fn modify_table(&mut self, _table: &mut BinaryTable) -> TableDisposition {
//!         TableDisposition::default()
//!     }
//!
//!     fn create_new_table(&mut self) -> BinaryTable {
//!         BinaryTable::new()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut plugin = TablePlugin::new("SDT", PID_SDT, 3000, Sdt);
//!     plugin.start(&TablePluginConfig::load()?.with_increment_version(true))?;
//!
//!     let mut input = tokio::fs::File::open("input.ts").await?;
//!     let mut output = tokio::fs::File::create("output.ts").await?;
//!     plugin.process_stream(&mut input, &mut output, 20_000_000).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `format`: Transport stream implementation
//!   - Packets, sections and tables
//!   - Packetizer and cycling packetizer
//!   - Section demux
//!   - Table plugin and async stream driver
//!
//! - `config`: Table plugin options
//!   - Defaults, configuration file and environment variables
//!   - Validation
//!
//! - `error`: Error handling types and utilities
//!   - Custom error types for different failure scenarios
//!   - Result type alias for convenience
//!
//! - `utils`: Common utilities and helper functions
//!   - CRC calculations
//!
/// Error types and utilities
pub mod error;

/// Media format implementations (TS sections, packetizers, plugins)
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{Result, TsError};
