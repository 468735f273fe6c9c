//! # MPEG Transport Stream (TS) Sections
//!
//! This module carries PSI/SI sections over MPEG transport streams:
//!
//! - TS packet parsing and generation
//! - Sections and tables, with MPEG-2 CRC32 validation
//! - Packetization of sections on a PID
//! - Cyclic scheduling of sections with repetition rates
//! - Section demultiplexing and table reassembly
//! - Table plugins: find, modify, create and reinsert a table in a stream
//!
//! ## Core Features
//!
//! - **Packetizer**: slices sections into 188-byte packets, with pointer
//!   fields, continuity counters and stuffing
//! - **CyclingPacketizer**: repeats a set of sections, each one at its own
//!   rate, without starving the sections that have no rate
//! - **SectionDemux**: rebuilds sections and complete tables from packets
//! - **TablePlugin**: replaces a table in a stream by a modified version
//!
//! ## Example Usage
//!
//! ### Carousel of two tables
//!
//! ```rust
//! use std::sync::Arc;
//! use tscarousel::format::ts::{
//!     CyclingPacketizer, Section, SectionDemux, StuffingPolicy, PID_SDT, TID_PAT, TID_SDT_ACT,
//! };
//!
//! # fn main() {
//! // 1 Mb/s on the PID: the SDT is due every 66 packets.
//! let mut pzer = CyclingPacketizer::new(PID_SDT, StuffingPolicy::AtEnd, 1_000_000);
//! let sdt = Section::new_long(TID_SDT_ACT, false, 0x0001, 0, true, 0, 0, &[0xFF; 8]);
//! pzer.add_section(Arc::new(sdt), 100);
//! pzer.add_section(Arc::new(Section::new_short(TID_PAT, false, &[0; 4])), 0);
//!
//! let mut demux = SectionDemux::default();
//! let mut tables = Vec::new();
//! for _ in 0..10 {
//!     let (packet, _) = pzer.next_packet();
//!     tables.extend(demux.feed_packet(&packet));
//! }
//! assert!(tables.iter().any(|t| t.table_id() == TID_SDT_ACT));
//! # }
//! ```

/// Cyclic scheduling of sections
pub mod cycling;

/// Section filtering and table reassembly
pub mod demux;

/// Fixed-size TS packet
pub mod packet;

/// Section to packet slicing
pub mod packetizer;

/// Low-level TS packet parsing utilities
pub mod parser;

/// Table modification and insertion in a stream
pub mod plugin;

/// PSI/SI sections
pub mod section;

/// Sets of sections forming a table
pub mod table;

/// Core TS types and constants
pub mod types;


// Re-export commonly used types and constants
pub use cycling::{CyclingPacketizer, StuffingPolicy};
pub use demux::{all_pids, single_pid, DemuxStatus, PidSet, SectionDemux};
pub use packet::TsPacket;
pub use packetizer::{Packetizer, SectionProvider};
pub use parser::TSPacketParser;
pub use plugin::{PluginStatus, TableDisposition, TableHandler, TablePlugin};
pub use section::{Etid, Section, SectionPtr, ShareMode};
pub use table::BinaryTable;
pub use types::*;
