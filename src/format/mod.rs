//! Container formats.
//!
//! Only MPEG transport streams are supported, see [`ts`].

pub mod ts;

pub use self::ts::{CyclingPacketizer, Packetizer, SectionDemux, TablePlugin};
