use super::cycling::{CyclingPacketizer, StuffingPolicy};
use super::demux::{single_pid, SectionDemux};
use super::packet::TsPacket;
use super::parser::TSPacketParser;
use super::section::ShareMode;
use super::table::BinaryTable;
use super::types::*;
use crate::config::TablePluginConfig;
use crate::error::{Result, TsError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// What to do with a table after [`TableHandler::modify_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDisposition {
    /// The table is the one the plugin looks for: stop waiting to create
    /// it and apply the version options.
    pub is_target: bool,
    /// Replace the sections of this table in the output PID.
    pub reinsert: bool,
    /// Stop processing the stream.
    pub abort: bool,
}

impl Default for TableDisposition {
    fn default() -> Self {
        Self {
            is_target: true,
            reinsert: true,
            abort: false,
        }
    }
}

/// Table specific part of a [`TablePlugin`].
pub trait TableHandler {
    /// Modifies a table found on the PID, or a newly created one.
    fn modify_table(&mut self, table: &mut BinaryTable) -> TableDisposition;

    /// Builds an empty table when none was found in time.
    fn create_new_table(&mut self) -> BinaryTable;
}

/// Result of processing one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Ok,
    /// The handler requested the end of processing.
    End,
}

/// Finds a table on a PID, modifies it and reinserts it in place.
///
/// Packets of the PID are replaced by the packetization of the modified
/// table. When the table is missing and creation is configured, an empty
/// table is created after a delay and inserted in place of null packets.
pub struct TablePlugin<H: TableHandler> {
    table_name: String,
    default_bitrate: BitRate,
    pid: Pid,
    handler: H,
    abort: bool,
    /// Target table found or created
    found: bool,
    /// Current packet index, starting at 1
    pkt_current: PacketCounter,
    /// Packet index at which a missing table is created
    pkt_create: PacketCounter,
    /// Next packet index at which a null packet is replaced
    pkt_insert: PacketCounter,
    create_after_ms: MilliSecond,
    bitrate: BitRate,
    inter_pkt: PacketCounter,
    incr_version: bool,
    new_version: Option<u8>,
    demux: SectionDemux,
    pzer: CyclingPacketizer,
}

impl<H: TableHandler> TablePlugin<H> {
    pub fn new(table_name: impl Into<String>, pid: Pid, default_bitrate: BitRate, handler: H) -> Self {
        Self {
            table_name: table_name.into(),
            default_bitrate,
            pid,
            handler,
            abort: false,
            found: false,
            pkt_current: 0,
            pkt_create: 0,
            pkt_insert: 0,
            create_after_ms: 0,
            bitrate: default_bitrate,
            inter_pkt: 0,
            incr_version: false,
            new_version: None,
            demux: SectionDemux::new(single_pid(pid)),
            pzer: CyclingPacketizer::new(pid, StuffingPolicy::Never, 0),
        }
    }

    /// Applies the options and resets the processing state.
    pub fn start(&mut self, config: &TablePluginConfig) -> Result<()> {
        config.validate()?;

        self.incr_version = config.increment_version;
        self.create_after_ms = config.create_after();
        self.bitrate = config.bitrate.unwrap_or(self.default_bitrate);
        self.inter_pkt = config.inter_packet.unwrap_or(0);
        self.new_version = config.new_version;

        self.reset_pid_state();
        self.abort = false;
        self.found = false;
        self.pkt_current = 0;
        self.pkt_create = 0;
        self.pkt_insert = 0;
        Ok(())
    }

    fn reset_pid_state(&mut self) {
        self.demux.reset();
        self.demux.set_pid_filter(single_pid(self.pid));
        self.pzer.reset();
        self.pzer.set_pid(self.pid);
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Changes the PID of the table. Pending sections are dropped.
    pub fn set_pid(&mut self, pid: Pid) {
        if pid != self.pid {
            self.pid = pid;
            self.reset_pid_state();
        }
    }

    /// True once the target table was found or created.
    pub fn found(&self) -> bool {
        self.found
    }

    /// Number of packets processed since start.
    pub fn packet_count(&self) -> PacketCounter {
        self.pkt_current
    }

    pub fn packetizer(&self) -> &CyclingPacketizer {
        &self.pzer
    }

    pub fn demux(&self) -> &SectionDemux {
        &self.demux
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Modifies a table through the handler and places it in the packetizer.
    pub fn handle_table(&mut self, input: &BinaryTable) {
        let mut table = input.duplicate(ShareMode::Share);
        let old_version = table.version();

        let disposition = self.handler.modify_table(&mut table);
        self.abort |= disposition.abort;

        if disposition.is_target {
            self.found = true;
            self.pkt_insert = 0;

            if self.incr_version {
                table.set_version((table.version() + 1) & 0x1F);
            } else if let Some(version) = self.new_version {
                table.set_version(version);
            }
        }

        if disposition.reinsert {
            if disposition.is_target {
                log::info!("{} version {} modified", self.table_name, old_version);
            }
            if table.is_short_section() {
                self.pzer.remove_sections(table.table_id());
            } else {
                self.pzer
                    .remove_sections_ext(table.table_id(), table.table_id_extension());
            }
            self.pzer.add_table(&table, 0);
        }
    }

    /// Processes one packet of the stream, possibly replacing it.
    ///
    /// `ts_bitrate` is the bitrate of the whole stream, zero when unknown.
    pub fn process_packet(&mut self, pkt: &mut TsPacket, ts_bitrate: BitRate) -> Result<PluginStatus> {
        let pid = pkt.pid();
        self.pkt_current += 1;

        for table in self.demux.feed_packet(pkt) {
            self.handle_table(&table);
        }

        // Computed once, as soon as the bitrate is known.
        if !self.found && self.create_after_ms > 0 && self.pkt_create == 0 {
            self.pkt_create = packet_distance(ts_bitrate, self.create_after_ms);
            log::debug!(
                "will create {} after {} packets, {} ms (bitrate: {} b/s)",
                self.table_name,
                self.pkt_create,
                self.create_after_ms,
                ts_bitrate
            );
        }

        if !self.found && self.pkt_create > 0 && self.pkt_current >= self.pkt_create {
            let table = self.handler.create_new_table();
            self.handle_table(&table);
            // First insertion as soon as possible.
            self.pkt_insert = self.pkt_current;
        }

        if pid == PID_NULL && self.pkt_insert > 0 && self.pkt_current >= self.pkt_insert {
            *pkt = self.pzer.next_packet().0;
            if self.inter_pkt != 0 {
                self.pkt_insert += self.inter_pkt;
            } else {
                if self.bitrate == 0 || ts_bitrate < self.bitrate {
                    log::error!(
                        "input bitrate unknown or too low, specify an inter-packet interval instead of a bitrate"
                    );
                    return Err(TsError::BitrateUnderflow {
                        required: self.bitrate,
                        actual: ts_bitrate,
                    });
                }
                self.pkt_insert += ts_bitrate / self.bitrate;
            }
        } else if pid == self.pid {
            *pkt = self.pzer.next_packet().0;
        }

        Ok(if self.abort {
            PluginStatus::End
        } else {
            PluginStatus::Ok
        })
    }

    /// Processes a whole stream until end of input or until the handler
    /// requests the end. Returns the number of packets written.
    ///
    /// The packet on which the end is requested is not written.
    pub async fn process_stream<R, W>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        ts_bitrate: BitRate,
    ) -> Result<PacketCounter>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut parser = TSPacketParser::new();
        let mut buf = vec![0u8; TS_PACKET_SIZE * 64];
        let mut written = 0;

        'stream: loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            parser.push(&buf[..n]);
            while let Some(mut pkt) = parser.next_packet() {
                if self.process_packet(&mut pkt, ts_bitrate)? == PluginStatus::End {
                    break 'stream;
                }
                writer.write_all(&pkt.b).await?;
                written += 1;
            }
        }

        if parser.pending() > 0 {
            log::warn!("dropping {} trailing bytes, not a full packet", parser.pending());
        }
        writer.flush().await?;
        Ok(written)
    }
}
