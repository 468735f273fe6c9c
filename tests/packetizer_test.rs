#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::fs::File;
    use tscarousel::config::TablePluginConfig;
    use tscarousel::error::TsError;
    use tscarousel::format::ts::{
        single_pid, BinaryTable, CyclingPacketizer, Section, SectionDemux, StuffingPolicy,
        TableDisposition, TableHandler, TablePlugin, TsPacket, PID_SDT, TID_SDT_ACT,
        TS_PACKET_SIZE,
    };

    // 100 packets per second
    const TS_BITRATE: u64 = (TS_PACKET_SIZE * 8 * 100) as u64;

    struct ServiceNameHandler {
        name: Vec<u8>,
    }

    impl TableHandler for ServiceNameHandler {
        fn modify_table(&mut self, table: &mut BinaryTable) -> TableDisposition {
            let mut sections: Vec<_> = table.sections().cloned().collect();
            for section in &mut sections {
                let mut payload = section.payload().to_vec();
                payload.extend_from_slice(&self.name);
                *section = Arc::new(Section::new_long(
                    section.table_id(),
                    section.is_private_section(),
                    section.table_id_extension(),
                    section.version(),
                    section.is_current(),
                    section.section_number(),
                    section.last_section_number(),
                    &payload,
                ));
            }
            *table = BinaryTable::from_sections(sections);
            TableDisposition::default()
        }

        fn create_new_table(&mut self) -> BinaryTable {
            BinaryTable::from_sections(vec![Arc::new(Section::new_long(
                TID_SDT_ACT,
                true,
                0x0001,
                0,
                true,
                0,
                0,
                &[0x00, 0x01, 0xFF],
            ))])
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tscarousel_{}_{}", std::process::id(), name))
    }

    fn null_stream(count: usize) -> Vec<u8> {
        (0..count).flat_map(|_| TsPacket::NULL.b).collect()
    }

    fn demux_tables(data: &[u8]) -> Vec<BinaryTable> {
        let mut demux = SectionDemux::new(single_pid(PID_SDT));
        data.chunks(TS_PACKET_SIZE)
            .filter_map(TsPacket::from_slice)
            .flat_map(|pkt| demux.feed_packet(&pkt))
            .collect()
    }

    #[tokio::test]
    async fn test_create_table_in_file() {
        let input_path = temp_path("create_in.ts");
        let output_path = temp_path("create_out.ts");
        tokio::fs::write(&input_path, null_stream(500)).await.unwrap();

        let config = TablePluginConfig::new()
            .with_create_after(500)
            .with_bitrate(TS_BITRATE / 20);
        let handler = ServiceNameHandler {
            name: b"carousel".to_vec(),
        };
        let mut plugin = TablePlugin::new("SDT", PID_SDT, 3000, handler);
        plugin.start(&config).unwrap();

        let mut input = File::open(&input_path).await.unwrap();
        let mut output = File::create(&output_path).await.unwrap();
        let written = plugin
            .process_stream(&mut input, &mut output, TS_BITRATE)
            .await
            .unwrap();
        drop(output);

        let data = tokio::fs::read(&output_path).await.unwrap();
        std::fs::remove_file(&input_path).unwrap();
        std::fs::remove_file(&output_path).unwrap();

        assert_eq!(written, 500);
        assert_eq!(data.len(), 500 * TS_PACKET_SIZE);
        assert!(plugin.found());

        // Created after 50 packets, then one packet every 20 packets.
        let sdt_packets: Vec<usize> = data
            .chunks(TS_PACKET_SIZE)
            .enumerate()
            .filter(|(_, pkt)| TsPacket::from_slice(pkt).is_some_and(|p| p.pid() == PID_SDT))
            .map(|(index, _)| index)
            .collect();
        assert_eq!(sdt_packets.first(), Some(&49));
        assert_eq!(sdt_packets.len(), 23);

        let tables = demux_tables(&data);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].section_at(0).unwrap().payload().ends_with(b"carousel"));
    }

    #[tokio::test]
    async fn test_unknown_bitrate_is_fatal() {
        let config = TablePluginConfig::new().with_create(true);
        let handler = ServiceNameHandler { name: Vec::new() };
        let mut plugin = TablePlugin::new("SDT", PID_SDT, TS_BITRATE * 2, handler);
        plugin.start(&config).unwrap();

        let input = null_stream(200);
        let mut output = Vec::new();
        let result = plugin
            .process_stream(&mut input.as_slice(), &mut output, TS_BITRATE)
            .await;
        assert!(matches!(result, Err(TsError::BitrateUnderflow { .. })));
        // Everything before the creation point was written.
        assert_eq!(output.len(), 99 * TS_PACKET_SIZE);
    }

    #[test]
    fn test_cycling_packetizer_round_trip() {
        let sections: Vec<_> = (0..4u8)
            .map(|n| {
                Arc::new(Section::new_long(
                    TID_SDT_ACT,
                    true,
                    0x0002,
                    5,
                    true,
                    n,
                    3,
                    &vec![n; 100 + 50 * n as usize],
                ))
            })
            .collect();
        let table = BinaryTable::from_sections(sections);

        let mut pzer = CyclingPacketizer::new(PID_SDT, StuffingPolicy::AtEnd, TS_BITRATE);
        pzer.add_table(&table, 200);

        let mut data = Vec::new();
        let mut boundaries = 0;
        for _ in 0..200 {
            let (pkt, _) = pzer.next_packet();
            data.extend_from_slice(&pkt.b);
            if pzer.at_cycle_boundary() {
                boundaries += 1;
            }
        }

        let tables = demux_tables(&data);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].sections().zip(table.sections()).all(|(a, b)| a == b));
        // One cycle every 20 packets.
        assert_eq!(boundaries, 10);
    }
}
