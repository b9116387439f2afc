use super::*;
use crate::PayloadProtocolIdentifier;
use crate::chunk::chunk_data::ChunkData;
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_sack::{ChunkSack, GapAckBlock};

#[test]
fn test_packet_roundtrip_data() {
    let packet = Packet {
        source_port: 5000,
        destination_port: 5000,
        verification_tag: 0xdeadbeef,
        chunks: vec![Chunk::Data(ChunkData {
            unordered: false,
            beginning_fragment: true,
            ending_fragment: true,
            tsn: 42,
            stream_identifier: 1,
            stream_sequence_number: 7,
            payload_type: PayloadProtocolIdentifier::Binary,
            user_data: b"abcde".to_vec(),
        })],
    };

    let raw = packet.marshal();
    // 5-byte payload pads to 8 on the wire.
    assert_eq!(raw.len() % 4, 0);

    let decoded = Packet::unmarshal(&raw).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_packet_roundtrip_init_with_cookie() {
    let packet = Packet {
        source_port: 5000,
        destination_port: 5000,
        verification_tag: 0,
        chunks: vec![Chunk::InitAck(ChunkInit {
            initiate_tag: 1,
            advertised_receiver_window_credit: 100_000,
            num_outbound_streams: 16,
            num_inbound_streams: 16,
            initial_tsn: 12345,
            state_cookie: Some(1_700_000_000_123u64.to_be_bytes().to_vec()),
        })],
    };

    let raw = packet.marshal();
    let decoded = Packet::unmarshal(&raw).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_packet_roundtrip_sack_with_gaps() {
    let packet = Packet {
        source_port: 5000,
        destination_port: 5000,
        verification_tag: 7,
        chunks: vec![Chunk::Sack(ChunkSack {
            cumulative_tsn_ack: 100,
            advertised_receiver_window_credit: 100_000,
            gap_ack_blocks: vec![
                GapAckBlock { start: 2, end: 3 },
                GapAckBlock { start: 5, end: 5 },
            ],
            duplicate_tsns: vec![99, 98],
        })],
    };

    let raw = packet.marshal();
    let decoded = Packet::unmarshal(&raw).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_packet_checksum_rejects_corruption() {
    let packet = Packet {
        source_port: 5000,
        destination_port: 5000,
        verification_tag: 1,
        chunks: vec![],
    };
    let mut raw = packet.marshal().to_vec();
    raw[4] ^= 0x01;
    assert_eq!(
        Packet::unmarshal(&raw),
        Err(shared::error::Error::ErrChecksumMismatch)
    );
}

#[test]
fn test_packet_too_short() {
    assert_eq!(
        Packet::unmarshal(&[0u8; 11]),
        Err(shared::error::Error::ErrPacketTooShort)
    );
}

#[test]
fn test_unknown_chunk_skipped() {
    // Hand-build a packet with an unknown chunk type (0x3f) followed
    // by a SHUTDOWN-ACK; the unknown one is skipped by length.
    let mut body = vec![0x3f, 0, 0, 6, 0xaa, 0xbb, 0, 0]; // padded to 8
    body.extend_from_slice(&[8, 0, 0, 4]); // SHUTDOWN-ACK

    let mut raw = Vec::new();
    raw.extend_from_slice(&5000u16.to_be_bytes());
    raw.extend_from_slice(&5000u16.to_be_bytes());
    raw.extend_from_slice(&1u32.to_be_bytes());
    raw.extend_from_slice(&[0, 0, 0, 0]);
    raw.extend_from_slice(&body);
    let checksum = {
        use crc::{CRC_32_ISCSI, Crc};
        const C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
        C.checksum(&raw)
    };
    raw[8..12].copy_from_slice(&checksum.to_le_bytes());

    let decoded = Packet::unmarshal(&raw).unwrap();
    assert_eq!(decoded.chunks.len(), 1);
    assert_eq!(decoded.chunks[0].chunk_type(), crate::chunk::ChunkType::ShutdownAck);
}
