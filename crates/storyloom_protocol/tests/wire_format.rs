//! Protocol compatibility tests.
//!
//! These verify that the wire encoding matches the documented header format
//! byte-for-byte, independent of the round-trip unit tests in `lib.rs`.

use storyloom_protocol::*;

#[test]
fn test_all_opcodes_compatibility() {
    let opcodes = [
        (OpCode::Unknown, 0u8),
        (OpCode::Identify, 1),
        (OpCode::Dispatch, 2),
        (OpCode::Abort, 3),
        (OpCode::Heartbeat, 4),
        (OpCode::Conclude, 5),
        (OpCode::Err, 6),
        (OpCode::Reload, 7),
    ];

    for (opcode, expected_value) in opcodes {
        assert_eq!(
            opcode.as_u8(),
            expected_value,
            "OpCode {:?} should have value {}",
            opcode,
            expected_value
        );
        assert_eq!(
            OpCode::from_u8(expected_value).unwrap(),
            opcode,
            "Value {} should parse to OpCode {:?}",
            expected_value,
            opcode
        );
    }
}

/// Header format: 16 bytes, big-endian, `[VER:1][OP:1][RES:2][JOB_ID:8][LEN:4]`.
#[test]
fn test_header_format_specification() {
    let header = Header::new(OpCode::Dispatch, WireJobId::new(0x123456789ABCDEF0), 0x12345678);
    let packed = header.pack().unwrap();

    assert_eq!(packed.len(), 16, "Header must be exactly 16 bytes");

    assert_eq!(packed[0], PROTOCOL_VERSION, "Version byte");
    assert_eq!(packed[1], OpCode::Dispatch.as_u8(), "OpCode byte");
    assert_eq!(packed[2], 0, "Reserved high byte");
    assert_eq!(packed[3], 0, "Reserved low byte");

    assert_eq!(packed[4], 0x12, "Job ID byte 0");
    assert_eq!(packed[5], 0x34, "Job ID byte 1");
    assert_eq!(packed[6], 0x56, "Job ID byte 2");
    assert_eq!(packed[7], 0x78, "Job ID byte 3");
    assert_eq!(packed[8], 0x9A, "Job ID byte 4");
    assert_eq!(packed[9], 0xBC, "Job ID byte 5");
    assert_eq!(packed[10], 0xDE, "Job ID byte 6");
    assert_eq!(packed[11], 0xF0, "Job ID byte 7");

    assert_eq!(packed[12], 0x12, "Payload len byte 0");
    assert_eq!(packed[13], 0x34, "Payload len byte 1");
    assert_eq!(packed[14], 0x56, "Payload len byte 2");
    assert_eq!(packed[15], 0x78, "Payload len byte 3");
}

#[test]
fn test_protocol_version() {
    assert_eq!(PROTOCOL_VERSION, 0x04, "Protocol version must be 4");
}

#[test]
fn test_message_roundtrip_compatibility() {
    let payload = IdentifyPayload {
        queues: vec!["heavy".to_string(), "normal".to_string()],
        worker_id: "rust-worker-001".to_string(),
        concurrency: 2,
    };

    let payload_json = serde_json::to_string(&payload).unwrap();
    let msg = Message::new(OpCode::Identify, WireJobId::new(42), payload_json.as_bytes().to_vec()).unwrap();

    let (header_bytes, payload_bytes) = msg.pack().unwrap();
    let frames = vec![header_bytes, payload_bytes];
    let unpacked = Message::unpack(&frames).unwrap();

    assert_eq!(unpacked.header.opcode, OpCode::Identify);
    assert_eq!(unpacked.header.job_id, WireJobId::new(42));

    let decoded: IdentifyPayload = serde_json::from_slice(&unpacked.payload).unwrap();
    assert_eq!(decoded.worker_id, "rust-worker-001");
    assert!(decoded.queues.contains(&"heavy".to_string()));
    assert!(decoded.queues.contains(&"normal".to_string()));
}
