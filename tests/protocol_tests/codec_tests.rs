//! Codec Tests
//!
//! Tests for request and response encoding/decoding.

use std::io::Cursor;

use replikv::fsm::ApplyResult;
use replikv::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, Request, RequestType, Response, Status,
    MAX_PAYLOAD_SIZE,
};
use replikv::{CommandPayload, ReplikvError};
use serde_json::{json, Value};

// =============================================================================
// Request Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_command() {
    let payload = CommandPayload::set("mykey", json!({"x": 1}));
    let request = Request::command(&payload).unwrap();
    let encoded = encode_request(&request);

    assert_eq!(encoded[0], RequestType::Command as u8);

    match decode_request(&encoded).unwrap() {
        Request::Command(data) => assert_eq!(CommandPayload::decode(&data).unwrap(), payload),
        _ => panic!("Expected COMMAND request"),
    }
}

#[test]
fn test_command_bytes_pass_through_unparsed() {
    // Decoding commands is left to the state machine
    let request = Request::Command(b"{not json".to_vec());
    let encoded = encode_request(&request);

    match decode_request(&encoded).unwrap() {
        Request::Command(data) => assert_eq!(data, b"{not json"),
        _ => panic!("Expected COMMAND request"),
    }
}

#[test]
fn test_encode_decode_snapshot_and_ping() {
    let snapshot = encode_request(&Request::Snapshot);
    let ping = encode_request(&Request::Ping);

    assert_eq!(snapshot.len(), 5);
    assert!(matches!(decode_request(&snapshot).unwrap(), Request::Snapshot));
    assert!(matches!(decode_request(&ping).unwrap(), Request::Ping));
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_response_ok() {
    let response = Response::ok(json!({"x": [1, 2, 3]}));
    let decoded = decode_response(&encode_response(&response).unwrap()).unwrap();

    assert_eq!(decoded, response);
}

#[test]
fn test_encode_decode_response_error() {
    let response = Response::error("something went wrong");
    let decoded = decode_response(&encode_response(&response).unwrap()).unwrap();

    assert_eq!(decoded.status, Status::Error);
    assert_eq!(decoded.payload, json!("something went wrong"));
}

#[test]
fn test_response_from_apply() {
    let ok = Response::from_apply(Some(ApplyResult::ok(json!({}))));
    assert_eq!(ok.status, Status::Ok);
    assert_eq!(ok.payload, json!({}));

    let failed = Response::from_apply(Some(ApplyResult::failed(
        ReplikvError::Protocol("boom".to_string()),
        Value::Null,
    )));
    assert_eq!(failed.status, Status::Error);
    assert!(failed.payload.as_str().unwrap().contains("boom"));

    let ignored = Response::from_apply(None);
    assert_eq!(ignored.status, Status::Ignored);
    assert_eq!(ignored.payload, Value::Null);
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_incomplete_header() {
    let bytes = [0x01, 0x00, 0x00]; // Only 3 bytes, need 5
    let result = decode_request(&bytes);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Incomplete request header"));
}

#[test]
fn test_incomplete_payload() {
    // Header says 10 bytes payload, but only 5 provided
    let bytes = [0x01, 0x00, 0x00, 0x00, 0x0A, 0x7B, 0x7D, 0x00, 0x00, 0x00];
    let result = decode_request(&bytes);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("Incomplete"));
}

#[test]
fn test_unknown_request_type() {
    let bytes = [0xFF, 0x00, 0x00, 0x00, 0x00];
    let result = decode_request(&bytes);
    assert!(result.unwrap_err().to_string().contains("Unknown request type"));
}

#[test]
fn test_unknown_response_status() {
    let bytes = [0xFF, 0x00, 0x00, 0x00, 0x00];
    let result = decode_response(&bytes);
    assert!(result.unwrap_err().to_string().contains("Unknown response status"));
}

#[test]
fn test_ping_with_unexpected_payload() {
    let bytes = [0x03, 0x00, 0x00, 0x00, 0x05, 0x68, 0x65, 0x6C, 0x6C, 0x6F];
    let result = decode_request(&bytes);
    assert!(result.unwrap_err().to_string().contains("unexpected payload"));
}

#[test]
fn test_oversized_payload_rejected_before_reading() {
    let mut bytes = vec![0x01];
    bytes.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_be_bytes());

    let result = read_request(&mut Cursor::new(bytes));

    assert!(matches!(result, Err(ReplikvError::Protocol(_))));
}

#[test]
fn test_response_with_invalid_json_payload() {
    let bytes = [0x00, 0x00, 0x00, 0x00, 0x02, b'{', b'x'];

    assert!(matches!(
        decode_response(&bytes),
        Err(ReplikvError::Codec(_))
    ));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_multiple_requests() {
    let requests = vec![
        Request::Ping,
        Request::command(&CommandPayload::set("k1", json!("v1"))).unwrap(),
        Request::command(&CommandPayload::get("k1")).unwrap(),
        Request::Snapshot,
    ];

    let mut buffer = Vec::new();
    for request in &requests {
        write_request(&mut buffer, request).unwrap();
    }

    let mut cursor = Cursor::new(buffer);
    for expected in &requests {
        let decoded = read_request(&mut cursor).unwrap();
        assert_eq!(decoded.request_type(), expected.request_type());
    }
}

#[test]
fn test_stream_write_read_response() {
    let response = Response::ok(json!({"id": "1-2-3"}));

    let mut buffer = Vec::new();
    write_response(&mut buffer, &response).unwrap();

    let decoded = read_response(&mut Cursor::new(buffer)).unwrap();
    assert_eq!(decoded, response);
}

#[test]
fn test_stream_eof_is_io_error() {
    let result = read_request(&mut Cursor::new(Vec::new()));

    assert!(matches!(result, Err(ReplikvError::Io(_))));
}
