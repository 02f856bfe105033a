//! Integration tests for the sideload-core wire formats.
//!
//! These drive whole exchanges through the public API: lockdown session setup,
//! a heartbeat round, an AFC upload sequence and an installation status
//! stream, the way the agent's clients see them on a socket.

use plist::{Dictionary, Value};
use sideload_core::domain::staging::STAGING_DIRECTORY;
use sideload_core::protocol::afc::{
    decode_response, AfcErrorCode, AfcFileMode, AfcHeader, AfcOpcode, AfcRequest, AFC_HEADER_SIZE,
    MAX_WRITE_CHUNK,
};
use sideload_core::protocol::heartbeat::HeartbeatMessage;
use sideload_core::protocol::installation::{install_request, parse_install_status, InstallStatus};
use sideload_core::protocol::lockdown::{
    parse_query_type, parse_start_service, parse_start_session, LockdownRequest, AFC_SERVICE,
    LOCKDOWN_SERVICE_TYPE,
};
use sideload_core::protocol::PacketNumbers;
use sideload_core::{decode_plist_frame, encode_plist_frame, StagedArchive};

/// Frames `msg` as the device would and decodes it back, consuming every byte.
fn over_the_wire(msg: &Dictionary) -> Dictionary {
    let bytes = encode_plist_frame(msg).expect("encode must succeed");
    let (decoded, consumed) = decode_plist_frame(&bytes).expect("decode must succeed");
    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    decoded
}

fn afc_status(code: u64, packet_num: u64) -> Vec<u8> {
    let header = AfcHeader {
        entire_length: (AFC_HEADER_SIZE + 8) as u64,
        this_length: (AFC_HEADER_SIZE + 8) as u64,
        packet_num,
        operation: AfcOpcode::Status as u64,
    };
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&code.to_le_bytes());
    out
}

// ── Lockdown ──────────────────────────────────────────────────────────────────

#[test]
fn test_lockdown_session_setup_sequence() {
    // Arrange
    let session_req = LockdownRequest::StartSession {
        host_id: "HOST".to_string(),
        system_buid: "BUID".to_string(),
    };
    let service_req = LockdownRequest::StartService {
        service: AFC_SERVICE.to_string(),
    };

    let mut type_resp = Dictionary::new();
    type_resp.insert("Type".to_string(), LOCKDOWN_SERVICE_TYPE.into());
    let mut session_resp = Dictionary::new();
    session_resp.insert("SessionID".to_string(), "SID".into());
    session_resp.insert("EnableSessionSSL".to_string(), Value::Boolean(true));
    let mut service_resp = Dictionary::new();
    service_resp.insert("Port".to_string(), Value::Integer(49200u64.into()));
    service_resp.insert("EnableServiceSSL".to_string(), Value::Boolean(true));

    // Act
    let sent = over_the_wire(&session_req.to_dictionary("sideload-agent"));
    let query_ok = parse_query_type(&over_the_wire(&type_resp));
    let started = parse_start_session(&session_req, &over_the_wire(&session_resp)).unwrap();
    let endpoint = parse_start_service(&service_req, &over_the_wire(&service_resp)).unwrap();

    // Assert
    assert_eq!(sent.get("HostID").and_then(Value::as_string), Some("HOST"));
    assert!(query_ok.is_ok());
    assert_eq!(started.session_id, "SID");
    assert!(started.enable_ssl);
    assert_eq!(endpoint.port, 49200);
    assert!(endpoint.enable_ssl);
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

#[test]
fn test_heartbeat_marco_polo_over_frames() {
    let marco = over_the_wire(&HeartbeatMessage::Marco { interval: 10 }.to_dictionary());
    let polo = over_the_wire(&HeartbeatMessage::Polo.to_dictionary());

    assert_eq!(
        HeartbeatMessage::from_dictionary(&marco).unwrap(),
        HeartbeatMessage::Marco { interval: 10 }
    );
    assert_eq!(
        HeartbeatMessage::from_dictionary(&polo).unwrap(),
        HeartbeatMessage::Polo
    );
}

// ── AFC ───────────────────────────────────────────────────────────────────────

#[test]
fn test_afc_upload_sequence_numbers_packets_monotonically() {
    // Arrange
    let archive = StagedArchive::in_directory(STAGING_DIRECTORY);
    let payload = vec![0x5Au8; MAX_WRITE_CHUNK + 10];
    let mut numbers = PacketNumbers::new();

    // Act
    let packets = vec![
        AfcRequest::make_dir(archive.remote_directory()).encode(numbers.claim()),
        AfcRequest::file_open(&archive.remote_path(), AfcFileMode::WriteOnly)
            .encode(numbers.claim()),
        AfcRequest::file_write(1, &payload[..MAX_WRITE_CHUNK]).encode(numbers.claim()),
        AfcRequest::file_write(1, &payload[MAX_WRITE_CHUNK..]).encode(numbers.claim()),
        AfcRequest::file_close(1).encode(numbers.claim()),
    ];

    // Assert
    let numbers: Vec<u64> = packets
        .iter()
        .map(|p| u64::from_le_bytes(p[24..32].try_into().unwrap()))
        .collect();
    assert_eq!(numbers, vec![0, 1, 2, 3, 4]);

    let written: usize = packets[2..4]
        .iter()
        .map(|p| {
            let entire = u64::from_le_bytes(p[8..16].try_into().unwrap());
            let this = u64::from_le_bytes(p[16..24].try_into().unwrap());
            (entire - this) as usize
        })
        .sum();
    assert_eq!(written, payload.len(), "chunks cover the whole payload");
}

#[test]
fn test_afc_back_to_back_status_packets_decode_in_order() {
    // Arrange
    let mut stream = afc_status(16, 0);
    stream.extend_from_slice(&afc_status(0, 1));

    // Act
    let (first, used) = decode_response(&stream).unwrap();
    let (second, _) = decode_response(&stream[used..]).unwrap();

    // Assert
    assert_eq!(first.status(), Some(AfcErrorCode::ObjectExists));
    assert_eq!(second.status(), Some(AfcErrorCode::Success));
    assert_eq!(second.packet_num, 1);
}

// ── Installation proxy ────────────────────────────────────────────────────────

#[test]
fn test_install_status_stream_ends_at_complete() {
    // Arrange
    let request = over_the_wire(&install_request("/PublicStaging/x.ipa", Dictionary::new()));
    let updates: Vec<Dictionary> = [("CreatingStagingDirectory", 5u64), ("InstallingApplication", 80)]
        .iter()
        .map(|(status, pct)| {
            let mut d = Dictionary::new();
            d.insert("Status".to_string(), (*status).into());
            d.insert("PercentComplete".to_string(), Value::Integer((*pct).into()));
            d
        })
        .chain(std::iter::once({
            let mut d = Dictionary::new();
            d.insert("Status".to_string(), "Complete".into());
            d
        }))
        .collect();

    // Act
    let parsed: Vec<InstallStatus> = updates
        .iter()
        .map(|d| parse_install_status(&over_the_wire(d)).unwrap())
        .collect();

    // Assert
    assert_eq!(
        request.get("PackagePath").and_then(Value::as_string),
        Some("/PublicStaging/x.ipa")
    );
    let terminal: Vec<bool> = parsed.iter().map(InstallStatus::is_terminal).collect();
    assert_eq!(terminal, vec![false, false, true]);
    assert_eq!(parsed.last(), Some(&InstallStatus::Complete));
}
