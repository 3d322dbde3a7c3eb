//! Integration tests for the tvremote-core wire protocol.
//!
//! These tests go through the public crate-root API only, the same surface
//! the controller uses: build a session URL, encode the keys a channel switch
//! produces, and decode the frames a TV sends during pairing.

use std::time::Duration;

use serde_json::Value;
use tvremote_core::domain::plan::digit_schedule;
use tvremote_core::{
    remote_control_url, DiscoveryRecord, InboundEvent, OutboundMessage, RemoteKey, Scheme,
    SsdpHeaders,
};

#[test]
fn test_channel_switch_encodes_digits_then_enter() {
    // Arrange
    let schedule = digit_schedule(205, Duration::from_millis(200), Duration::from_millis(100));

    // Act
    let keys: Vec<String> = schedule
        .iter()
        .map(|(_, key)| {
            let json = OutboundMessage::click(*key).to_json().expect("encode must succeed");
            let value: Value = serde_json::from_str(&json).expect("valid JSON");
            value["params"]["DataOfCmd"]
                .as_str()
                .expect("DataOfCmd is a string")
                .to_string()
        })
        .collect();

    // Assert
    assert_eq!(keys, vec!["KEY_2", "KEY_0", "KEY_5", "KEY_ENTER"]);
}

#[test]
fn test_every_key_click_carries_fixed_params() {
    for key in RemoteKey::ALL {
        let json = OutboundMessage::click(key).to_json().expect("encode must succeed");
        let value: Value = serde_json::from_str(&json).expect("valid JSON");

        assert_eq!(value["method"], "ms.remote.control");
        assert_eq!(value["params"]["Cmd"], "Click");
        assert_eq!(value["params"]["Option"], "false");
        assert_eq!(value["params"]["TypeOfRemote"], "SendRemoteKey");
        assert_eq!(value["params"]["DataOfCmd"], key.as_str());
    }
}

#[test]
fn test_pairing_token_from_connect_frame_is_reused_in_next_url() {
    // Arrange
    let frame = r#"{"event":"ms.channel.connect","data":{"id":"c1","token":"58812345"}}"#;

    // Act
    let token = match InboundEvent::parse(frame).expect("decode must succeed") {
        InboundEvent::ConnectConfirmed { token } => token,
        other => panic!("unexpected event: {other:?}"),
    };
    let url = remote_control_url(
        Scheme::Secure,
        "192.168.1.62",
        8002,
        "SamsungTvRemote",
        token.as_deref(),
    );

    // Assert
    assert_eq!(
        url,
        "wss://192.168.1.62:8002/api/v2/channels/samsung.remote.control?name=U2Ftc3VuZ1R2UmVtb3Rl&token=58812345"
    );
}

#[test]
fn test_ssdp_response_becomes_record_keyed_by_location_host() {
    // Arrange
    let datagram = "HTTP/1.1 200 OK\r\n\
        LOCATION: http://10.0.0.40:7676/smp_15_\r\n\
        SERVER: SHP, UPnP/1.0, Samsung UPnP SDK/1.0\r\n\
        USN: uuid:a1::urn:samsung.com:device:RemoteControlReceiver:1\r\n\r\n";
    let headers = SsdpHeaders::parse(datagram);

    // Act
    let record = DiscoveryRecord::from_response(headers, "10.0.0.1".parse().unwrap());

    // Assert
    assert_eq!(record.ip, "10.0.0.40");
    assert!(record.raw_headers.looks_like_samsung_tv());
    assert!(!record.is_connected);
}
