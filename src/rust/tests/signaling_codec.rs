//
// Copyright (C) 2019, 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Tests for the signaling envelope and room-state resolution, exercised
//! only through the public crate API.

extern crate duocall;

use duocall::signaling::{IceCandidatePayload, MessageType, Participant, RoomState, SignalingMessage};
use duocall::{ClientId, RoomId};

fn room(letter: char) -> RoomId {
    RoomId::new(letter.to_string().repeat(27)).unwrap()
}

#[test]
fn join_message_round_trips_with_rid_and_payload() {
    let rid = room('a');
    let payload = serde_json::json!({ "device": "duocall" });
    let message = SignalingMessage::new(MessageType::Join)
        .with_rid(rid.clone())
        .with_payload(payload.clone());

    let encoded = message.encode().unwrap();
    let decoded = SignalingMessage::decode(&encoded).unwrap();

    assert_eq!(decoded.typ, MessageType::Join);
    assert_eq!(decoded.rid, Some(rid));
    assert_eq!(decoded.payload, Some(payload));
}

#[test]
fn ice_message_payload_round_trips_through_payload_as() {
    let candidate = IceCandidatePayload {
        candidate: "candidate:1 1 udp 1 0.0.0.0 1 typ host".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    };
    let payload = serde_json::json!({ "candidate": candidate });
    let message = SignalingMessage::new(MessageType::Ice).with_payload(payload);

    let encoded = message.encode().unwrap();
    let decoded = SignalingMessage::decode(&encoded).unwrap();

    let parsed: serde_json::Value = decoded.payload_as().unwrap();
    assert_eq!(
        parsed["candidate"]["sdpMid"],
        serde_json::Value::String("0".to_string())
    );
}

#[test]
fn message_missing_optional_fields_decodes_cleanly() {
    let raw = r#"{"v":1,"type":"ping"}"#;
    let decoded = SignalingMessage::decode(raw).unwrap();
    assert_eq!(decoded.typ, MessageType::Ping);
    assert!(decoded.rid.is_none());
    assert!(decoded.payload.is_none());
}

#[test]
fn host_falls_back_to_first_participant_when_host_cid_is_stale() {
    let rs = RoomState {
        host_cid: ClientId("departed-host".to_string()),
        participants: vec![
            Participant {
                cid: ClientId("alice".to_string()),
                joined_at: Some(1),
            },
            Participant {
                cid: ClientId("bob".to_string()),
                joined_at: Some(2),
            },
        ],
    };
    assert_eq!(rs.resolved_host_cid(), Some(&ClientId("alice".to_string())));
}

#[test]
fn host_cid_present_in_roster_is_used_directly() {
    let rs = RoomState {
        host_cid: ClientId("bob".to_string()),
        participants: vec![
            Participant {
                cid: ClientId("alice".to_string()),
                joined_at: Some(1),
            },
            Participant {
                cid: ClientId("bob".to_string()),
                joined_at: Some(2),
            },
        ],
    };
    assert_eq!(rs.resolved_host_cid(), Some(&ClientId("bob".to_string())));
}

#[test]
fn empty_roster_has_no_resolvable_host_but_counts_as_one_participant() {
    let rs = RoomState {
        host_cid: ClientId("self".to_string()),
        participants: vec![],
    };
    assert_eq!(rs.resolved_host_cid(), None);
    assert_eq!(rs.participant_count(), 1);
}
