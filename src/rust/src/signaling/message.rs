//
// Copyright (C) 2019, 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The messages we send over the signaling channel to establish a call.
//!
//! Unlike the teacher's protobuf-framed `core::signaling`, the wire format
//! here is a single JSON envelope whose `payload` shape is keyed by the
//! sibling `type` field rather than self-describing, so `payload` is kept
//! as a raw [`serde_json::Value`] and parsed a second time by typed
//! accessors -- the same two-pass shape `lite::sfu`'s `SerializedPeekInfo`
//! uses for server responses whose fields depend on context not visible to
//! serde's derive.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{ClientId, ReconnectToken, RoomId};

/// An enum representing the different types of signaling messages that can
/// be sent and received over the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Join,
    Joined,
    RoomState,
    RoomEnded,
    RoomStatuses,
    RoomStatusUpdate,
    Ping,
    Pong,
    #[serde(rename = "turn-refresh")]
    TurnRefresh,
    #[serde(rename = "turn-refreshed")]
    TurnRefreshed,
    Offer,
    Answer,
    Ice,
    Leave,
    EndRoom,
    WatchRooms,
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The framed JSON envelope: `{v, type, rid, sid, cid, to, payload}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub v: u32,
    #[serde(rename = "type")]
    pub typ: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<RoomId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<ClientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<ClientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SignalingMessage {
    pub fn new(typ: MessageType) -> Self {
        Self {
            v: 1,
            typ,
            rid: None,
            sid: None,
            cid: None,
            to: None,
            payload: None,
        }
    }

    pub fn with_rid(mut self, rid: RoomId) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Deserializes `payload` into `T`, if present.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.payload
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A single participant entry carried on `joined`/`room_state`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub cid: ClientId,
    #[serde(rename = "joinedAt", skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<i64>,
}

/// The room roster carried on `joined`/`room_state`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    #[serde(rename = "hostCid")]
    pub host_cid: ClientId,
    pub participants: Vec<Participant>,
}

impl RoomState {
    /// Resolves the effective host, tolerating server-side `hostCid` drift:
    /// if the carried `hostCid` is absent from the participant list, the
    /// first participant's cid is used instead.
    pub fn resolved_host_cid(&self) -> Option<&ClientId> {
        if self
            .participants
            .iter()
            .any(|p| p.cid == self.host_cid)
        {
            Some(&self.host_cid)
        } else {
            self.participants.first().map(|p| &p.cid)
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len().max(1)
    }
}

/// Additional fields carried on `joined` alongside the room roster.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct JoinedExtras {
    #[serde(rename = "reconnectToken")]
    pub reconnect_token: Option<ReconnectToken>,
    #[serde(rename = "turnToken")]
    pub turn_token: Option<String>,
    #[serde(rename = "turnTokenTTLMs")]
    pub turn_token_ttl_ms: Option<u64>,
}

/// TURN credentials, as returned by `GET /api/turn` and updated by
/// `turn-refreshed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnCredentials {
    pub uris: Vec<String>,
    pub username: String,
    pub password: String,
    #[serde(rename = "ttlMs")]
    pub ttl_ms: u64,
}

/// The nested SDP payload for `offer`/`answer`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
}

/// The ICE candidate payload carried on `ice` messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u32>,
}

/// The wrapper the wire format actually uses: `{candidate: {...}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IcePayload {
    pub candidate: IceCandidatePayload,
}

/// The payload sent with a `join` message.
#[derive(Clone, Debug, Serialize)]
pub struct JoinPayload {
    pub device: String,
    pub capabilities: JoinCapabilities,
    #[serde(rename = "reconnectCid", skip_serializing_if = "Option::is_none")]
    pub reconnect_cid: Option<ClientId>,
    #[serde(rename = "reconnectToken", skip_serializing_if = "Option::is_none")]
    pub reconnect_token: Option<ReconnectToken>,
}

#[derive(Clone, Debug, Serialize)]
pub struct JoinCapabilities {
    #[serde(rename = "trickleIce")]
    pub trickle_ice: bool,
}

/// A single entry of a `room_statuses`/`room_status_update` occupancy map.
#[derive(Clone, Debug, Deserialize)]
pub struct RoomStatusEntry {
    pub rid: RoomId,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_message_types() -> Vec<MessageType> {
        vec![
            MessageType::Join,
            MessageType::Joined,
            MessageType::RoomState,
            MessageType::RoomEnded,
            MessageType::RoomStatuses,
            MessageType::RoomStatusUpdate,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::TurnRefresh,
            MessageType::TurnRefreshed,
            MessageType::Offer,
            MessageType::Answer,
            MessageType::Ice,
            MessageType::Leave,
            MessageType::EndRoom,
            MessageType::WatchRooms,
            MessageType::Error,
        ]
    }

    #[test]
    fn round_trips_every_message_kind_with_all_optional_fields() {
        let rid = RoomId::new("A".repeat(27)).unwrap();
        let cid = ClientId("client-1".to_string());
        let to = ClientId("client-2".to_string());
        let combos: Vec<(Option<RoomId>, Option<String>, Option<ClientId>, Option<ClientId>, Option<Value>)> = vec![
            (None, None, None, None, None),
            (Some(rid.clone()), None, None, None, None),
            (None, Some("sid-1".to_string()), None, None, None),
            (None, None, Some(cid.clone()), None, None),
            (None, None, None, Some(to.clone()), None),
            (None, None, None, None, Some(json!({"sdp": "v=0"}))),
            (
                Some(rid),
                Some("sid-1".to_string()),
                Some(cid),
                Some(to),
                Some(json!({"k": 1})),
            ),
        ];

        for typ in all_message_types() {
            for (rid, sid, cid, to, payload) in combos.clone() {
                let msg = SignalingMessage {
                    v: 1,
                    typ,
                    rid,
                    sid,
                    cid,
                    to,
                    payload,
                };
                let encoded = msg.encode().unwrap();
                let decoded = SignalingMessage::decode(&encoded).unwrap();
                assert_eq!(decoded.v, msg.v);
                assert_eq!(decoded.typ, msg.typ);
                assert_eq!(decoded.rid, msg.rid);
                assert_eq!(decoded.sid, msg.sid);
                assert_eq!(decoded.cid, msg.cid);
                assert_eq!(decoded.to, msg.to);
                assert_eq!(decoded.payload, msg.payload);
            }
        }
    }

    #[test]
    fn host_fallback_when_host_cid_missing_from_participants() {
        let rs = RoomState {
            host_cid: ClientId("ghost".to_string()),
            participants: vec![
                Participant {
                    cid: ClientId("a".to_string()),
                    joined_at: None,
                },
                Participant {
                    cid: ClientId("b".to_string()),
                    joined_at: None,
                },
            ],
        };
        assert_eq!(rs.resolved_host_cid(), Some(&ClientId("a".to_string())));
    }

    #[test]
    fn host_cid_used_when_present() {
        let rs = RoomState {
            host_cid: ClientId("b".to_string()),
            participants: vec![
                Participant {
                    cid: ClientId("a".to_string()),
                    joined_at: None,
                },
                Participant {
                    cid: ClientId("b".to_string()),
                    joined_at: None,
                },
            ],
        };
        assert_eq!(rs.resolved_host_cid(), Some(&ClientId("b".to_string())));
    }

    #[test]
    fn participant_count_is_at_least_one() {
        let rs = RoomState {
            host_cid: ClientId("a".to_string()),
            participants: vec![],
        };
        assert_eq!(rs.participant_count(), 1);
    }
}
