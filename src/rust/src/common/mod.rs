//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Common types used throughout the crate: identifiers, the call phase
//! enum, and the UI-facing snapshot type.

pub mod ui_state;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use ui_state::{UiState, UiStateStore};

/// A 27-character base64url room token. Validity is checked at every
/// ingress boundary by going through [`RoomId::new`]/[`FromStr`] -- once a
/// `RoomId` exists, it is known-valid.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(raw: impl Into<String>) -> Result<Self, crate::error::Error> {
        let raw = raw.into();
        if is_valid_room_id(&raw) {
            Ok(Self(raw))
        } else {
            Err(crate::error::Error::InvalidRoomId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn is_valid_room_id(raw: &str) -> bool {
    raw.len() == 27
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl FromStr for RoomId {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned client identifier, stable across a session and
/// preserved across reconnects via a persisted `reconnectCid`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque server-issued token echoed on rejoin to preserve session identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconnectToken(pub String);

/// The finite call-phase state exposed to the presentation layer.
///
/// `Waiting` is the degenerate in-call state with a single participant
/// (self); `Error` is reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    CreatingRoom,
    Joining,
    Waiting,
    InCall,
    Ending,
    Error,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which transport is currently active, as surfaced to the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveTransport {
    Ws,
    Sse,
}

/// Camera facing mode, mirrored into `UiState` for the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    Front,
    Back,
}

impl Default for CameraMode {
    fn default() -> Self {
        Self::Front
    }
}

/// Mirrors `RTCIceConnectionState` as surfaced by the media engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Mirrors `RTCPeerConnectionState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Mirrors `RTCSignalingState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_accepts_valid_token() {
        let token = "A".repeat(27);
        assert!(RoomId::new(token).is_ok());
    }

    #[test]
    fn room_id_rejects_wrong_length() {
        assert!(RoomId::new("short").is_err());
        assert!(RoomId::new("A".repeat(28)).is_err());
    }

    #[test]
    fn room_id_rejects_invalid_characters() {
        let mut token = "A".repeat(26);
        token.push('!');
        assert!(RoomId::new(token).is_err());
    }

    #[test]
    fn room_id_accepts_url_safe_characters() {
        let token = format!("{}{}", "A".repeat(25), "_-");
        assert!(RoomId::new(token).is_ok());
    }
}
