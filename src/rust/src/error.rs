//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Crate-wide error conditions.
//!
//! Mirrors the error-kind taxonomy of the call controller's error handling
//! design: transient transport failures are *not* represented here (they
//! never escape the signaling layer), only the terminal/ingress conditions a
//! caller or the controller itself needs to branch on.

use crate::common::RoomId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("room id {0:?} is not a valid 27-character base64url token")]
    InvalidRoomId(String),

    #[error("invalid deep link: {0}")]
    InvalidDeepLink(String),

    #[error("empty room input")]
    EmptyRoomInput,

    #[error("a call is already in progress for room {0}")]
    CallAlreadyInProgress(RoomId),

    #[error("no active call")]
    NoActiveCall,

    #[error("signaling server rejected the request: {0}")]
    ServerRejected(String),

    #[error("timed out waiting to join the room")]
    JoinTimeout,

    #[error("fetching TURN credentials timed out or failed")]
    TurnFetchFailed,

    #[error("camera/microphone permission was denied")]
    MediaPermissionDenied,

    #[error("media engine error: {0}")]
    MediaEngine(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;
