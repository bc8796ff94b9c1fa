//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The opaque WebRTC peer connection this crate drives but does not
//! implement. Grounded on `group_call::Observer`'s split between "we call
//! into the engine" and "the engine calls back into us" -- generalized here
//! from a synchronous FFI callback trait into an async trait plus an event
//! channel, since a synchronous callback into controller state would create
//! a reentrancy cycle the single-task event loop design (design note in
//! SPEC_FULL.md §5) is built to avoid.

use async_trait::async_trait;

use crate::common::{CameraMode, IceConnectionState, PeerConnectionState, SignalingState};
use crate::common::ui_state::RealtimeStats;
use crate::error::Result;
use crate::signaling::message::TurnCredentials;

/// Controller-to-engine calls. All are fallible; engine-side failures
/// surface as `Error::MediaEngine`.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self) -> Result<String>;
    async fn create_answer(&self) -> Result<String>;
    async fn set_local_description(&self, sdp: String) -> Result<()>;
    async fn rollback_local_description(&self) -> Result<()>;
    async fn set_remote_description(&self, sdp: String) -> Result<()>;
    async fn add_ice_candidate(
        &self,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u32>,
    ) -> Result<()>;
    async fn set_ice_servers(&self, credentials: TurnCredentials) -> Result<()>;
    async fn restart_ice(&self) -> Result<()>;
    async fn set_local_audio_enabled(&self, enabled: bool) -> Result<()>;
    async fn set_local_video_enabled(&self, enabled: bool) -> Result<()>;
    async fn set_camera_mode(&self, mode: CameraMode) -> Result<()>;
    async fn close(&self) -> Result<()>;

    /// Takes ownership of the event stream. Called exactly once, right
    /// after construction; panics or returns an already-drained receiver
    /// on a second call are both acceptable since the controller never
    /// calls it twice.
    fn take_events(&mut self) -> tokio::sync::mpsc::UnboundedReceiver<MediaEngineEvent>;
}

/// Engine-to-controller notifications, delivered over an mpsc channel the
/// controller polls from its own event loop rather than a synchronous
/// callback (see module docs).
#[derive(Clone, Debug, PartialEq)]
pub enum MediaEngineEvent {
    IceConnectionStateChanged(IceConnectionState),
    ConnectionStateChanged(PeerConnectionState),
    SignalingStateChanged(SignalingState),
    LocalIceCandidateGathered {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u32>,
    },
    RenegotiationNeeded,
    RemoteVideoTrackStateChanged(bool),
    RealtimeStatsUpdated(RealtimeStats),
    Error(String),
}
