//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The observable snapshot consumed by the presentation layer.
//!
//! The teacher crate notifies its client application through an `Observer`
//! trait whose methods are invoked directly (see `group_call::Observer`).
//! This crate has no FFI boundary forcing callback delivery, so the same
//! "push state changes to whoever is listening" idea is realized as a
//! single-writer slot with change notification: a [`tokio::sync::watch`]
//! channel. Consumers render from the snapshot; they never see a graph of
//! mutable references into controller state.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::common::{ActiveTransport, CameraMode, IceConnectionState, PeerConnectionState};
use crate::common::{CallPhase, RoomId, SignalingState};

/// Everything the presentation layer can observe about the current call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    pub phase: CallPhase,
    pub room_id: Option<RoomId>,
    pub participant_count: usize,
    pub is_host: bool,
    pub is_signaling_connected: bool,
    pub active_transport: Option<ActiveTransport>,
    pub is_reconnecting: bool,
    pub ice_connection_state: IceConnectionState,
    pub connection_state: PeerConnectionState,
    pub signaling_state: SignalingState,
    pub local_audio_enabled: bool,
    pub local_video_enabled: bool,
    pub remote_video_enabled: bool,
    pub local_camera_mode: CameraMode,
    pub is_front_camera: bool,
    pub is_screen_sharing: bool,
    pub is_flash_available: bool,
    pub is_flash_enabled: bool,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
    pub realtime_stats: Option<RealtimeStats>,
}

/// Lightweight call-quality stats, surfaced opaquely from the media engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeStats {
    pub round_trip_time_ms: Option<f64>,
    pub packet_loss_fraction: Option<f64>,
    pub video_bitrate_kbps: Option<u32>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            room_id: None,
            participant_count: 0,
            is_host: false,
            is_signaling_connected: false,
            active_transport: None,
            is_reconnecting: false,
            ice_connection_state: IceConnectionState::New,
            connection_state: PeerConnectionState::New,
            signaling_state: SignalingState::Stable,
            local_audio_enabled: true,
            local_video_enabled: true,
            remote_video_enabled: false,
            local_camera_mode: CameraMode::Front,
            is_front_camera: true,
            is_screen_sharing: false,
            is_flash_available: false,
            is_flash_enabled: false,
            status_message: None,
            error_message: None,
            realtime_stats: None,
        }
    }
}

/// A single-writer slot publishing [`UiState`] snapshots to subscribers.
pub struct UiStateStore {
    tx: watch::Sender<UiState>,
}

impl UiStateStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(UiState::default());
        Self { tx }
    }

    /// Returns a cloneable handle that receives every future snapshot.
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.tx.subscribe()
    }

    /// Returns the current snapshot without subscribing.
    pub fn snapshot(&self) -> UiState {
        self.tx.borrow().clone()
    }

    /// Replaces the current snapshot wholesale.
    pub fn set(&self, state: UiState) {
        // `send_modify` would also work, but a plain `send` skips touching
        // the closure-capture path when there's nothing to merge.
        let _ = self.tx.send(state);
    }

    /// Applies `f` to the current snapshot and publishes the result, only if
    /// it actually changed (keeps the watch channel's "changed" bookkeeping
    /// meaningful for subscribers using `changed()`).
    pub fn update(&self, f: impl FnOnce(&mut UiState)) {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }
}

impl Default for UiStateStore {
    fn default() -> Self {
        Self::new()
    }
}
