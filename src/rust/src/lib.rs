//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! # duocall -- a two-party WebRTC call control plane
//!
//! This crate drives one live call at a time: it establishes a signaling
//! session with a rendezvous server, negotiates a WebRTC peer connection
//! through an opaque [`media_engine::MediaEngine`], detects and recovers
//! from transient network failures, and publishes a stable [`common::UiState`]
//! snapshot for a presentation layer to render.
//!
//! Media capture/encoding, UI rendering, and persistent storage backends are
//! all external collaborators; this crate only depends on their client-side
//! trait contracts ([`media_engine::MediaEngine`], [`api_client::ApiClient`],
//! [`persistence::PersistentStore`]).

#[macro_use]
extern crate log;

pub mod common;
pub mod constants;
pub mod controller;
pub mod deep_link;
pub mod error;
pub mod api_client;
pub mod media_engine;
pub mod clock;
pub mod persistence;
pub mod room_occupancy;
pub mod signaling;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use common::{CallPhase, ClientId, ReconnectToken, RoomId, UiState};
pub use controller::call_controller::{CallController, CallControllerConfig};
pub use error::Error;
