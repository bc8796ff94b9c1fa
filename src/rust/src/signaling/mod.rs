//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The signaling transport: a framed JSON envelope exchanged over either a
//! WebSocket or an SSE/POST pair, with transport selection, liveness
//! checking, and reconnect owned by [`client::SignalingClient`].

pub mod client;
pub mod message;
pub mod sse;
pub mod transport;
pub mod ws;

pub use client::{SignalingClient, SignalingListener, TransportFactory};
pub use message::{
    IceCandidatePayload, MessageType, Participant, RoomState, SignalingMessage, TurnCredentials,
};
pub use transport::{CloseReason, Transport, TransportKind};
