//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The transport capability set shared by [`super::ws::WsTransport`] and
//! [`super::sse::SseTransport`].
//!
//! Modeled as a tagged variant (`TransportKind`) plus a common trait, so
//! [`super::client::SignalingClient`] never names a concrete transport type
//! except through its selection policy (design note: "Dynamic dispatch of
//! transports").

use std::fmt;

use async_trait::async_trait;

use crate::signaling::message::SignalingMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Ws,
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ws => write!(f, "ws"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// Why a transport closed. `Unsupported` and `Timeout` (along with "never
/// opened this session" and "WS with >=3 consecutive failures", tracked by
/// the client rather than the transport) are exactly the conditions that
/// trigger fallback to the next transport in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller asked for this (`close()`); never triggers fallback or
    /// reconnect.
    ClientInitiated,
    /// This transport kind isn't usable in the current environment.
    Unsupported,
    /// The connect attempt did not open within `CONNECT_TIMEOUT_MS`.
    Timeout,
    /// Two consecutive ping intervals passed without a `pong`.
    PongTimeout,
    /// The remote end closed the connection.
    RemoteClosed(Option<String>),
    /// A lower-level I/O or protocol error.
    Error(String),
}

/// Events a transport attempt delivers back to the owning
/// [`super::client::SignalingClient`]. An attempt carries an `attempt_id`;
/// out-of-order events from a superseded attempt are ignored by the client.
#[derive(Debug)]
pub enum TransportEvent {
    Open,
    Message(SignalingMessage),
    Closed(CloseReason),
}

/// A single logical connection attempt over one transport kind.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Begins connecting to `host` (a bare authority, no scheme, no
    /// trailing slash). Events are delivered on `events` until `close` is
    /// called or the transport gives up.
    async fn connect(
        &mut self,
        host: String,
        events: tokio::sync::mpsc::UnboundedSender<TransportEvent>,
    );

    /// Sends a message. Silently dropped if not connected -- the same
    /// "best effort, caller does not await delivery" contract
    /// `SignalingClient::send` exposes to its own caller.
    fn send(&mut self, message: &SignalingMessage);

    /// Client-initiated close; must not emit further events after this
    /// call returns, beyond a single `Closed(ClientInitiated)` if one
    /// hasn't already been sent.
    async fn close(&mut self);
}
