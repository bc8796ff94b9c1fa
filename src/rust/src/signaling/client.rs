//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! `SignalingClient` owns transport selection, liveness checking, and
//! reconnect policy so [`crate::controller::call_controller::CallController`]
//! only ever sees `connected` / `message` / `disconnected` events, never a
//! concrete transport.
//!
//! Mirrors the single-event-stream-drives-everything shape of the teacher's
//! `core::call_manager` actor: one background task owns all mutable state
//! and is driven entirely by a `select!` over timers and channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::constants::ResilienceConstants;
use crate::signaling::message::SignalingMessage;
use crate::signaling::sse::SseTransport;
use crate::signaling::transport::{CloseReason, Transport, TransportEvent, TransportKind};
use crate::signaling::ws::WsTransport;

/// Delivered to whoever owns a `SignalingClient`. Implemented by
/// `CallController` in production, by a recording stub in tests.
pub trait SignalingListener: Send + Sync {
    fn on_connected(&self, transport: TransportKind);
    fn on_message(&self, message: SignalingMessage);
    fn on_disconnected(&self, reason: CloseReason, will_retry: bool);
}

enum Command {
    Send(SignalingMessage),
    Close,
}

/// Builds a transport for a given attempt. Production code always uses
/// [`new_transport`] (real WS/SSE sockets); tests substitute a scripted
/// double so transport-selection policy can be exercised without a network,
/// the same role the teacher's `sim` feature plays for the media stack.
pub type TransportFactory =
    Arc<dyn Fn(TransportKind, &reqwest::Client) -> Box<dyn Transport> + Send + Sync>;

/// A handle to a running signaling session. Cloning shares the same
/// underlying background task; dropping every clone closes it.
#[derive(Clone)]
pub struct SignalingClient {
    commands: mpsc::UnboundedSender<Command>,
    attempt_id: Arc<AtomicU64>,
}

impl SignalingClient {
    /// Starts connecting to `host` (bare authority, e.g. `"call.example.com"`).
    /// Idempotent per call: calling `connect` again on an existing client has
    /// no effect here -- callers construct a fresh client per join attempt,
    /// which is what gives attempt-id fencing its meaning.
    pub fn connect(
        host: String,
        constants: ResilienceConstants,
        clock: Arc<dyn Clock>,
        http_client: reqwest::Client,
        listener: Arc<dyn SignalingListener>,
    ) -> Self {
        Self::connect_with_factory(
            host,
            constants,
            clock,
            http_client,
            listener,
            Arc::new(new_transport),
        )
    }

    /// Same as [`Self::connect`], but with the transport construction
    /// swapped out. Used by integration tests to drive the fallback/liveness
    /// policy against scripted transports instead of real sockets.
    pub fn connect_with_factory(
        host: String,
        constants: ResilienceConstants,
        clock: Arc<dyn Clock>,
        http_client: reqwest::Client,
        listener: Arc<dyn SignalingListener>,
        factory: TransportFactory,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let attempt_id = Arc::new(AtomicU64::new(0));
        let client = Self {
            commands: commands_tx,
            attempt_id: attempt_id.clone(),
        };

        tokio::spawn(run(
            host,
            constants,
            clock,
            http_client,
            listener,
            commands_rx,
            attempt_id,
            factory,
        ));

        client
    }

    /// Best-effort send; silently dropped if nothing is connected right now.
    pub fn send(&self, message: SignalingMessage) {
        let _ = self.commands.send(Command::Send(message));
    }

    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// The attempt fence the controller should capture alongside a
    /// `joinAttemptSerial` so it can recognize stale events after a
    /// transport has been superseded internally (reconnect, fallback).
    pub fn current_attempt(&self) -> u64 {
        self.attempt_id.load(Ordering::SeqCst)
    }
}

fn next_transport(kind: TransportKind) -> Option<TransportKind> {
    match kind {
        TransportKind::Ws => Some(TransportKind::Sse),
        TransportKind::Sse => None,
    }
}

fn new_transport(kind: TransportKind, http_client: &reqwest::Client) -> Box<dyn Transport> {
    match kind {
        TransportKind::Ws => Box::new(WsTransport::new()),
        TransportKind::Sse => Box::new(SseTransport::new(http_client.clone())),
    }
}

/// Reports a transport failure and decides what happens next: advance to
/// the next transport in the fallback chain, or -- once the chain is
/// exhausted -- wait out an exponential backoff and restart from the
/// preferred transport (spec.md §4.1's reconnect policy).
async fn on_transport_failed(
    reason: CloseReason,
    kind: &mut TransportKind,
    ws_consecutive_failures: &mut u32,
    reconnect_attempt: &mut u32,
    connected: bool,
    constants: &ResilienceConstants,
    clock: &dyn Clock,
    listener: &dyn SignalingListener,
) {
    if *kind == TransportKind::Ws && !matches!(reason, CloseReason::Unsupported) {
        *ws_consecutive_failures += 1;
    }
    // spec.md §4.1's fallback policy is a plain disjunction: any of these
    // three conditions triggers fallback on its own, independent of whether
    // the others hold.
    let should_fallback = matches!(reason, CloseReason::Timeout | CloseReason::Unsupported)
        || !connected
        || *ws_consecutive_failures >= constants.ws_fallback_consecutive_failures;
    listener.on_disconnected(reason, true);

    if should_fallback {
        if let Some(next) = next_transport(*kind) {
            *kind = next;
            return;
        }
    }

    *reconnect_attempt += 1;
    let delay = constants.reconnect_backoff(*reconnect_attempt);
    *kind = TransportKind::Ws;
    *ws_consecutive_failures = 0;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = clock.schedule(delay, tx);
    let _ = rx.recv().await;
}

async fn run(
    host: String,
    constants: ResilienceConstants,
    clock: Arc<dyn Clock>,
    http_client: reqwest::Client,
    listener: Arc<dyn SignalingListener>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    attempt_id: Arc<AtomicU64>,
    factory: TransportFactory,
) {
    let mut ws_consecutive_failures: u32 = 0;
    let mut reconnect_attempt: u32 = 0;
    let mut kind = TransportKind::Ws;

    'attempts: loop {
        let this_attempt = attempt_id.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("signaling client: attempt {this_attempt} over {kind}");
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let mut transport = factory(kind, &http_client);
        transport.connect(host.clone(), events_tx).await;

        let (timeout_tx, mut timeout_rx) = mpsc::unbounded_channel();
        let mut connect_timer = clock.schedule(constants.connect_timeout, timeout_tx);
        let mut connected = false;
        let mut pong_misses: u32 = 0;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Send(message)) => transport.send(&message),
                        Some(Command::Close) => {
                            transport.close().await;
                            return;
                        }
                        None => {
                            transport.close().await;
                            return;
                        }
                    }
                }
                event = events_rx.recv() => {
                    match event {
                        Some(TransportEvent::Open) => {
                            connected = true;
                            connect_timer.cancel();
                            ws_consecutive_failures = 0;
                            reconnect_attempt = 0;
                            pong_misses = 0;
                            listener.on_connected(kind);
                        }
                        Some(TransportEvent::Message(message)) => {
                            if message.typ == crate::signaling::message::MessageType::Pong {
                                pong_misses = 0;
                            }
                            listener.on_message(message);
                        }
                        Some(TransportEvent::Closed(reason)) => {
                            if matches!(reason, CloseReason::ClientInitiated) {
                                return;
                            }
                            on_transport_failed(
                                reason,
                                &mut kind,
                                &mut ws_consecutive_failures,
                                &mut reconnect_attempt,
                                connected,
                                &constants,
                                clock.as_ref(),
                                listener.as_ref(),
                            )
                            .await;
                            continue 'attempts;
                        }
                        None => {
                            on_transport_failed(
                                CloseReason::Error("transport task ended".to_string()),
                                &mut kind,
                                &mut ws_consecutive_failures,
                                &mut reconnect_attempt,
                                connected,
                                &constants,
                                clock.as_ref(),
                                listener.as_ref(),
                            )
                            .await;
                            continue 'attempts;
                        }
                    }
                }
                _ = timeout_rx.recv() => {
                    if !connected {
                        transport.close().await;
                        on_transport_failed(
                            CloseReason::Timeout,
                            &mut kind,
                            &mut ws_consecutive_failures,
                            &mut reconnect_attempt,
                            connected,
                            &constants,
                            clock.as_ref(),
                            listener.as_ref(),
                        )
                        .await;
                        continue 'attempts;
                    }
                }
                _ = tokio::time::sleep(constants.ping_interval), if connected => {
                    pong_misses += 1;
                    if pong_misses >= constants.pong_miss_threshold {
                        transport.close().await;
                        on_transport_failed(
                            CloseReason::PongTimeout,
                            &mut kind,
                            &mut ws_consecutive_failures,
                            &mut reconnect_attempt,
                            connected,
                            &constants,
                            clock.as_ref(),
                            listener.as_ref(),
                        )
                        .await;
                        continue 'attempts;
                    }
                    transport.send(&SignalingMessage::new(
                        crate::signaling::message::MessageType::Ping,
                    ));
                }
            }
        }
    }
}
