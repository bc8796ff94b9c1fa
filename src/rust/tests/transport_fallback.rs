//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Scenario tests for `SignalingClient`'s transport-selection policy
//! (spec.md §4.1 / §8), driven against scripted transports instead of real
//! WS/SSE sockets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use duocall::clock::TokioClock;
use duocall::constants::ResilienceConstants;
use duocall::signaling::client::{SignalingClient, TransportFactory};
use duocall::signaling::transport::{CloseReason, TransportKind};
use duocall::signaling::{SignalingListener, SignalingMessage};
use duocall::sim::{ScriptedBehavior, ScriptedTransport};

#[derive(Default)]
struct RecordingListener {
    opens: Mutex<Vec<TransportKind>>,
    disconnects: Mutex<Vec<CloseReason>>,
}

impl SignalingListener for RecordingListener {
    fn on_connected(&self, transport: TransportKind) {
        self.opens.lock().unwrap().push(transport);
    }
    fn on_message(&self, _message: SignalingMessage) {}
    fn on_disconnected(&self, reason: CloseReason, _will_retry: bool) {
        self.disconnects.lock().unwrap().push(reason);
    }
}

fn factory_ws_times_out_sse_opens(open_delay: Duration) -> TransportFactory {
    Arc::new(move |kind, _http_client| match kind {
        TransportKind::Ws => Box::new(ScriptedTransport::new(kind, ScriptedBehavior::NeverOpens)),
        TransportKind::Sse => Box::new(ScriptedTransport::new(
            kind,
            ScriptedBehavior::OpensAfter(open_delay),
        )),
    })
}

#[tokio::test(start_paused = true)]
async fn ws_connect_timeout_falls_back_to_sse_which_opens() {
    let listener = Arc::new(RecordingListener::default());
    let client = SignalingClient::connect_with_factory(
        "call.example.com".to_string(),
        ResilienceConstants::default(),
        Arc::new(TokioClock),
        reqwest::Client::new(),
        listener.clone(),
        factory_ws_times_out_sse_opens(Duration::from_millis(300)),
    );

    // CONNECT_TIMEOUT_MS (2s) for the WS attempt, plus the SSE open delay.
    tokio::time::sleep(Duration::from_millis(2_301)).await;

    let opens = listener.opens.lock().unwrap().clone();
    assert_eq!(opens, vec![TransportKind::Sse]);
    client.close();
}

#[tokio::test(start_paused = true)]
async fn ws_failure_before_ever_opening_falls_back_immediately() {
    // spec.md §4.1's fallback policy is a disjunction: a transport that has
    // never successfully opened this session falls back on its very first
    // failure, independent of the WS-specific "3 consecutive failures"
    // clause -- it doesn't need to accumulate failures first.
    let listener = Arc::new(RecordingListener::default());
    let failures = Arc::new(AtomicU32::new(0));
    let failures_for_factory = failures.clone();

    let factory: TransportFactory = Arc::new(move |kind, _http_client| match kind {
        TransportKind::Ws => {
            failures_for_factory.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedTransport::new(kind, ScriptedBehavior::FailsImmediately))
        }
        TransportKind::Sse => Box::new(ScriptedTransport::new(
            kind,
            ScriptedBehavior::OpensAfter(Duration::from_millis(0)),
        )),
    });

    let client = SignalingClient::connect_with_factory(
        "call.example.com".to_string(),
        ResilienceConstants::default(),
        Arc::new(TokioClock),
        reqwest::Client::new(),
        listener.clone(),
        factory,
    );

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(failures.load(Ordering::SeqCst), 1, "must fall back after the first never-opened WS failure");
    let opens = listener.opens.lock().unwrap().clone();
    assert_eq!(opens, vec![TransportKind::Sse]);
    client.close();
}

#[tokio::test(start_paused = true)]
async fn both_transports_unreachable_reconnects_with_backoff_instead_of_giving_up() {
    let listener = Arc::new(RecordingListener::default());
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_factory = attempts.clone();

    let factory: TransportFactory = Arc::new(move |kind, _http_client| {
        attempts_for_factory.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedTransport::new(kind, ScriptedBehavior::FailsImmediately))
    });

    let client = SignalingClient::connect_with_factory(
        "call.example.com".to_string(),
        ResilienceConstants::default(),
        Arc::new(TokioClock),
        reqwest::Client::new(),
        listener.clone(),
        factory,
    );

    // WS fails, SSE fails -> exhausted -> backoff(1) = 500ms -> WS retried.
    tokio::time::sleep(Duration::from_millis(520)).await;
    assert!(
        attempts.load(Ordering::SeqCst) >= 3,
        "client must keep retrying across the WS/SSE chain rather than giving up"
    );
    assert!(listener.opens.lock().unwrap().is_empty());
    client.close();
}

#[tokio::test(start_paused = true)]
async fn client_initiated_close_does_not_trigger_fallback_or_reconnect() {
    let listener = Arc::new(RecordingListener::default());
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_factory = attempts.clone();

    let factory: TransportFactory = Arc::new(move |kind, _http_client| {
        attempts_for_factory.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedTransport::new(kind, ScriptedBehavior::OpensAfter(Duration::ZERO)))
    });

    let client = SignalingClient::connect_with_factory(
        "call.example.com".to_string(),
        ResilienceConstants::default(),
        Arc::new(TokioClock),
        reqwest::Client::new(),
        listener.clone(),
        factory,
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(listener.opens.lock().unwrap().len(), 1);

    client.close();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(
        attempts.load(Ordering::SeqCst),
        1,
        "closing the client must not spawn a reconnect attempt"
    );
}
