//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Test doubles: a `SimulatedMediaEngine` standing in for a real WebRTC
//! backend, in the same spirit as the teacher's `sim` feature providing a
//! simulated media stack so call-control-plane logic can be exercised
//! without real capture/encode/network hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::{CameraMode, ClientId, IceConnectionState, PeerConnectionState, SignalingState};
use crate::error::Result;
use crate::media_engine::{MediaEngine, MediaEngineEvent};
use crate::signaling::message::{MessageType, Participant, RoomState, SignalingMessage, TurnCredentials};
use crate::signaling::transport::{CloseReason, Transport, TransportEvent, TransportKind};

/// A `MediaEngine` that never touches real media or a network. Offers and
/// answers are deterministic placeholder SDP strings tagged with a counter
/// so tests can assert on call/response pairing without parsing real SDP.
pub struct SimulatedMediaEngine {
    events_tx: mpsc::UnboundedSender<MediaEngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<MediaEngineEvent>>>,
    offer_counter: AtomicU64,
    signaling_state: Mutex<SignalingState>,
}

impl SimulatedMediaEngine {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            offer_counter: AtomicU64::new(0),
            signaling_state: Mutex::new(SignalingState::Stable),
        }
    }

    fn set_signaling_state(&self, state: SignalingState) {
        *self.signaling_state.lock().unwrap() = state;
        let _ = self
            .events_tx
            .send(MediaEngineEvent::SignalingStateChanged(state));
    }

    /// Test hook: simulate the remote peer completing ICE, as a real engine
    /// would report asynchronously once connectivity checks succeed.
    pub fn simulate_connected(&self) {
        let _ = self
            .events_tx
            .send(MediaEngineEvent::IceConnectionStateChanged(IceConnectionState::Connected));
        let _ = self
            .events_tx
            .send(MediaEngineEvent::ConnectionStateChanged(PeerConnectionState::Connected));
    }

    /// A cloned handle to this engine's event sender. `take_events` hands the
    /// receiver to the controller and can only be called once, so a test that
    /// needs to keep poking an engine already owned by a running
    /// `CallController` captures this sender instead of the engine itself.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<MediaEngineEvent> {
        self.events_tx.clone()
    }
}

impl Default for SimulatedMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for SimulatedMediaEngine {
    async fn create_offer(&self) -> Result<String> {
        let n = self.offer_counter.fetch_add(1, Ordering::SeqCst);
        self.set_signaling_state(SignalingState::HaveLocalOffer);
        Ok(format!("v=0\r\no=- sim-offer-{n}\r\n"))
    }

    async fn create_answer(&self) -> Result<String> {
        let n = self.offer_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("v=0\r\no=- sim-answer-{n}\r\n"))
    }

    async fn set_local_description(&self, _sdp: String) -> Result<()> {
        Ok(())
    }

    async fn rollback_local_description(&self) -> Result<()> {
        self.set_signaling_state(SignalingState::Stable);
        Ok(())
    }

    async fn set_remote_description(&self, _sdp: String) -> Result<()> {
        self.set_signaling_state(SignalingState::Stable);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        _candidate: String,
        _sdp_mid: Option<String>,
        _sdp_mline_index: Option<u32>,
    ) -> Result<()> {
        Ok(())
    }

    async fn set_ice_servers(&self, _credentials: TurnCredentials) -> Result<()> {
        Ok(())
    }

    async fn restart_ice(&self) -> Result<()> {
        Ok(())
    }

    async fn set_local_audio_enabled(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn set_local_video_enabled(&self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn set_camera_mode(&self, _mode: CameraMode) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let _ = self
            .events_tx
            .send(MediaEngineEvent::ConnectionStateChanged(PeerConnectionState::Closed));
        Ok(())
    }

    fn take_events(&mut self) -> mpsc::UnboundedReceiver<MediaEngineEvent> {
        self.events_rx
            .lock()
            .unwrap()
            .take()
            .expect("take_events called twice")
    }
}

/// A scripted `Transport` double that never touches a socket: immediately
/// opens, never opens (relying on the caller's connect-timeout), or fails
/// with a fixed reason. Stands in for `WsTransport`/`SseTransport` in
/// fallback-policy tests, the same role `SimulatedMediaEngine` plays for a
/// real WebRTC backend.
#[derive(Clone, Copy, Debug)]
pub enum ScriptedBehavior {
    OpensAfter(Duration),
    NeverOpens,
    FailsImmediately,
}

pub struct ScriptedTransport {
    kind: TransportKind,
    behavior: ScriptedBehavior,
}

impl ScriptedTransport {
    pub fn new(kind: TransportKind, behavior: ScriptedBehavior) -> Self {
        Self { kind, behavior }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self, _host: String, events: mpsc::UnboundedSender<TransportEvent>) {
        match self.behavior {
            ScriptedBehavior::OpensAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(TransportEvent::Open);
                });
            }
            ScriptedBehavior::NeverOpens => {}
            ScriptedBehavior::FailsImmediately => {
                let _ = events.send(TransportEvent::Closed(CloseReason::Error(
                    "scripted failure".to_string(),
                )));
            }
        }
    }

    fn send(&mut self, _message: &SignalingMessage) {}

    async fn close(&mut self) {}
}

struct ClientConn {
    cid: Option<ClientId>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

/// An in-process rendezvous server standing in for the real signaling
/// backend: assigns `cid`s on `join`, broadcasts `room_state` whenever the
/// roster changes, and forwards `offer`/`answer`/`ice`/`turn-refresh` to the
/// other connected peer. The first client to join becomes `hostCid`.
///
/// Used by `tests/call_controller.rs` to drive two `CallController`s
/// through a full join/offer/answer/ICE exchange without a real network,
/// the signaling-layer analogue of `SimulatedMediaEngine`.
pub struct FakeSignalingServer {
    next_cid: AtomicU64,
    host_cid: Mutex<Option<ClientId>>,
    conns: Mutex<Vec<Option<ClientConn>>>,
}

impl FakeSignalingServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_cid: AtomicU64::new(0),
            host_cid: Mutex::new(None),
            conns: Mutex::new(Vec::new()),
        })
    }

    /// Returns a `Transport` factory bound to this server, ignoring
    /// `TransportKind` (the loopback server has no concept of WS vs SSE --
    /// every attempt "opens" against the same in-process roster).
    pub fn factory(self: &Arc<Self>) -> crate::signaling::client::TransportFactory {
        let server = self.clone();
        Arc::new(move |kind, _http_client| {
            Box::new(LoopbackTransport {
                kind,
                server: server.clone(),
                conn_id: None,
            })
        })
    }

    fn register(&self, events_tx: mpsc::UnboundedSender<TransportEvent>) -> usize {
        let mut conns = self.conns.lock().unwrap();
        conns.push(Some(ClientConn { cid: None, events_tx }));
        conns.len() - 1
    }

    fn unregister(&self, id: usize) {
        let cid = {
            let mut conns = self.conns.lock().unwrap();
            conns.get_mut(id).and_then(|slot| slot.take()).and_then(|c| c.cid)
        };
        if cid.is_some() {
            self.broadcast_room_state();
        }
    }

    fn participants(&self) -> Vec<Participant> {
        self.conns
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter_map(|c| c.cid.clone())
            .map(|cid| Participant { cid, joined_at: None })
            .collect()
    }

    fn broadcast_room_state(&self) {
        let Some(host_cid) = self.host_cid.lock().unwrap().clone() else {
            return;
        };
        let rs = RoomState {
            host_cid,
            participants: self.participants(),
        };
        let message = SignalingMessage::new(MessageType::RoomState)
            .with_payload(serde_json::to_value(rs).unwrap());
        let conns = self.conns.lock().unwrap();
        for conn in conns.iter().flatten().filter(|c| c.cid.is_some()) {
            let _ = conn.events_tx.send(TransportEvent::Message(message.clone()));
        }
    }

    fn on_client_message(&self, sender_id: usize, message: SignalingMessage) {
        match message.typ {
            MessageType::Join => {
                let n = self.next_cid.fetch_add(1, Ordering::SeqCst);
                let cid = ClientId(format!("sim-cid-{n}"));
                {
                    let mut host = self.host_cid.lock().unwrap();
                    if host.is_none() {
                        *host = Some(cid.clone());
                    }
                }
                let reply_tx = {
                    let mut conns = self.conns.lock().unwrap();
                    let Some(Some(conn)) = conns.get_mut(sender_id) else {
                        return;
                    };
                    conn.cid = Some(cid.clone());
                    conn.events_tx.clone()
                };
                let rs = RoomState {
                    host_cid: self.host_cid.lock().unwrap().clone().unwrap(),
                    participants: self.participants(),
                };
                let mut joined = SignalingMessage::new(MessageType::Joined)
                    .with_payload(serde_json::to_value(rs).unwrap());
                joined.cid = Some(cid);
                let _ = reply_tx.send(TransportEvent::Message(joined));
                self.broadcast_room_state();
            }
            MessageType::Leave => {
                let mut conns = self.conns.lock().unwrap();
                if let Some(Some(conn)) = conns.get_mut(sender_id) {
                    conn.cid = None;
                }
                drop(conns);
                self.broadcast_room_state();
            }
            MessageType::Ping => {
                let conns = self.conns.lock().unwrap();
                if let Some(Some(conn)) = conns.get(sender_id) {
                    let _ = conn.events_tx.send(TransportEvent::Message(SignalingMessage::new(
                        MessageType::Pong,
                    )));
                }
            }
            MessageType::Offer
            | MessageType::Answer
            | MessageType::Ice
            | MessageType::TurnRefresh => {
                let conns = self.conns.lock().unwrap();
                for (id, conn) in conns.iter().enumerate() {
                    if id == sender_id {
                        continue;
                    }
                    if let Some(conn) = conn {
                        if conn.cid.is_some() {
                            let _ = conn.events_tx.send(TransportEvent::Message(message.clone()));
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

struct LoopbackTransport {
    kind: TransportKind,
    server: Arc<FakeSignalingServer>,
    conn_id: Option<usize>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self, _host: String, events: mpsc::UnboundedSender<TransportEvent>) {
        let id = self.server.register(events.clone());
        self.conn_id = Some(id);
        let _ = events.send(TransportEvent::Open);
    }

    fn send(&mut self, message: &SignalingMessage) {
        if let Some(id) = self.conn_id {
            self.server.on_client_message(id, message.clone());
        }
    }

    async fn close(&mut self) {
        if let Some(id) = self.conn_id.take() {
            self.server.unregister(id);
        }
    }
}
