//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! `CallController`: the central state machine. Owns the `MediaEngine` and
//! `SignalingClient` instances exclusively, drives the join/renegotiation/
//! ICE-restart protocol, and publishes `UiState` snapshots.
//!
//! Realized as a single `tokio::spawn`ed task reading one `ControllerEvent`
//! stream fed by public commands, the signaling client, the media engine,
//! and the timer table -- "single-threaded cooperative event loop" becomes
//! "all mutation happens inside one task's event-handling loop", the same
//! shape as the teacher's `core::call_manager` internal actor.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::api_client::{ApiClient, PushKind};
use crate::clock::Clock;
use crate::common::ui_state::UiStateStore;
use crate::common::{
    ActiveTransport, CallPhase, CameraMode, ClientId, ReconnectToken, RoomId, SignalingState, UiState,
};
use crate::constants::ResilienceConstants;
use crate::controller::participants::{update_participants, ParticipantAction};
use crate::controller::timers::{TimerName, TimerTable};
use crate::deep_link::TrustedHosts;
use crate::media_engine::{MediaEngine, MediaEngineEvent};
use crate::persistence::{self, PersistentStore, RecentCall};
use crate::signaling::client::{SignalingClient, SignalingListener, TransportFactory};
use crate::signaling::message::{
    IceCandidatePayload, IcePayload, JoinCapabilities, JoinPayload, JoinedExtras, MessageType,
    RoomState, SdpPayload, SignalingMessage, TurnCredentials,
};
use crate::signaling::transport::{CloseReason, TransportKind};

pub type MediaEngineFactory = Arc<dyn Fn() -> Box<dyn MediaEngine> + Send + Sync>;

/// Deployment-varying configuration, constructed directly by the
/// presentation layer rather than parsed from a config file.
pub struct CallControllerConfig {
    pub default_host: String,
    pub trusted_hosts: TrustedHosts,
    pub default_mic_enabled: bool,
    pub default_cam_enabled: bool,
    pub constants: ResilienceConstants,
}

#[derive(Debug)]
enum ControllerCommand {
    JoinRoom {
        room_id: RoomId,
        one_off_host: Option<String>,
    },
    Leave,
    EndRoom,
    SetLocalAudioEnabled(bool),
    SetLocalVideoEnabled(bool),
    SetCameraMode(CameraMode),
    WatchRooms(Vec<RoomId>),
}

enum SignalingEvent {
    Connected(TransportKind),
    Message(SignalingMessage),
    Disconnected(CloseReason),
}

enum ControllerEvent {
    Command(ControllerCommand),
    Signaling(SignalingEvent),
    Media(MediaEngineEvent),
    TimerFired(TimerName),
}

struct ListenerBridge(mpsc::UnboundedSender<ControllerEvent>);

impl SignalingListener for ListenerBridge {
    fn on_connected(&self, transport: TransportKind) {
        let _ = self
            .0
            .send(ControllerEvent::Signaling(SignalingEvent::Connected(transport)));
    }

    fn on_message(&self, message: SignalingMessage) {
        let _ = self
            .0
            .send(ControllerEvent::Signaling(SignalingEvent::Message(message)));
    }

    fn on_disconnected(&self, reason: CloseReason, _will_retry: bool) {
        let _ = self
            .0
            .send(ControllerEvent::Signaling(SignalingEvent::Disconnected(reason)));
    }
}

/// A handle to a running controller. Cloning shares the same underlying
/// task; `UiState` is observed through `subscribe`/`snapshot` regardless of
/// how many handles exist.
#[derive(Clone)]
pub struct CallController {
    events: mpsc::UnboundedSender<ControllerEvent>,
    ui: Arc<UiStateStore>,
}

impl CallController {
    pub fn new(
        config: CallControllerConfig,
        api_client: Arc<dyn ApiClient>,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        http_client: reqwest::Client,
        media_engine_factory: MediaEngineFactory,
    ) -> Self {
        Self::new_with_transport_factory(
            config,
            api_client,
            store,
            clock,
            http_client,
            media_engine_factory,
            None,
        )
    }

    /// Same as [`Self::new`], but with the signaling transport construction
    /// swapped out. Production callers should use [`Self::new`] (real
    /// WS/SSE transports); tests pass a scripted or loopback factory (see
    /// [`crate::sim::FakeSignalingServer`]) so the full join/offer/ICE
    /// protocol can be driven without a network.
    pub fn new_with_transport_factory(
        config: CallControllerConfig,
        api_client: Arc<dyn ApiClient>,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        http_client: reqwest::Client,
        media_engine_factory: MediaEngineFactory,
        transport_factory: Option<TransportFactory>,
    ) -> Self {
        let ui = Arc::new(UiStateStore::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ControllerEvent>();

        let (timer_fire_tx, mut timer_fire_rx) = mpsc::unbounded_channel::<TimerName>();
        let forward_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(name) = timer_fire_rx.recv().await {
                if forward_tx
                    .send(ControllerEvent::TimerFired(name))
                    .is_err()
                {
                    return;
                }
            }
        });

        let state = RunState {
            config,
            api_client,
            store,
            clock,
            http_client,
            media_engine_factory,
            transport_factory,
            ui: ui.clone(),
            events_tx: events_tx.clone(),
            timer_fire_tx,
            timers: TimerTable::new(),
            signaling: None,
            media: None,
            join_attempt_serial: 0,
            current_room_id: None,
            one_off_host: None,
            client_id: None,
            reconnect_token: None,
            has_join_acknowledged: false,
            is_host: false,
            sent_offer: false,
            is_making_offer: false,
            pending_ice_restart: false,
            last_ice_restart_at: None,
            has_remote_description: false,
            ice_candidate_buffer: VecDeque::new(),
            non_host_fallback_attempts: 0,
            turn_token_seen: None,
            call_start_at: None,
            signaling_connected: false,
            watched_room_ids: HashSet::new(),
            participant_count: 0,
            signaling_state: SignalingState::Stable,
        };

        tokio::spawn(run(state, events_rx));

        Self { events: events_tx, ui }
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui.subscribe()
    }

    pub fn snapshot(&self) -> UiState {
        self.ui.snapshot()
    }

    pub fn join_room(&self, room_id: RoomId, one_off_host: Option<String>) {
        self.send(ControllerCommand::JoinRoom {
            room_id,
            one_off_host,
        });
    }

    pub fn leave(&self) {
        self.send(ControllerCommand::Leave);
    }

    pub fn end_room(&self) {
        self.send(ControllerCommand::EndRoom);
    }

    pub fn set_local_audio_enabled(&self, enabled: bool) {
        self.send(ControllerCommand::SetLocalAudioEnabled(enabled));
    }

    pub fn set_local_video_enabled(&self, enabled: bool) {
        self.send(ControllerCommand::SetLocalVideoEnabled(enabled));
    }

    pub fn set_camera_mode(&self, mode: CameraMode) {
        self.send(ControllerCommand::SetCameraMode(mode));
    }

    pub fn watch_rooms(&self, rooms: Vec<RoomId>) {
        self.send(ControllerCommand::WatchRooms(rooms));
    }

    fn send(&self, command: ControllerCommand) {
        let _ = self.events.send(ControllerEvent::Command(command));
    }
}

/// All controller mutable state. Lives entirely inside the task spawned by
/// `CallController::new`; nothing outside this module ever touches it, so
/// no lock is needed despite many collaborators feeding it events.
struct RunState {
    config: CallControllerConfig,
    api_client: Arc<dyn ApiClient>,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    http_client: reqwest::Client,
    media_engine_factory: MediaEngineFactory,
    transport_factory: Option<TransportFactory>,
    ui: Arc<UiStateStore>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    timer_fire_tx: mpsc::UnboundedSender<TimerName>,
    timers: TimerTable,

    signaling: Option<SignalingClient>,
    media: Option<Box<dyn MediaEngine>>,

    join_attempt_serial: u64,
    current_room_id: Option<RoomId>,
    one_off_host: Option<String>,
    client_id: Option<ClientId>,
    reconnect_token: Option<ReconnectToken>,
    has_join_acknowledged: bool,
    is_host: bool,
    sent_offer: bool,
    is_making_offer: bool,
    pending_ice_restart: bool,
    last_ice_restart_at: Option<Instant>,
    has_remote_description: bool,
    ice_candidate_buffer: VecDeque<IceCandidatePayload>,
    non_host_fallback_attempts: u32,
    turn_token_seen: Option<String>,
    call_start_at: Option<Instant>,
    signaling_connected: bool,
    watched_room_ids: HashSet<RoomId>,
    participant_count: usize,
    signaling_state: SignalingState,
}

async fn run(mut state: RunState, mut events_rx: mpsc::UnboundedReceiver<ControllerEvent>) {
    while let Some(event) = events_rx.recv().await {
        state.handle_event(event).await;
    }
}

impl RunState {
    fn active_host(&self) -> String {
        self.one_off_host
            .clone()
            .unwrap_or_else(|| self.config.default_host.clone())
    }

    /// Applies the deep-link host policy (spec.md §4.4): a trusted host
    /// becomes the new persisted default and this join carries no one-off
    /// override; an untrusted host is used for this call only.
    async fn resolve_join_host(&mut self, host: Option<String>) -> Option<String> {
        use crate::deep_link::HostPolicy;
        let Some(host) = host else {
            return None;
        };
        match self.config.trusted_hosts.resolve_policy(Some(&host)) {
            HostPolicy::PersistAsDefault => {
                self.config.default_host = host.clone();
                if let Err(err) = self.store.set("duocall.default_host", host).await {
                    debug!("call controller: failed to persist default host: {err}");
                }
                None
            }
            HostPolicy::OneOffOnly => Some(host),
        }
    }

    fn schedule(&mut self, name: TimerName, delay: Duration) {
        self.timers
            .schedule(self.clock.as_ref(), name, delay, self.timer_fire_tx.clone());
    }

    async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Command(cmd) => self.handle_command(cmd).await,
            ControllerEvent::Signaling(event) => self.handle_signaling_event(event).await,
            ControllerEvent::Media(event) => self.handle_media_event(event).await,
            ControllerEvent::TimerFired(name) => self.handle_timer(name).await,
        }
    }

    async fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::JoinRoom {
                room_id,
                one_off_host,
            } => self.join_room(room_id, one_off_host).await,
            ControllerCommand::Leave => {
                self.send_signaling(SignalingMessage::new(MessageType::Leave));
                self.cleanup_call(Some("left".to_string())).await;
            }
            ControllerCommand::EndRoom => {
                self.send_signaling(SignalingMessage::new(MessageType::EndRoom));
                self.cleanup_call(Some("ended".to_string())).await;
            }
            ControllerCommand::SetLocalAudioEnabled(enabled) => {
                self.ui.update(|s| s.local_audio_enabled = enabled);
                if let Some(media) = &self.media {
                    if let Err(err) = media.set_local_audio_enabled(enabled).await {
                        warn!("call controller: set_local_audio_enabled failed: {err}");
                    }
                }
            }
            ControllerCommand::SetLocalVideoEnabled(enabled) => {
                self.ui.update(|s| s.local_video_enabled = enabled);
                if let Some(media) = &self.media {
                    if let Err(err) = media.set_local_video_enabled(enabled).await {
                        warn!("call controller: set_local_video_enabled failed: {err}");
                    }
                }
            }
            ControllerCommand::SetCameraMode(mode) => {
                self.ui.update(|s| {
                    s.local_camera_mode = mode;
                    s.is_front_camera = mode == CameraMode::Front;
                });
                if let Some(media) = &self.media {
                    if let Err(err) = media.set_camera_mode(mode).await {
                        warn!("call controller: set_camera_mode failed: {err}");
                    }
                }
            }
            ControllerCommand::WatchRooms(rooms) => {
                self.watched_room_ids = rooms.iter().cloned().collect();
                if self.signaling.is_none() && !self.watched_room_ids.is_empty() {
                    self.open_signaling_for_watching().await;
                }
                if let Some(signaling) = &self.signaling {
                    signaling.send(
                        SignalingMessage::new(MessageType::WatchRooms)
                            .with_payload(serde_json::json!({ "rids": rooms })),
                    );
                }
            }
        }
    }

    /// §4.2.1 join sequence.
    async fn join_room(&mut self, room_id: RoomId, one_off_host: Option<String>) {
        if self.current_room_id.is_some() {
            warn!("call controller: join_room called while a call is already active");
        }

        self.reset_per_call_state();
        self.join_attempt_serial += 1;
        self.current_room_id = Some(room_id.clone());
        self.one_off_host = self.resolve_join_host(one_off_host).await;
        self.call_start_at = Some(self.clock.now());

        let mut media = (self.media_engine_factory)();
        let media_events = media.take_events();
        self.media = Some(media);
        self.spawn_media_event_forwarder(media_events);

        self.ui.update(|s| {
            s.phase = CallPhase::Joining;
            s.room_id = Some(room_id.clone());
            s.local_audio_enabled = self.config.default_mic_enabled;
            s.local_video_enabled = self.config.default_cam_enabled;
            s.error_message = None;
            s.status_message = None;
        });

        if let Some(media) = &self.media {
            let _ = media.set_local_audio_enabled(self.config.default_mic_enabled).await;
            let _ = media.set_local_video_enabled(self.config.default_cam_enabled).await;
        }

        self.schedule(
            TimerName::JoinKickstart,
            self.config.constants.join_connect_kickstart,
        );
        self.schedule(
            TimerName::JoinHardTimeout,
            self.config.constants.join_hard_timeout,
        );

        self.ensure_signaling_connected();
    }

    fn reset_per_call_state(&mut self) {
        self.timers.cancel_all();
        self.current_room_id = None;
        self.one_off_host = None;
        self.client_id = None;
        self.reconnect_token = None;
        self.has_join_acknowledged = false;
        self.is_host = false;
        self.sent_offer = false;
        self.is_making_offer = false;
        self.pending_ice_restart = false;
        self.last_ice_restart_at = None;
        self.has_remote_description = false;
        self.ice_candidate_buffer.clear();
        self.non_host_fallback_attempts = 0;
        self.turn_token_seen = None;
        self.call_start_at = None;
        self.participant_count = 0;
        self.signaling_state = SignalingState::Stable;
    }

    fn ensure_signaling_connected(&mut self) {
        if self.signaling.is_some() {
            self.send_join();
            return;
        }
        self.signaling = Some(self.connect_signaling());
    }

    fn connect_signaling(&self) -> SignalingClient {
        let host = self.active_host();
        let listener = Arc::new(ListenerBridge(self.events_tx.clone()));
        match &self.transport_factory {
            Some(factory) => SignalingClient::connect_with_factory(
                host,
                self.config.constants,
                self.clock.clone(),
                self.http_client.clone(),
                listener,
                factory.clone(),
            ),
            None => SignalingClient::connect(
                host,
                self.config.constants,
                self.clock.clone(),
                self.http_client.clone(),
                listener,
            ),
        }
    }

    fn send_join(&mut self) {
        let Some(room_id) = self.current_room_id.clone() else {
            return;
        };
        let payload = JoinPayload {
            device: "duocall".to_string(),
            capabilities: JoinCapabilities { trickle_ice: true },
            reconnect_cid: self.client_id.clone(),
            reconnect_token: self.reconnect_token.clone(),
        };
        let message = SignalingMessage::new(MessageType::Join)
            .with_rid(room_id)
            .with_payload(serde_json::to_value(payload).unwrap_or_default());
        self.send_signaling(message);
        self.schedule(TimerName::JoinRecovery, self.config.constants.join_recovery);
    }

    fn send_signaling(&self, message: SignalingMessage) {
        if let Some(signaling) = &self.signaling {
            signaling.send(message);
        }
    }

    async fn open_signaling_for_watching(&mut self) {
        self.signaling = Some(self.connect_signaling());
    }

    async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected(transport) => {
                self.signaling_connected = true;
                self.ui.update(|s| {
                    s.is_signaling_connected = true;
                    s.active_transport = Some(match transport {
                        TransportKind::Ws => ActiveTransport::Ws,
                        TransportKind::Sse => ActiveTransport::Sse,
                    });
                    s.is_reconnecting = false;
                });
                if self.current_room_id.is_some() && !self.has_join_acknowledged {
                    self.send_join();
                }
                self.maybe_send_offer(false, false, false).await;
            }
            SignalingEvent::Message(message) => self.handle_signaling_message(message).await,
            SignalingEvent::Disconnected(_reason) => {
                self.signaling_connected = false;
                self.ui.update(|s| {
                    s.is_signaling_connected = false;
                    s.is_reconnecting = self.current_room_id.is_some()
                        || !self.watched_room_ids.is_empty();
                });
            }
        }
    }

    async fn handle_signaling_message(&mut self, message: SignalingMessage) {
        match message.typ {
            MessageType::Joined => self.on_joined(message).await,
            MessageType::RoomState => self.on_room_state(message).await,
            MessageType::RoomEnded => {
                self.cleanup_call(Some("room_ended".to_string())).await;
            }
            MessageType::Offer => self.on_offer(message).await,
            MessageType::Answer => self.on_answer(message).await,
            MessageType::Ice => self.on_ice(message).await,
            MessageType::TurnRefreshed => self.on_turn_refreshed(message).await,
            MessageType::RoomStatuses | MessageType::RoomStatusUpdate => {
                // Room occupancy is consumed by `RoomOccupancyTracker`, owned
                // by the presentation layer; the controller only forwards
                // watched-room traffic, it doesn't track occupancy itself.
            }
            MessageType::Error => {
                if let Some(reason) = message.payload_as::<serde_json::Value>() {
                    let text = reason
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("server error")
                        .to_string();
                    self.fail_call(text).await;
                } else {
                    self.fail_call("server error".to_string()).await;
                }
            }
            MessageType::Ping | MessageType::Pong | MessageType::Join | MessageType::Leave
            | MessageType::EndRoom | MessageType::WatchRooms | MessageType::TurnRefresh => {}
        }
    }

    async fn on_joined(&mut self, message: SignalingMessage) {
        self.timers.cancel(TimerName::JoinKickstart);
        self.timers.cancel(TimerName::JoinRecovery);
        self.has_join_acknowledged = true;

        if let Some(cid) = &message.cid {
            self.client_id = Some(cid.clone());
            if let Err(err) = self
                .store
                .set("duocall.reconnect_cid", cid.0.clone())
                .await
            {
                debug!("call controller: failed to persist reconnect cid: {err}");
            }
        }

        if let Some(extras) = message.payload_as::<JoinedExtras>() {
            if let Some(token) = extras.reconnect_token {
                self.reconnect_token = Some(token);
            }
            if let Some(turn_token) = extras.turn_token {
                self.handle_turn_token(turn_token, extras.turn_token_ttl_ms).await;
            }
        }

        if let Some(rs) = message.payload_as::<RoomState>() {
            self.apply_room_state(rs).await;
        } else {
            self.ui.update(|s| {
                if s.phase == CallPhase::Joining {
                    s.phase = CallPhase::Waiting;
                }
            });
        }
    }

    async fn on_room_state(&mut self, message: SignalingMessage) {
        if let Some(rs) = message.payload_as::<RoomState>() {
            self.apply_room_state(rs).await;
        }
    }

    async fn apply_room_state(&mut self, rs: RoomState) {
        let Some(our_cid) = self.client_id.clone() else {
            return;
        };
        let update = update_participants(&rs, &our_cid);
        self.is_host = update.is_host;
        self.participant_count = update.participant_count;
        self.ui.update(|s| {
            s.phase = update.phase;
            s.participant_count = update.participant_count;
            s.is_host = update.is_host;
        });

        match update.action {
            ParticipantAction::ResetPeerSession => {
                self.sent_offer = false;
                self.has_remote_description = false;
                self.signaling_state = SignalingState::Stable;
                self.ice_candidate_buffer.clear();
                self.timers.cancel(TimerName::OfferTimeout);
                self.timers.cancel(TimerName::IceRestart);
                self.timers.cancel(TimerName::NonHostFallback);
                self.non_host_fallback_attempts = 0;
                if let Some(media) = &self.media {
                    let _ = media.close().await;
                }
            }
            ParticipantAction::MaybeSendOffer => {
                self.maybe_send_offer(false, false, false).await;
            }
            ParticipantAction::ArmNonHostFallback => {
                self.schedule(
                    TimerName::NonHostFallback,
                    self.config.constants.non_host_fallback_delay,
                );
            }
        }
    }

    /// §4.2.4 `maybeSendOffer`. `allow_non_host` is set only by the non-host
    /// offer fallback (§4.2.5): every other caller requires `is_host`.
    async fn maybe_send_offer(&mut self, force: bool, ice_restart: bool, allow_non_host: bool) {
        let can_offer = (self.is_host || allow_non_host)
            && self.current_room_id.is_some()
            && self.media.is_some()
            && self.signaling_connected
            && self.participant_count > 1
            && self.signaling_state == SignalingState::Stable;
        if !can_offer || (self.is_making_offer && !force) {
            if ice_restart {
                self.pending_ice_restart = true;
            }
            return;
        }

        self.is_making_offer = true;
        let offer = match &self.media {
            Some(media) => media.create_offer().await,
            None => return,
        };
        self.is_making_offer = false;

        match offer {
            Ok(sdp) => {
                if let Some(media) = &self.media {
                    if let Err(err) = media.set_local_description(sdp.clone()).await {
                        warn!("call controller: set_local_description failed: {err}");
                        return;
                    }
                }
                self.send_signaling(
                    SignalingMessage::new(MessageType::Offer)
                        .with_payload(serde_json::to_value(SdpPayload { sdp }).unwrap_or_default()),
                );
                self.sent_offer = true;
                self.pending_ice_restart = false;
                self.signaling_state = SignalingState::HaveLocalOffer;
                self.schedule(TimerName::OfferTimeout, self.config.constants.offer_timeout);
            }
            Err(err) => warn!("call controller: create_offer failed: {err}"),
        }
    }

    async fn on_offer(&mut self, message: SignalingMessage) {
        let Some(payload) = message.payload_as::<SdpPayload>() else {
            return;
        };
        let Some(media) = &self.media else { return };
        if let Err(err) = media.set_remote_description(payload.sdp).await {
            warn!("call controller: set_remote_description (offer) failed: {err}");
            return;
        }
        self.signaling_state = SignalingState::Stable;
        self.has_remote_description = true;
        self.flush_ice_candidates().await;
        self.timers.cancel(TimerName::NonHostFallback);

        let answer = media.create_answer().await;
        match answer {
            Ok(sdp) => {
                if let Err(err) = media.set_local_description(sdp.clone()).await {
                    warn!("call controller: set_local_description (answer) failed: {err}");
                    return;
                }
                self.send_signaling(
                    SignalingMessage::new(MessageType::Answer)
                        .with_payload(serde_json::to_value(SdpPayload { sdp }).unwrap_or_default()),
                );
            }
            Err(err) => warn!("call controller: create_answer failed: {err}"),
        }
    }

    async fn on_answer(&mut self, message: SignalingMessage) {
        let Some(payload) = message.payload_as::<SdpPayload>() else {
            return;
        };
        let Some(media) = &self.media else { return };
        if let Err(err) = media.set_remote_description(payload.sdp).await {
            warn!("call controller: set_remote_description (answer) failed: {err}");
            return;
        }
        self.signaling_state = SignalingState::Stable;
        self.has_remote_description = true;
        self.timers.cancel(TimerName::OfferTimeout);
        self.pending_ice_restart = false;
        self.flush_ice_candidates().await;
        self.timers.cancel(TimerName::NonHostFallback);
    }

    async fn on_ice(&mut self, message: SignalingMessage) {
        let Some(payload) = message.payload_as::<IcePayload>() else {
            return;
        };
        if !self.has_remote_description {
            if self.ice_candidate_buffer.len() >= self.config.constants.ice_candidate_buffer_max {
                self.ice_candidate_buffer.pop_front();
            }
            self.ice_candidate_buffer.push_back(payload.candidate);
            return;
        }
        self.apply_ice_candidate(payload.candidate).await;
    }

    async fn apply_ice_candidate(&mut self, candidate: IceCandidatePayload) {
        if let Some(media) = &self.media {
            if let Err(err) = media
                .add_ice_candidate(candidate.candidate, candidate.sdp_mid, candidate.sdp_mline_index)
                .await
            {
                warn!("call controller: add_ice_candidate failed: {err}");
            }
        }
    }

    async fn flush_ice_candidates(&mut self) {
        let buffered: Vec<_> = self.ice_candidate_buffer.drain(..).collect();
        for candidate in buffered {
            self.apply_ice_candidate(candidate).await;
        }
    }

    /// §4.2.4 `scheduleIceRestart`.
    async fn schedule_ice_restart(&mut self, delay: Duration) {
        let can_offer = self.is_host && self.media.is_some() && self.signaling_connected;
        if !can_offer {
            self.pending_ice_restart = true;
            return;
        }
        if let Some(last) = self.last_ice_restart_at {
            if self.clock.now().duration_since(last) < self.config.constants.ice_restart_cooldown {
                return;
            }
        }
        self.schedule(TimerName::IceRestart, delay);
    }

    async fn trigger_ice_restart(&mut self) {
        self.last_ice_restart_at = Some(self.clock.now());
        if let Some(media) = &self.media {
            let _ = media.restart_ice().await;
        }
        self.maybe_send_offer(true, true, false).await;
    }

    async fn handle_turn_token(&mut self, token: String, ttl_ms: Option<u64>) {
        if self.turn_token_seen.as_deref() == Some(token.as_str()) {
            return;
        }
        self.turn_token_seen = Some(token.clone());
        if let Some(ttl_ms) = ttl_ms {
            let trigger = Duration::from_millis(
                (ttl_ms as f64 * self.config.constants.turn_refresh_trigger_ratio) as u64,
            );
            self.schedule(TimerName::TurnRefresh, trigger);
        }

        match self.api_client.fetch_turn(&token).await {
            Ok(credentials) => self.apply_turn_credentials(credentials).await,
            Err(err) => debug!("call controller: turn fetch failed, staying on STUN only: {err}"),
        }
    }

    async fn apply_turn_credentials(&mut self, credentials: TurnCredentials) {
        if let Some(media) = &self.media {
            let _ = media.set_ice_servers(credentials).await;
        }
        self.flush_ice_candidates().await;
        self.maybe_send_offer(false, false, false).await;
        if self.current_room_id.is_some() && !self.is_host {
            self.schedule(
                TimerName::NonHostFallback,
                self.config.constants.non_host_fallback_delay,
            );
        }
    }

    async fn on_turn_refreshed(&mut self, message: SignalingMessage) {
        if let Some(extras) = message.payload_as::<JoinedExtras>() {
            if let Some(token) = extras.turn_token {
                self.turn_token_seen = None;
                self.handle_turn_token(token, extras.turn_token_ttl_ms).await;
            }
        }
    }

    async fn handle_media_event(&mut self, event: MediaEngineEvent) {
        match event {
            MediaEngineEvent::IceConnectionStateChanged(state) => {
                self.ui.update(|s| s.ice_connection_state = state);
            }
            MediaEngineEvent::ConnectionStateChanged(state) => {
                self.ui.update(|s| s.connection_state = state);
                match state {
                    crate::common::PeerConnectionState::Connected => {
                        self.timers.cancel(TimerName::IceRestart);
                        self.pending_ice_restart = false;
                        self.ui.update(|s| {
                            if s.phase == CallPhase::Joining {
                                s.phase = CallPhase::InCall;
                            }
                        });
                    }
                    crate::common::PeerConnectionState::Disconnected => {
                        self.schedule_ice_restart(Duration::from_secs(2)).await;
                    }
                    crate::common::PeerConnectionState::Failed => {
                        self.schedule_ice_restart(Duration::from_secs(0)).await;
                    }
                    _ => {}
                }
            }
            MediaEngineEvent::SignalingStateChanged(state) => {
                self.signaling_state = state;
                self.ui.update(|s| s.signaling_state = state);
                if state == crate::common::SignalingState::Stable {
                    self.timers.cancel(TimerName::OfferTimeout);
                    if self.pending_ice_restart {
                        self.trigger_ice_restart().await;
                    }
                }
            }
            MediaEngineEvent::LocalIceCandidateGathered {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.send_signaling(
                    SignalingMessage::new(MessageType::Ice).with_payload(
                        serde_json::to_value(IcePayload {
                            candidate: IceCandidatePayload {
                                candidate,
                                sdp_mid,
                                sdp_mline_index,
                            },
                        })
                        .unwrap_or_default(),
                    ),
                );
            }
            MediaEngineEvent::RenegotiationNeeded => {
                self.maybe_send_offer(true, false, false).await;
            }
            MediaEngineEvent::RemoteVideoTrackStateChanged(enabled) => {
                self.ui.update(|s| s.remote_video_enabled = enabled);
            }
            MediaEngineEvent::RealtimeStatsUpdated(stats) => {
                self.ui.update(|s| s.realtime_stats = Some(stats));
            }
            MediaEngineEvent::Error(message) => {
                warn!("call controller: media engine error: {message}");
            }
        }
    }

    async fn handle_timer(&mut self, name: TimerName) {
        match name {
            TimerName::JoinKickstart => {
                if self.signaling.is_none() {
                    self.ensure_signaling_connected();
                }
            }
            TimerName::JoinHardTimeout => {
                self.fail_call("connection_failed".to_string()).await;
            }
            TimerName::JoinRecovery => {
                if !self.has_join_acknowledged && self.signaling_connected {
                    self.send_join();
                } else if self.has_join_acknowledged {
                    self.ui.update(|s| {
                        if s.phase == CallPhase::Joining {
                            s.phase = CallPhase::Waiting;
                        }
                    });
                }
            }
            TimerName::OfferTimeout => {
                if self.signaling_state == SignalingState::HaveLocalOffer {
                    if let Some(media) = &self.media {
                        let _ = media.rollback_local_description().await;
                    }
                    self.signaling_state = SignalingState::Stable;
                }
                self.schedule_ice_restart(Duration::from_secs(0)).await;
            }
            TimerName::IceRestart => self.trigger_ice_restart().await,
            TimerName::NonHostFallback => {
                if self.non_host_fallback_attempts >= self.config.constants.non_host_fallback_max_attempts
                {
                    return;
                }
                let eligible = !self.is_host
                    && self.signaling_connected
                    && self.media.is_some()
                    && !self.has_remote_description;
                if eligible {
                    self.non_host_fallback_attempts += 1;
                    self.maybe_send_offer(true, false, true).await;
                }
            }
            TimerName::TurnRefresh => {
                self.send_signaling(SignalingMessage::new(MessageType::TurnRefresh));
            }
        }
    }

    async fn fail_call(&mut self, reason: String) {
        self.ui.update(|s| {
            s.phase = CallPhase::Error;
            s.error_message = Some(reason.clone());
        });
        self.cleanup_call(None).await;
    }

    /// §4.2.8 `cleanupCall`.
    async fn cleanup_call(&mut self, status_message: Option<String>) {
        self.ui.update(|s| {
            s.phase = CallPhase::Ending;
            if let Some(msg) = &status_message {
                s.status_message = Some(msg.clone());
            }
        });

        if let (Some(room_id), Some(start)) = (self.current_room_id.clone(), self.call_start_at) {
            let duration_ms = self.clock.now().duration_since(start).as_millis() as i64;
            if duration_ms >= 0 {
                if let Ok(mut calls) = persistence::load_recent_calls(self.store.as_ref()).await {
                    calls.insert(
                        0,
                        RecentCall {
                            room_id,
                            ended_at_ms: duration_ms,
                            reconnect_token: self.reconnect_token.clone(),
                            reconnect_cid: self.client_id.clone(),
                        },
                    );
                    calls.truncate(3);
                    let _ = persistence::save_recent_calls(self.store.as_ref(), &calls).await;
                }
            }
        }

        self.timers.cancel_all();

        if let Some(media) = self.media.take() {
            let _ = media.close().await;
        }

        let should_keep_signaling = !self.watched_room_ids.is_empty();
        if !should_keep_signaling {
            if let Some(signaling) = self.signaling.take() {
                signaling.close();
            }
        }

        if let Some(cid) = &self.client_id {
            self.api_client.notify_push(&cid.0, PushKind::Notify).await;
        }

        self.reset_per_call_state();

        self.ui.update(|s| {
            s.phase = CallPhase::Idle;
            s.room_id = None;
            s.participant_count = 0;
            s.is_host = false;
        });

        if should_keep_signaling && self.signaling.is_none() {
            self.open_signaling_for_watching().await;
        }
    }

    fn spawn_media_event_forwarder(
        &self,
        mut receiver: mpsc::UnboundedReceiver<MediaEngineEvent>,
    ) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if tx.send(ControllerEvent::Media(event)).is_err() {
                    return;
                }
            }
        });
    }
}
