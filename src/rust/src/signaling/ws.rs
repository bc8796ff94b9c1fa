//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! WebSocket signaling transport, built on `tokio-tungstenite`.
//!
//! Shaped after the background-task-plus-channel design used for the
//! native WebSocket client in the pack's `lightcone-street-lightcone-sdk`
//! reference: `connect` spawns one task that owns the split socket and
//! forwards both directions over `mpsc` channels, so the rest of the crate
//! never touches a `WebSocketStream` directly.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::signaling::message::SignalingMessage;
use crate::signaling::transport::{CloseReason, Transport, TransportEvent, TransportKind};

pub struct WsTransport {
    outgoing: Option<mpsc::UnboundedSender<WsMessage>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            outgoing: None,
            task: None,
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ws
    }

    async fn connect(
        &mut self,
        host: String,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<WsMessage>();
        self.outgoing = Some(outgoing_tx);

        let url = format!("wss://{host}/ws");
        let task = tokio::spawn(async move {
            let stream = match tokio_tungstenite::connect_async(&url).await {
                Ok((stream, _response)) => stream,
                Err(err) => {
                    debug!("ws transport: connect to {url} failed: {err}");
                    let _ = events.send(TransportEvent::Closed(CloseReason::Error(
                        err.to_string(),
                    )));
                    return;
                }
            };
            let _ = events.send(TransportEvent::Open);

            let (mut sink, mut stream) = stream.split();
            loop {
                tokio::select! {
                    outgoing = outgoing_rx.recv() => {
                        match outgoing {
                            Some(msg) => {
                                if let Err(err) = sink.send(msg).await {
                                    debug!("ws transport: send failed: {err}");
                                    let _ = events.send(TransportEvent::Closed(
                                        CloseReason::Error(err.to_string()),
                                    ));
                                    return;
                                }
                            }
                            None => {
                                let _ = sink.send(WsMessage::Close(None)).await;
                                let _ = events.send(TransportEvent::Closed(
                                    CloseReason::ClientInitiated,
                                ));
                                return;
                            }
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                match SignalingMessage::decode(&text) {
                                    Ok(msg) => {
                                        let _ = events.send(TransportEvent::Message(msg));
                                    }
                                    Err(err) => {
                                        warn!("ws transport: malformed envelope: {err}");
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Close(frame))) => {
                                let reason = frame.map(|f| f.reason.to_string());
                                let _ = events.send(TransportEvent::Closed(
                                    CloseReason::RemoteClosed(reason),
                                ));
                                return;
                            }
                            Some(Ok(_)) => {
                                // Ping/Pong/Binary frames carry no envelope semantics here.
                            }
                            Some(Err(err)) => {
                                let _ = events.send(TransportEvent::Closed(CloseReason::Error(
                                    err.to_string(),
                                )));
                                return;
                            }
                            None => {
                                let _ = events.send(TransportEvent::Closed(
                                    CloseReason::RemoteClosed(None),
                                ));
                                return;
                            }
                        }
                    }
                }
            }
        });
        self.task = Some(task);
    }

    fn send(&mut self, message: &SignalingMessage) {
        let Some(tx) = &self.outgoing else {
            return;
        };
        match message.encode() {
            Ok(text) => {
                let _ = tx.send(WsMessage::Text(text));
            }
            Err(err) => warn!("ws transport: failed to encode message: {err}"),
        }
    }

    async fn close(&mut self) {
        self.outgoing = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
