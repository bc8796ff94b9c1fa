//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! SSE signaling transport: a long-lived `GET` stream carries server-to-
//! client envelopes as `data: ...` lines, paired with an ordinary `POST`
//! for the client-to-server direction. Used when `WsTransport` is
//! unavailable or fails repeatedly (see spec.md §4.1's fallback policy).

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::signaling::message::SignalingMessage;
use crate::signaling::transport::{CloseReason, Transport, TransportEvent, TransportKind};

pub struct SseTransport {
    client: reqwest::Client,
    post_url: Option<String>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SseTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            post_url: None,
            task: None,
        }
    }
}

/// Incrementally splits a byte stream on blank-line-terminated SSE frames
/// and extracts the concatenation of every `data:` line's payload.
#[derive(Default)]
struct SseFrameBuffer {
    buf: String,
}

impl SseFrameBuffer {
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let frame = self.buf[..pos].to_string();
            self.buf.drain(..pos + 2);
            let data: String = frame
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|line| line.trim_start())
                .collect::<Vec<_>>()
                .join("\n");
            if !data.is_empty() {
                frames.push(data);
            }
        }
        frames
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(
        &mut self,
        host: String,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let get_url = format!("https://{host}/sse");
        self.post_url = Some(format!("https://{host}/sse/send"));
        let client = self.client.clone();

        let task = tokio::spawn(async move {
            let response = match client.get(&get_url).send().await {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    let _ = events.send(TransportEvent::Closed(CloseReason::Error(format!(
                        "sse handshake returned {}",
                        resp.status()
                    ))));
                    return;
                }
                Err(err) => {
                    let _ = events.send(TransportEvent::Closed(CloseReason::Error(
                        err.to_string(),
                    )));
                    return;
                }
            };
            let _ = events.send(TransportEvent::Open);

            let mut byte_stream = response.bytes_stream();
            let mut frames = SseFrameBuffer::default();
            loop {
                match byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        let Ok(text) = std::str::from_utf8(&chunk) else {
                            continue;
                        };
                        for data in frames.push(text) {
                            match SignalingMessage::decode(&data) {
                                Ok(msg) => {
                                    let _ = events.send(TransportEvent::Message(msg));
                                }
                                Err(err) => {
                                    warn!("sse transport: malformed envelope: {err}");
                                }
                            }
                        }
                    }
                    Some(Err(err)) => {
                        let _ = events.send(TransportEvent::Closed(CloseReason::Error(
                            err.to_string(),
                        )));
                        return;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed(CloseReason::RemoteClosed(
                            None,
                        )));
                        return;
                    }
                }
            }
        });
        self.task = Some(task);
    }

    fn send(&mut self, message: &SignalingMessage) {
        let Some(url) = self.post_url.clone() else {
            return;
        };
        let body = match message.encode() {
            Ok(body) => body,
            Err(err) => {
                warn!("sse transport: failed to encode message: {err}");
                return;
            }
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client
                .post(&url)
                .header("content-type", "application/json")
                .body(Bytes::from(body))
                .send()
                .await
            {
                debug!("sse transport: post failed: {err}");
            }
        });
    }

    async fn close(&mut self) {
        self.post_url = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_buffer_extracts_single_line_frame() {
        let mut fb = SseFrameBuffer::default();
        let frames = fb.push("data: {\"v\":1}\n\n");
        assert_eq!(frames, vec!["{\"v\":1}".to_string()]);
    }

    #[test]
    fn frame_buffer_joins_multi_line_data() {
        let mut fb = SseFrameBuffer::default();
        let frames = fb.push("data: line1\ndata: line2\n\n");
        assert_eq!(frames, vec!["line1\nline2".to_string()]);
    }

    #[test]
    fn frame_buffer_handles_split_chunks() {
        let mut fb = SseFrameBuffer::default();
        assert!(fb.push("data: {\"v\"").is_empty());
        let frames = fb.push(":1}\n\n");
        assert_eq!(frames, vec!["{\"v\":1}".to_string()]);
    }

    #[test]
    fn frame_buffer_ignores_blank_frames() {
        let mut fb = SseFrameBuffer::default();
        let frames = fb.push("\n\ndata: x\n\n");
        assert_eq!(frames, vec!["x".to_string()]);
    }
}
