//
// Copyright (C) 2019, 2020 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The REST surface this crate calls out to, generalized from the teacher's
//! `lite::http::Client` abstraction (a single typeless request/response
//! method) into the small set of typed calls this control plane actually
//! issues.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::RoomId;
use crate::error::{Error, Result};
use crate::signaling::message::TurnCredentials;

/// Which push endpoint to hit. Both calls are fire-and-forget and
/// idempotent per `(cid, kind)` on the server side, so `ApiClient` never
/// retries them itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushKind {
    Invite,
    Notify,
}

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn create_room(&self) -> Result<RoomId>;
    async fn check_host(&self, host: &str) -> Result<()>;
    async fn fetch_turn(&self, token: &str) -> Result<TurnCredentials>;
    async fn notify_push(&self, cid: &str, kind: PushKind);
}

pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    turn_fetch_timeout: Duration,
}

impl HttpApiClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, turn_fetch_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            turn_fetch_timeout,
        }
    }
}

#[derive(Deserialize)]
struct CreateRoomResponse {
    rid: String,
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn create_room(&self) -> Result<RoomId> {
        let url = format!("{}/api/rooms", self.base_url);
        let response = self.client.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::ServerRejected(format!(
                "create_room: server returned {}",
                response.status()
            )));
        }
        let body: CreateRoomResponse = response.json().await?;
        RoomId::new(body.rid)
    }

    async fn check_host(&self, host: &str) -> Result<()> {
        let url = format!("https://{host}/api/health");
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::ServerRejected(format!(
                "check_host({host}): server returned {}",
                response.status()
            )))
        }
    }

    async fn fetch_turn(&self, token: &str) -> Result<TurnCredentials> {
        let url = format!("{}/api/turn", self.base_url);
        let send = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send();
        let response = tokio::time::timeout(self.turn_fetch_timeout, send)
            .await
            .map_err(|_| Error::TurnFetchFailed)??;
        if !response.status().is_success() {
            return Err(Error::TurnFetchFailed);
        }
        response.json().await.map_err(|_| Error::TurnFetchFailed)
    }

    async fn notify_push(&self, cid: &str, kind: PushKind) {
        let path = match kind {
            PushKind::Invite => "invite",
            PushKind::Notify => "notify",
        };
        let url = format!("{}/api/push/{path}", self.base_url);
        if let Err(err) = self.client.post(&url).query(&[("cid", cid)]).send().await {
            debug!("api client: push notify ({path}) for {cid} failed: {err}");
        }
    }
}
