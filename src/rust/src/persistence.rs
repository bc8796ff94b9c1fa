//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Persisted state: the typed schemas this crate reads/writes through a
//! plain key-value contract, and the in-memory implementation of that
//! contract used by tests. The controller is handed a `PersistentStore` at
//! construction; it never touches a storage backend directly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{ClientId, ReconnectToken, RoomId};
use crate::error::Result;

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
}

pub const RECENT_CALLS_KEY: &str = "duocall.recent_calls";
pub const SAVED_ROOMS_KEY: &str = "duocall.saved_rooms";
pub const FEATURE_TOGGLES_KEY: &str = "duocall.feature_toggles";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecentCall {
    pub room_id: RoomId,
    pub ended_at_ms: i64,
    pub reconnect_token: Option<ReconnectToken>,
    pub reconnect_cid: Option<ClientId>,
}

pub const SAVED_ROOM_NAME_MAX_CHARS: usize = 120;
pub const SAVED_ROOMS_MAX_ENTRIES: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedRoom {
    pub room_id: RoomId,
    pub name: String,
    pub created_at_ms: i64,
    pub host: Option<String>,
    pub last_joined_at_ms: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureToggles {
    #[serde(rename = "default-mic")]
    pub default_mic: bool,
    #[serde(rename = "default-cam")]
    pub default_cam: bool,
    #[serde(rename = "HD-video-experimental")]
    pub hd_video_experimental: bool,
    #[serde(rename = "saved-rooms-shown-first")]
    pub saved_rooms_shown_first: bool,
    #[serde(rename = "invite-notifications-enabled")]
    pub invite_notifications_enabled: bool,
}

/// Reads the recent-call list, deduplicating by `room_id` (keeping the
/// newest `ended_at_ms` entry) -- the parse-time cleanup pass called out in
/// spec.md §9 for state that may have accumulated duplicate entries across
/// app versions.
pub async fn load_recent_calls(store: &dyn PersistentStore) -> Result<Vec<RecentCall>> {
    let raw = store.get(RECENT_CALLS_KEY).await?;
    let mut calls: Vec<RecentCall> = match raw {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };
    calls.sort_by(|a, b| b.ended_at_ms.cmp(&a.ended_at_ms));
    let mut seen = std::collections::HashSet::new();
    calls.retain(|call| seen.insert(call.room_id.clone()));
    Ok(calls)
}

pub async fn save_recent_calls(store: &dyn PersistentStore, calls: &[RecentCall]) -> Result<()> {
    let json = serde_json::to_string(calls)?;
    store.set(RECENT_CALLS_KEY, json).await
}

pub async fn load_feature_toggles(store: &dyn PersistentStore) -> Result<FeatureToggles> {
    let raw = store.get(FEATURE_TOGGLES_KEY).await?;
    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(FeatureToggles::default()),
    }
}

pub async fn save_feature_toggles(store: &dyn PersistentStore, toggles: &FeatureToggles) -> Result<()> {
    let json = serde_json::to_string(toggles)?;
    store.set(FEATURE_TOGGLES_KEY, json).await
}

pub async fn load_saved_rooms(store: &dyn PersistentStore) -> Result<Vec<SavedRoom>> {
    let raw = store.get(SAVED_ROOMS_KEY).await?;
    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

/// Truncates `name` to `SAVED_ROOM_NAME_MAX_CHARS` and evicts the oldest
/// entry once the list is at `SAVED_ROOMS_MAX_ENTRIES` (spec.md §6).
pub async fn save_room(store: &dyn PersistentStore, mut room: SavedRoom) -> Result<()> {
    if room.name.chars().count() > SAVED_ROOM_NAME_MAX_CHARS {
        room.name = room.name.chars().take(SAVED_ROOM_NAME_MAX_CHARS).collect();
    }
    let mut rooms = load_saved_rooms(store).await?;
    rooms.retain(|r| r.room_id != room.room_id);
    rooms.push(room);
    if rooms.len() > SAVED_ROOMS_MAX_ENTRIES {
        let excess = rooms.len() - SAVED_ROOMS_MAX_ENTRIES;
        rooms.drain(0..excess);
    }
    let json = serde_json::to_string(&rooms)?;
    store.set(SAVED_ROOMS_KEY, json).await
}

/// An in-memory `PersistentStore`, used by tests and as a reference
/// implementation for a presentation layer that hasn't wired up real
/// storage yet.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(n: u8) -> RoomId {
        RoomId::new(format!("{}", (b'A' + n) as char).repeat(27)).unwrap()
    }

    #[tokio::test]
    async fn recent_calls_round_trip() {
        let store = InMemoryStore::new();
        let calls = vec![RecentCall {
            room_id: room(0),
            ended_at_ms: 1000,
            reconnect_token: None,
            reconnect_cid: None,
        }];
        save_recent_calls(&store, &calls).await.unwrap();
        let loaded = load_recent_calls(&store).await.unwrap();
        assert_eq!(loaded, calls);
    }

    #[tokio::test]
    async fn recent_calls_dedup_keeps_newest() {
        let store = InMemoryStore::new();
        let r = room(0);
        let stale = RecentCall {
            room_id: r.clone(),
            ended_at_ms: 100,
            reconnect_token: None,
            reconnect_cid: None,
        };
        let fresh = RecentCall {
            room_id: r.clone(),
            ended_at_ms: 200,
            reconnect_token: None,
            reconnect_cid: None,
        };
        let json = serde_json::to_string(&vec![stale, fresh.clone()]).unwrap();
        store.set(RECENT_CALLS_KEY, json).await.unwrap();

        let loaded = load_recent_calls(&store).await.unwrap();
        assert_eq!(loaded, vec![fresh]);
    }

    #[tokio::test]
    async fn missing_feature_toggles_default_to_all_off() {
        let store = InMemoryStore::new();
        let toggles = load_feature_toggles(&store).await.unwrap();
        assert_eq!(toggles, FeatureToggles::default());
    }

    #[tokio::test]
    async fn feature_toggles_round_trip_uses_spec_key_names() {
        let store = InMemoryStore::new();
        let toggles = FeatureToggles {
            default_mic: true,
            default_cam: false,
            hd_video_experimental: true,
            saved_rooms_shown_first: false,
            invite_notifications_enabled: true,
        };
        save_feature_toggles(&store, &toggles).await.unwrap();

        let raw = store.get(FEATURE_TOGGLES_KEY).await.unwrap().unwrap();
        assert!(raw.contains("\"default-mic\""));
        assert!(raw.contains("\"HD-video-experimental\""));
        assert!(raw.contains("\"invite-notifications-enabled\""));

        let loaded = load_feature_toggles(&store).await.unwrap();
        assert_eq!(loaded, toggles);
    }

    #[tokio::test]
    async fn save_room_round_trips_and_replaces_existing_entry() {
        let store = InMemoryStore::new();
        save_room(
            &store,
            SavedRoom {
                room_id: room(0),
                name: "Family call".to_string(),
                created_at_ms: 1000,
                host: Some("alice".to_string()),
                last_joined_at_ms: None,
            },
        )
        .await
        .unwrap();
        save_room(
            &store,
            SavedRoom {
                room_id: room(0),
                name: "Family call (renamed)".to_string(),
                created_at_ms: 1000,
                host: Some("alice".to_string()),
                last_joined_at_ms: Some(2000),
            },
        )
        .await
        .unwrap();

        let rooms = load_saved_rooms(&store).await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].name, "Family call (renamed)");
        assert_eq!(rooms[0].last_joined_at_ms, Some(2000));
    }

    #[tokio::test]
    async fn save_room_truncates_an_overlong_name() {
        let store = InMemoryStore::new();
        save_room(
            &store,
            SavedRoom {
                room_id: room(0),
                name: "x".repeat(200),
                created_at_ms: 1000,
                host: None,
                last_joined_at_ms: None,
            },
        )
        .await
        .unwrap();

        let rooms = load_saved_rooms(&store).await.unwrap();
        assert_eq!(rooms[0].name.chars().count(), SAVED_ROOM_NAME_MAX_CHARS);
    }

    #[tokio::test]
    async fn save_room_evicts_the_oldest_entry_past_the_bound() {
        let store = InMemoryStore::new();
        for n in 0..SAVED_ROOMS_MAX_ENTRIES {
            save_room(
                &store,
                SavedRoom {
                    room_id: RoomId::new(format!("{n:0>27}")).unwrap(),
                    name: format!("room {n}"),
                    created_at_ms: n as i64,
                    host: None,
                    last_joined_at_ms: None,
                },
            )
            .await
            .unwrap();
        }
        save_room(
            &store,
            SavedRoom {
                room_id: RoomId::new(format!("{:0>27}", SAVED_ROOMS_MAX_ENTRIES)).unwrap(),
                name: "newest".to_string(),
                created_at_ms: SAVED_ROOMS_MAX_ENTRIES as i64,
                host: None,
                last_joined_at_ms: None,
            },
        )
        .await
        .unwrap();

        let rooms = load_saved_rooms(&store).await.unwrap();
        assert_eq!(rooms.len(), SAVED_ROOMS_MAX_ENTRIES);
        assert!(rooms.iter().all(|r| r.created_at_ms != 0));
    }
}
