//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Tracks participant counts for *watched rooms* (saved + recent), driven
//! by `room_statuses` (full replace, filtered to watched rooms) and
//! `room_status_update` (single-entry merge).

use std::collections::HashMap;

use crate::common::RoomId;
use crate::signaling::message::RoomStatusEntry;

#[derive(Default)]
pub struct RoomOccupancyTracker {
    watched: std::collections::HashSet<RoomId>,
    counts: HashMap<RoomId, i64>,
}

impl RoomOccupancyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_watched_rooms(&mut self, rooms: impl IntoIterator<Item = RoomId>) {
        self.watched = rooms.into_iter().collect();
        self.counts.retain(|rid, _| self.watched.contains(rid));
    }

    /// `room_statuses`: replace the map wholesale with the intersection of
    /// the server's full listing and the currently watched rooms.
    pub fn replace(&mut self, entries: &[RoomStatusEntry]) {
        self.counts = entries
            .iter()
            .filter(|e| self.watched.contains(&e.rid))
            .map(|e| (e.rid.clone(), e.count.max(0)))
            .collect();
    }

    /// `room_status_update`: merge a single entry, clamped to non-negative
    /// (the source clamps negative counts with `max(0, ...)`, adopted here
    /// as an invariant rather than guessed-at behavior).
    pub fn merge(&mut self, entry: &RoomStatusEntry) {
        if self.watched.contains(&entry.rid) {
            self.counts.insert(entry.rid.clone(), entry.count.max(0));
        }
    }

    pub fn counts(&self) -> &HashMap<RoomId, i64> {
        &self.counts
    }
}
