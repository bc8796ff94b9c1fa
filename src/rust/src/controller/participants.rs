//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The participant-driven sub-state machine: turning a `RoomState` into a
//! phase transition plus the side effects `CallController` must carry out
//! (reset the peer session, send an offer, arm non-host fallback).

use crate::common::{CallPhase, ClientId};
use crate::signaling::message::RoomState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantUpdate {
    pub phase: CallPhase,
    pub participant_count: usize,
    pub is_host: bool,
    pub action: ParticipantAction,
}

/// What the controller must do in response to this update. Exactly one
/// action applies per update, matching spec.md §4.2.3's three mutually
/// exclusive branches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParticipantAction {
    /// Count dropped to 1: reset the peer session.
    ResetPeerSession,
    /// Count > 1 and we're the host: we're the offerer.
    MaybeSendOffer,
    /// Count > 1 and we're not the host: arm the non-host fallback timer.
    ArmNonHostFallback,
}

/// Computes the phase/host/action triple for a freshly-received
/// `RoomState`, given our own client id.
pub fn update_participants(rs: &RoomState, our_cid: &ClientId) -> ParticipantUpdate {
    let count = rs.participant_count();
    let is_host = rs.resolved_host_cid() == Some(our_cid);
    let phase = if count <= 1 {
        CallPhase::Waiting
    } else {
        CallPhase::InCall
    };
    let action = if count <= 1 {
        ParticipantAction::ResetPeerSession
    } else if is_host {
        ParticipantAction::MaybeSendOffer
    } else {
        ParticipantAction::ArmNonHostFallback
    };
    ParticipantUpdate {
        phase,
        participant_count: count,
        is_host,
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::message::Participant;

    fn rs(host: &str, cids: &[&str]) -> RoomState {
        RoomState {
            host_cid: ClientId(host.to_string()),
            participants: cids
                .iter()
                .map(|c| Participant {
                    cid: ClientId(c.to_string()),
                    joined_at: None,
                })
                .collect(),
        }
    }

    #[test]
    fn single_participant_resets_peer_session() {
        let update = update_participants(&rs("a", &["a"]), &ClientId("a".to_string()));
        assert_eq!(update.phase, CallPhase::Waiting);
        assert_eq!(update.action, ParticipantAction::ResetPeerSession);
    }

    #[test]
    fn host_with_two_participants_sends_offer() {
        let update = update_participants(&rs("a", &["a", "b"]), &ClientId("a".to_string()));
        assert_eq!(update.phase, CallPhase::InCall);
        assert!(update.is_host);
        assert_eq!(update.action, ParticipantAction::MaybeSendOffer);
    }

    #[test]
    fn non_host_with_two_participants_arms_fallback() {
        let update = update_participants(&rs("a", &["a", "b"]), &ClientId("b".to_string()));
        assert_eq!(update.phase, CallPhase::InCall);
        assert!(!update.is_host);
        assert_eq!(update.action, ParticipantAction::ArmNonHostFallback);
    }

    #[test]
    fn empty_room_counts_as_one_participant() {
        let update = update_participants(&rs("a", &[]), &ClientId("a".to_string()));
        assert_eq!(update.participant_count, 1);
        assert_eq!(update.phase, CallPhase::Waiting);
    }
}
