//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The named-timer table backing the controller's timer invariant: at most
//! one instance of any given named timer is ever outstanding, because
//! scheduling a name replaces (and thereby drops/cancels) its previous
//! handle rather than stacking a second one.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::{Clock, TimerHandle};

/// Every named timer the call controller schedules. Carried on the fired
/// event so the controller's `select!` loop can dispatch without needing a
/// separate channel per timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerName {
    JoinKickstart,
    JoinHardTimeout,
    JoinRecovery,
    OfferTimeout,
    IceRestart,
    NonHostFallback,
    TurnRefresh,
}

pub struct TimerTable {
    join_kickstart: TimerHandle,
    join_hard_timeout: TimerHandle,
    join_recovery: TimerHandle,
    offer_timeout: TimerHandle,
    ice_restart: TimerHandle,
    non_host_fallback: TimerHandle,
    turn_refresh: TimerHandle,
}

impl Default for TimerTable {
    fn default() -> Self {
        Self {
            join_kickstart: TimerHandle::none(),
            join_hard_timeout: TimerHandle::none(),
            join_recovery: TimerHandle::none(),
            offer_timeout: TimerHandle::none(),
            ice_restart: TimerHandle::none(),
            non_host_fallback: TimerHandle::none(),
            turn_refresh: TimerHandle::none(),
        }
    }
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, name: TimerName) -> &mut TimerHandle {
        match name {
            TimerName::JoinKickstart => &mut self.join_kickstart,
            TimerName::JoinHardTimeout => &mut self.join_hard_timeout,
            TimerName::JoinRecovery => &mut self.join_recovery,
            TimerName::OfferTimeout => &mut self.offer_timeout,
            TimerName::IceRestart => &mut self.ice_restart,
            TimerName::NonHostFallback => &mut self.non_host_fallback,
            TimerName::TurnRefresh => &mut self.turn_refresh,
        }
    }

    /// Schedules `name` to fire `name` on `tx` after `delay`, replacing
    /// (and so cancelling) whatever was previously scheduled under it.
    pub fn schedule(
        &mut self,
        clock: &dyn Clock,
        name: TimerName,
        delay: Duration,
        tx: mpsc::UnboundedSender<TimerName>,
    ) {
        let (fire_tx, mut fire_rx) = mpsc::unbounded_channel::<()>();
        let handle = clock.schedule(delay, fire_tx);
        *self.slot(name) = handle;
        tokio::spawn(async move {
            if fire_rx.recv().await.is_some() {
                let _ = tx.send(name);
            }
        });
    }

    pub fn cancel(&mut self, name: TimerName) {
        self.slot(name).cancel();
    }

    pub fn is_scheduled(&mut self, name: TimerName) -> bool {
        self.slot(name).is_scheduled()
    }

    /// Cancels every outstanding timer. Called on cleanup so the "all
    /// timer handles are nil" invariant holds after `cleanup_call`.
    pub fn cancel_all(&mut self) {
        for name in [
            TimerName::JoinKickstart,
            TimerName::JoinHardTimeout,
            TimerName::JoinRecovery,
            TimerName::OfferTimeout,
            TimerName::IceRestart,
            TimerName::NonHostFallback,
            TimerName::TurnRefresh,
        ] {
            self.cancel(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;

    #[tokio::test]
    async fn rescheduling_a_name_cancels_the_previous_handle() {
        let mut table = TimerTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.schedule(
            &TokioClock,
            TimerName::OfferTimeout,
            Duration::from_millis(30),
            tx.clone(),
        );
        table.schedule(
            &TokioClock,
            TimerName::OfferTimeout,
            Duration::from_millis(5),
            tx,
        );
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, TimerName::OfferTimeout);
        let stray = tokio::time::timeout(Duration::from_millis(40), rx.recv()).await;
        assert!(stray.is_err(), "replaced timer must not also fire");
    }

    #[tokio::test]
    async fn cancel_all_stops_every_timer() {
        let mut table = TimerTable::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.schedule(
            &TokioClock,
            TimerName::JoinHardTimeout,
            Duration::from_millis(10),
            tx.clone(),
        );
        table.schedule(&TokioClock, TimerName::OfferTimeout, Duration::from_millis(10), tx);
        table.cancel_all();
        let result = tokio::time::timeout(Duration::from_millis(30), rx.recv()).await;
        assert!(result.is_err());
    }
}
