//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Monotonic time and cancellable single-shot delays.
//!
//! The controller never reads `Instant::now()` or schedules a raw
//! `tokio::time::sleep` directly; both go through [`Clock`] so tests can
//! pair [`TokioClock`] with `tokio::time::pause`/`advance` under
//! `#[tokio::test(start_paused = true)]` to drive timers without waiting on
//! a wall clock.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A source of monotonic time and a means of scheduling a wakeup after it.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Schedules `f` to run (by sending on `tx`) after `delay`. The returned
    /// handle cancels the timer if dropped or explicitly [`TimerHandle::cancel`]ed.
    fn schedule(&self, delay: Duration, tx: mpsc::UnboundedSender<()>) -> TimerHandle;
}

/// A real clock backed by the tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, tx: mpsc::UnboundedSender<()>) -> TimerHandle {
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(());
        });
        TimerHandle { join: Some(join) }
    }
}

/// A cancellable handle to a single scheduled timer.
///
/// Every named timer in the controller (`joinKickstart`, `joinHardTimeout`,
/// `joinRecovery`, `offerTimeout`, `iceRestart`, `nonHostFallback`,
/// `turnRefresh`) is stored as one of these in a named slot; rescheduling a
/// timer replaces the slot's handle (dropping, and thus cancelling, the
/// previous one) rather than stacking a second outstanding timer.
#[derive(Debug)]
pub struct TimerHandle {
    join: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// A handle representing "no timer scheduled".
    pub fn none() -> Self {
        Self { join: None }
    }

    pub fn is_scheduled(&self) -> bool {
        self.join.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = TokioClock.schedule(Duration::from_millis(5), tx);
        rx.recv().await.expect("timer should fire");
    }

    #[tokio::test]
    async fn cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = TokioClock.schedule(Duration::from_millis(20), tx);
        handle.cancel();
        let result = tokio::time::timeout(Duration::from_millis(40), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test]
    async fn replacing_handle_cancels_previous() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TokioClock.schedule(Duration::from_millis(20), tx.clone());
        // Replacing the slot drops (and thus cancels) the first timer.
        slot = TokioClock.schedule(Duration::from_millis(5), tx);
        rx.recv().await.expect("second timer should fire");
        // Give the (cancelled) first timer a chance to fire erroneously.
        let stray = tokio::time::timeout(Duration::from_millis(30), rx.recv()).await;
        assert!(stray.is_err(), "replaced timer must not also fire");
        drop(slot);
    }
}
