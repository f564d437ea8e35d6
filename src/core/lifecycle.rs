//! Lifecycle / draining (C8): tracks in-flight request handlers and
//! implements warm vs. cold shutdown.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// `open -> closing -> closed`. No new origin fetches start once `closing`;
/// active ones are awaited by whoever called [`Lifecycle::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    Open,
    Closing,
    Closed,
}

/// Process-wide in-flight counter plus a monotonic closed flag.
pub struct Lifecycle {
    in_flight: AtomicUsize,
    state: AtomicU64,
    drained: Notify,
}

const OPEN: u64 = 0;
const CLOSING: u64 = 1;

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            state: AtomicU64::new(OPEN),
            drained: Notify::new(),
        }
    }

    /// Registers one in-flight handler invocation. Pair with an RAII guard
    /// ([`Lifecycle::enter`]) so every exit path decrements it.
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { lifecycle: self }
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> CloseState {
        match self.state.load(Ordering::SeqCst) {
            OPEN => CloseState::Open,
            _ => CloseState::Closing,
        }
    }

    /// `true` if a close signal has already been received. A second signal
    /// while closing should trigger a cold close (immediate exit) instead of
    /// calling this again.
    pub fn is_closing(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CLOSING
    }

    /// Initiates a warm close: marks the state `closing` so no new fetches
    /// start, then waits for the in-flight counter to reach zero.
    ///
    /// The `Notified` future is created *before* checking the counter on each
    /// iteration, not after, so a `notify_waiters()` from the last guard
    /// dropping between the check and the await can never be missed.
    pub async fn close(&self) {
        self.state.store(CLOSING, Ordering::SeqCst);
        loop {
            let notified = self.drained.notified();
            if self.in_flight() == 0 {
                break;
            }
            notified.await;
        }
    }
}

/// RAII guard decrementing the in-flight counter on drop, covering every exit
/// path (return, early `?`, panic) from a handler.
pub struct InFlightGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn close_waits_for_in_flight_to_drain() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.enter();
        assert_eq!(lifecycle.in_flight(), 1);

        let lc = lifecycle.clone();
        let closer = tokio::spawn(async move {
            lc.close().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closer.is_finished(), "close must not complete while in-flight");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), closer)
            .await
            .expect("close should complete once drained")
            .unwrap();
    }

    #[test]
    fn second_signal_while_closing_is_a_cold_close() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_closing());
        lifecycle.state.store(CLOSING, Ordering::SeqCst);
        assert!(lifecycle.is_closing());
    }
}
