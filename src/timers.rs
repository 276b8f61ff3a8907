//! Cancellable timer primitives used by the stream state machine (§4.4,
//! §9 "Timers").
//!
//! Each shape races a [`CancellationToken`] against `tokio::time::sleep`
//! via `tokio::select!`: a one-shot delay, a repeating interval, and a
//! deferred "run on the next turn of the runtime" tick.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of waiting on a cancellable timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fired {
    /// The duration elapsed.
    Elapsed,
    /// The timer's token was cancelled first.
    Cancelled,
}

/// Waits `dur`, or returns early if `token` is cancelled. Used for the
/// invitation retry delay (1500ms) and the clock-sync resend delay.
pub(crate) async fn sleep_or_cancel(dur: Duration, token: &CancellationToken) -> Fired {
    tokio::select! {
        _ = token.cancelled() => Fired::Cancelled,
        _ = tokio::time::sleep(dur) => Fired::Elapsed,
    }
}

/// Yields control back to the runtime so other spawned tasks get a turn,
/// returning early if cancelled. Used to schedule an immediate send without
/// starving the socket-read loop.
pub(crate) async fn next_turn_or_cancel(token: &CancellationToken) -> Fired {
    tokio::select! {
        _ = token.cancelled() => Fired::Cancelled,
        _ = tokio::task::yield_now() => Fired::Elapsed,
    }
}

/// A repeating timer that fires every `period` until cancelled, mirroring
/// the receiver-feedback cadence (§6.3, once per second) and the host's
/// periodic clock-sync resend.
pub(crate) struct Interval {
    period: Duration,
    token: CancellationToken,
}

impl Interval {
    pub(crate) fn new(period: Duration, token: CancellationToken) -> Self {
        Self { period, token }
    }

    /// Waits for the next tick. Returns `None` once the token is cancelled.
    pub(crate) async fn tick(&self) -> Option<()> {
        match sleep_or_cancel(self.period, &self.token).await {
            Fired::Elapsed => Some(()),
            Fired::Cancelled => None,
        }
    }
}

/// Bounded retry budget for the invitation handshake: up to `max_attempts`
/// resends spaced `interval` apart, per §4.4's "1500ms x40" cadence.
pub(crate) struct RetrySchedule {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetrySchedule {
    pub(crate) const INVITATION: RetrySchedule = RetrySchedule { interval: Duration::from_millis(1500), max_attempts: 40 };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_or_cancel_elapses_when_not_cancelled() {
        let token = CancellationToken::new();
        let fired = sleep_or_cancel(Duration::from_millis(1), &token).await;
        assert_eq!(fired, Fired::Elapsed);
    }

    #[tokio::test]
    async fn sleep_or_cancel_short_circuits_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let fired = sleep_or_cancel(Duration::from_secs(10), &token).await;
        assert_eq!(fired, Fired::Cancelled);
    }

    #[tokio::test]
    async fn interval_stops_after_cancel() {
        let token = CancellationToken::new();
        let interval = Interval::new(Duration::from_millis(1), token.clone());
        assert_eq!(interval.tick().await, Some(()));
        token.cancel();
        assert_eq!(interval.tick().await, None);
    }
}
