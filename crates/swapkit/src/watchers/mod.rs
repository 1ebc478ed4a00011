//! Chain watchers
//!
//! Each watcher polls a blockchain API on a jittered interval until it can
//! emit exactly one terminal outcome: success with data, deadline reached,
//! canceled, or a fatal error. Transient RPC errors never terminate a
//! watcher; only exhausting the attempt budget surfaces
//! [`MaxAttemptsCountReached`](swapkit_common::Error::MaxAttemptsCountReached).

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

pub mod confirmation;
pub mod party;
pub mod spend;

/// Poll interval for transaction confirmation
pub const GET_TRANSACTION_INTERVAL: Duration = Duration::from_secs(10);

/// Attempt budget for transaction confirmation
pub const DEFAULT_GET_TRANSACTION_ATTEMPTS: u32 = 180;

/// Poll interval for output spend detection
pub const OUTPUT_SPENT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Poll interval for fetching the spending input once a spend is seen
pub const INPUT_GETTING_INTERVAL: Duration = Duration::from_secs(10);

/// Re-broadcast interval of the refund force loop
pub const FORCE_REFUND_INTERVAL: Duration = Duration::from_secs(300);

/// Poll interval for counter-party contract scans
pub const PARTY_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Attempt budget for counter-party contract scans
pub const DEFAULT_PARTY_SCAN_ATTEMPTS: u32 = 240;

/// Poll parameters shared by every watcher
#[derive(Debug, Clone, Copy)]
pub struct WatcherParams {
    /// Base interval between polls; each sleep is jittered around it
    pub interval: Duration,
    /// Polls before the watcher gives up
    pub max_attempts: u32,
    /// Absolute cutoff; reaching it ends the watch with
    /// [`WatchResult::DeadlineReached`]
    pub deadline: Option<DateTime<Utc>>,
}

impl WatcherParams {
    /// Parameters with an interval and attempt budget, no deadline
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            deadline: None,
        }
    }

    /// Attach a deadline
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Terminal outcome of a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchResult<T> {
    /// The watched condition held; carries the observed data
    Completed(T),
    /// The deadline passed before the condition held
    DeadlineReached,
    /// The watcher was canceled externally
    Canceled,
}

/// Whether the deadline, if any, has passed
pub(crate) fn deadline_reached(params: &WatcherParams) -> bool {
    params.deadline.is_some_and(|deadline| Utc::now() >= deadline)
}

/// Interval with ±20% uniform jitter, so a fleet of watchers does not align
/// its polls
pub(crate) fn jittered(interval: Duration) -> Duration {
    interval.mul_f64(rand::thread_rng().gen_range(0.8..1.2))
}

/// Sleep one jittered interval; `false` when canceled instead
pub(crate) async fn sleep_or_cancelled(
    interval: Duration,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(jittered(interval)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = jittered(base);
            assert!(jittered >= Duration::from_secs(8));
            assert!(jittered <= Duration::from_secs(12));
        }
    }

    #[test]
    fn test_deadline_detection() {
        let params = WatcherParams::new(Duration::from_secs(1), 3);
        assert!(!deadline_reached(&params));

        let passed = params.with_deadline(Utc::now() - chrono::Duration::seconds(1));
        assert!(deadline_reached(&passed));

        let ahead = params.with_deadline(Utc::now() + chrono::Duration::hours(1));
        assert!(!deadline_reached(&ahead));
    }
}
