use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

/// Round timeouts with exponential backoff:
/// duration = base · 2^(round − last_commit_round), exponent capped at 20
/// to stay inside u64, total capped at `max`. Reset after each commit so
/// a healed network returns to the base timeout quickly.
pub struct TimeoutScheduler {
    base: Duration,
    max: Duration,
    last_commit_round: u64,
    cancel: Option<Sender<()>>,
}

impl TimeoutScheduler {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        let base_ms = if base_ms == 0 { 3000 } else { base_ms };
        let max_ms = if max_ms == 0 { 60_000 } else { max_ms };
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
            last_commit_round: 0,
            cancel: None,
        }
    }

    pub fn timeout_duration(&self, round: u64) -> Duration {
        let mut exponent = if round > self.last_commit_round {
            round - self.last_commit_round
        } else {
            round
        };
        if exponent > 20 {
            exponent = 20;
        }
        let d = self.base.saturating_mul(1u32 << exponent.min(31));
        d.min(self.max)
    }

    /// Arm the timer for (height, round). A previously armed timer is
    /// cancelled; on expiry `fire` is invoked from the timer thread.
    pub fn schedule<F>(&mut self, height: u64, round: u64, fire: F)
    where
        F: FnOnce(u64, u64) + Send + 'static,
    {
        let duration = self.timeout_duration(round);

        // Dropping the previous sender cancels the old timer thread.
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        self.cancel = Some(cancel_tx);

        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(duration) {
                fire(height, round);
            }
        });
    }

    /// Reset backoff after a commit at the given round.
    pub fn reset(&mut self, commit_round: u64) {
        self.last_commit_round = commit_round;
        self.cancel = None;
    }

    /// Cancel any pending timer. Idempotent.
    pub fn stop(&mut self) {
        self.cancel = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_round() {
        let ts = TimeoutScheduler::new(1000, 60_000);
        assert_eq!(ts.timeout_duration(0), Duration::from_secs(1));
        assert_eq!(ts.timeout_duration(1), Duration::from_secs(2));
        assert_eq!(ts.timeout_duration(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_caps_at_max() {
        let ts = TimeoutScheduler::new(1000, 5000);
        assert_eq!(ts.timeout_duration(10), Duration::from_secs(5));
    }

    #[test]
    fn reset_rebases_exponent() {
        let mut ts = TimeoutScheduler::new(1000, 60_000);
        ts.reset(5);
        assert_eq!(ts.timeout_duration(6), Duration::from_secs(2));
    }

    #[test]
    fn exponent_capped_against_overflow() {
        let ts = TimeoutScheduler::new(1000, u64::MAX / 2);
        // round 64 would shift past u64 without the cap
        let d = ts.timeout_duration(64);
        assert_eq!(d, Duration::from_millis(1000) * (1 << 20));
    }

    #[test]
    fn timer_fires_and_cancels() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicU32::new(0));
        let mut ts = TimeoutScheduler::new(20, 60_000);

        let f = fired.clone();
        ts.schedule(1, 0, move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Cancelled before expiry: no fire.
        let f = fired.clone();
        ts.schedule(1, 1, move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        ts.stop();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
