use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::debug;

use shared_config::BookingConfig;

/// Deadline helpers for holds and the countdowns shown while a caller is
/// mid-flow.
#[derive(Debug, Clone)]
pub struct ReservationExpiryTracker {
    tick: Duration,
}

impl ReservationExpiryTracker {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(config.countdown_tick)
    }

    pub fn is_expired(&self, expiry: Instant) -> bool {
        Instant::now() >= expiry
    }

    pub fn time_remaining(&self, expiry: Instant) -> Duration {
        expiry.saturating_duration_since(Instant::now())
    }

    /// Report the remaining time every tick and call `on_expire` once the
    /// deadline passes. Cancelling or dropping the handle first means
    /// `on_expire` never runs.
    pub fn watch<T, E>(&self, expiry: Instant, mut on_tick: T, on_expire: E) -> WatchHandle
    where
        T: FnMut(Duration) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let tick = self.tick;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let deadline = sleep_until(expiry);
            tokio::pin!(deadline);
            let mut on_expire = Some(on_expire);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut deadline => {
                        if let Some(expire) = on_expire.take() {
                            expire();
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        on_tick(expiry.saturating_duration_since(Instant::now()));
                    }
                }
            }

            debug!("Countdown reached its deadline");
        });

        WatchHandle { handle }
    }
}

/// `4m 59s`, or `12s` under a minute.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[must_use = "dropping the handle cancels the watch"]
#[derive(Debug)]
pub struct WatchHandle {
    handle: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the countdown without firing `on_expire`.
    pub fn cancel(self) {}

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
