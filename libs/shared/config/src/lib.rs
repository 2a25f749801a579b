use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_request_timeout: duration_from_env(
                "SUPABASE_REQUEST_TIMEOUT_MS",
                Duration::from_secs(30),
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

/// Retry policy for idempotent store reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        }
    }
}

/// Tunables for slot locking, soft holds, booking sessions and alternative
/// slot search. The lock TTL, soft-hold TTL and session timeout are
/// independent of each other, but a single store call must finish well
/// inside the lock TTL.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub lock_duration: Duration,
    pub lock_sweep_interval: Duration,
    pub soft_hold_duration: Duration,
    pub countdown_tick: Duration,
    pub session_timeout: Duration,
    pub session_warning_lead: Duration,
    pub autosave_interval: Duration,
    pub retry: RetryConfig,
    pub store_call_timeout: Duration,
    pub max_alternatives: usize,
    pub alternative_search_days: u32,
    pub alternatives_per_day: usize,
    pub max_advance_days: i64,
    pub clinic_utc_offset_minutes: i32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(10),
            lock_sweep_interval: Duration::from_secs(60),
            soft_hold_duration: Duration::from_secs(5 * 60),
            countdown_tick: Duration::from_secs(1),
            session_timeout: Duration::from_secs(30 * 60),
            session_warning_lead: Duration::from_secs(5 * 60),
            autosave_interval: Duration::from_secs(2 * 60),
            retry: RetryConfig::default(),
            store_call_timeout: Duration::from_secs(5),
            max_alternatives: 5,
            alternative_search_days: 7,
            alternatives_per_day: 3,
            max_advance_days: 180,
            clinic_utc_offset_minutes: 0,
        }
    }
}

impl BookingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut config = Self {
            lock_duration: duration_from_env("BOOKING_LOCK_DURATION_MS", defaults.lock_duration),
            lock_sweep_interval: duration_from_env(
                "BOOKING_LOCK_SWEEP_INTERVAL_MS",
                defaults.lock_sweep_interval,
            ),
            soft_hold_duration: duration_from_env(
                "BOOKING_SOFT_HOLD_DURATION_MS",
                defaults.soft_hold_duration,
            ),
            countdown_tick: duration_from_env("BOOKING_COUNTDOWN_TICK_MS", defaults.countdown_tick),
            session_timeout: duration_from_env("BOOKING_SESSION_TIMEOUT_MS", defaults.session_timeout),
            session_warning_lead: duration_from_env(
                "BOOKING_SESSION_WARNING_LEAD_MS",
                defaults.session_warning_lead,
            ),
            autosave_interval: duration_from_env(
                "BOOKING_AUTOSAVE_INTERVAL_MS",
                defaults.autosave_interval,
            ),
            retry: RetryConfig {
                max_attempts: parse_from_env("BOOKING_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts),
                initial_delay: duration_from_env("BOOKING_RETRY_DELAY_MS", defaults.retry.initial_delay),
                backoff_multiplier: parse_from_env(
                    "BOOKING_RETRY_BACKOFF_MULTIPLIER",
                    defaults.retry.backoff_multiplier,
                ),
            },
            store_call_timeout: duration_from_env(
                "BOOKING_STORE_CALL_TIMEOUT_MS",
                defaults.store_call_timeout,
            ),
            max_alternatives: parse_from_env("BOOKING_MAX_ALTERNATIVES", defaults.max_alternatives),
            alternative_search_days: parse_from_env(
                "BOOKING_ALTERNATIVE_SEARCH_DAYS",
                defaults.alternative_search_days,
            ),
            alternatives_per_day: parse_from_env(
                "BOOKING_ALTERNATIVES_PER_DAY",
                defaults.alternatives_per_day,
            ),
            max_advance_days: parse_from_env("BOOKING_MAX_ADVANCE_DAYS", defaults.max_advance_days),
            clinic_utc_offset_minutes: parse_from_env(
                "BOOKING_CLINIC_UTC_OFFSET_MINUTES",
                defaults.clinic_utc_offset_minutes,
            ),
        };

        config.sanitize(&defaults);
        config
    }

    /// Replace values that would make the timers or retry loop meaningless.
    fn sanitize(&mut self, defaults: &Self) {
        if self.retry.max_attempts == 0 {
            warn!("BOOKING_RETRY_MAX_ATTEMPTS must be at least 1, using default");
            self.retry.max_attempts = defaults.retry.max_attempts;
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            warn!("BOOKING_RETRY_BACKOFF_MULTIPLIER must be >= 1, using default");
            self.retry.backoff_multiplier = defaults.retry.backoff_multiplier;
        }
        if self.session_warning_lead >= self.session_timeout {
            warn!(
                "Session warning lead ({:?}) is not shorter than the timeout ({:?}), using defaults",
                self.session_warning_lead, self.session_timeout
            );
            self.session_timeout = defaults.session_timeout;
            self.session_warning_lead = defaults.session_warning_lead;
        }
        for (name, value, fallback) in [
            ("BOOKING_LOCK_DURATION_MS", &mut self.lock_duration, defaults.lock_duration),
            ("BOOKING_LOCK_SWEEP_INTERVAL_MS", &mut self.lock_sweep_interval, defaults.lock_sweep_interval),
            ("BOOKING_COUNTDOWN_TICK_MS", &mut self.countdown_tick, defaults.countdown_tick),
            ("BOOKING_AUTOSAVE_INTERVAL_MS", &mut self.autosave_interval, defaults.autosave_interval),
        ] {
            if value.is_zero() {
                warn!("{} must be greater than zero, using default", name);
                *value = fallback;
            }
        }
        if self.store_call_timeout.is_zero() || self.store_call_timeout >= self.lock_duration {
            let clamped = defaults.store_call_timeout.min(self.lock_duration / 2);
            warn!(
                "Store call timeout ({:?}) must be shorter than the lock duration ({:?}), using {:?}",
                self.store_call_timeout, self.lock_duration, clamped
            );
            self.store_call_timeout = clamped;
        }
    }
}

fn parse_from_env<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn duration_from_env(key: &str, default: Duration) -> Duration {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parse_from_env(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = BookingConfig::default();
        assert_eq!(config.lock_duration, Duration::from_secs(10));
        assert_eq!(config.lock_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.session_timeout - config.session_warning_lead, Duration::from_secs(25 * 60));
        assert_eq!(config.autosave_interval, Duration::from_secs(120));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1000));
        assert_eq!(config.max_alternatives, 5);
        assert!(config.store_call_timeout < config.lock_duration);
    }

    #[test]
    fn sanitize_rejects_warning_lead_past_timeout() {
        let defaults = BookingConfig::default();
        let mut config = BookingConfig {
            session_timeout: Duration::from_secs(60),
            session_warning_lead: Duration::from_secs(120),
            ..BookingConfig::default()
        };
        config.retry.max_attempts = 0;
        config.sanitize(&defaults);

        assert_eq!(config.session_timeout, defaults.session_timeout);
        assert_eq!(config.session_warning_lead, defaults.session_warning_lead);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn sanitize_keeps_store_calls_inside_the_lock_ttl() {
        let defaults = BookingConfig::default();
        let mut config = BookingConfig {
            lock_duration: Duration::from_secs(4),
            store_call_timeout: Duration::from_secs(15),
            ..BookingConfig::default()
        };
        config.sanitize(&defaults);
        assert_eq!(config.store_call_timeout, Duration::from_secs(2));

        let mut config = BookingConfig {
            store_call_timeout: Duration::ZERO,
            ..BookingConfig::default()
        };
        config.sanitize(&defaults);
        assert_eq!(config.store_call_timeout, defaults.store_call_timeout);
    }
}
