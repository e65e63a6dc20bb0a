use crate::request_cache::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub retry_after: Duration,
}

struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window counter per key. Windows reset lazily on the next check.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    clock: Arc<dyn Clock>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
            settings,
        }
    }

    pub fn check(&self, key: &str) -> Result<(), Rejected> {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        // Keep the map bounded by dropping windows that already ended.
        let window_len = self.settings.window;
        windows.retain(|_, w| now.saturating_duration_since(w.started_at) < window_len);

        let window = windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if window.count >= self.settings.max_requests {
            let elapsed = now.saturating_duration_since(window.started_at);
            let retry_after = window_len.saturating_sub(elapsed);
            warn!(key, retry_after_ms = retry_after.as_millis() as u64, "rate limit exceeded");
            return Err(Rejected { retry_after });
        }
        window.count += 1;
        Ok(())
    }

    pub fn reset(&self) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StepClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl StepClock {
        fn advance(&self, by: Duration) {
            *self.offset.lock().expect("clock lock") += by;
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().expect("clock lock")
        }
    }

    fn limiter(max: u32) -> (RateLimiter, Arc<StepClock>) {
        let clock = Arc::new(StepClock {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        });
        let limiter = RateLimiter::with_clock(
            RateLimitSettings {
                max_requests: max,
                window: Duration::from_secs(10),
            },
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn rejects_after_max_within_window() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.check("t1").is_ok());
        assert!(limiter.check("t1").is_ok());
        clock.advance(Duration::from_secs(4));
        let rejected = limiter.check("t1").expect_err("third call rejected");
        assert_eq!(rejected.retry_after, Duration::from_secs(6));
        assert!(limiter.check("t2").is_ok());
    }

    #[test]
    fn window_resets_after_expiry() {
        let (limiter, clock) = limiter(1);
        assert!(limiter.check("t1").is_ok());
        assert!(limiter.check("t1").is_err());
        clock.advance(Duration::from_secs(10));
        assert!(limiter.check("t1").is_ok());
    }

    #[test]
    fn reset_forgets_all_windows() {
        let (limiter, _clock) = limiter(1);
        assert!(limiter.check("t1").is_ok());
        limiter.reset();
        assert!(limiter.check("t1").is_ok());
    }
}
