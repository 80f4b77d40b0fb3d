//! Fixed-window, per-user request limiter.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::error::{NotesError, NotesResult};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    count: u32,
}

/// Admits at most `limit` requests per key per window.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::minutes(1))
    }

    /// Count one request for `key`, or fail with the seconds until the
    /// window resets.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> NotesResult<()> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        // Elapsed windows carry no state worth keeping
        windows.retain(|_, w| now - w.started < self.window);
        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if window.count >= self.limit {
            let remaining = (window.started + self.window - now).num_seconds().max(1);
            tracing::warn!(key, retry_after = remaining, "Rate limit exceeded");
            return Err(NotesError::RateLimited {
                retry_after_secs: remaining as u64,
            });
        }
        window.count += 1;
        Ok(())
    }
}

#[cfg(test)]
impl RateLimiter {
    fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_limits_and_resets() {
        let limiter = RateLimiter::per_minute(2);
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        assert!(limiter.check("u1", t0).is_ok());
        assert!(limiter.check("u1", t0 + Duration::seconds(10)).is_ok());
        let err = limiter.check("u1", t0 + Duration::seconds(20)).unwrap_err();
        assert!(matches!(err, NotesError::RateLimited { retry_after_secs: 40 }));

        // Other users have their own window
        assert!(limiter.check("u2", t0 + Duration::seconds(20)).is_ok());

        assert!(limiter.check("u1", t0 + Duration::seconds(60)).is_ok());
    }

    #[test]
    fn test_elapsed_windows_are_dropped() {
        let limiter = RateLimiter::per_minute(5);
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

        for i in 0..50 {
            limiter.check(&format!("user-{i}"), t0).unwrap();
        }
        assert_eq!(limiter.tracked_keys(), 50);

        limiter.check("late", t0 + Duration::seconds(61)).unwrap();
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
