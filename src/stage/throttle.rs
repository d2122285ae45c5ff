use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const DEFAULT_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Rate limiter for repeated error logs
pub struct ErrorThrottle {
    interval: Duration,
    last_logged: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl ErrorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(n)` when the caller should log now, where `n` is how many
    /// occurrences were swallowed since the previous log line
    pub fn check(&self) -> Option<u64> {
        let now = Instant::now();
        let mut last_logged = self.last_logged.lock();

        match *last_logged {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                None
            }
            _ => {
                *last_logged = Some(now);
                Some(self.suppressed.swap(0, Ordering::Relaxed))
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LOG_INTERVAL)
    }
}
