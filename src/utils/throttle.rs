//! Rate limit for repeated send failures
//!
//! A peer whose data channel or track is going away fails every write until
//! it is torn down. The throttler lets the first failure of each kind through,
//! then at most one per interval, and reports how many were swallowed since.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// How often a failing peer may log the same kind of send error
pub const SEND_WARN_INTERVAL: Duration = Duration::from_secs(5);

struct Window {
    opened: Instant,
    suppressed: u64,
}

pub struct LogThrottler {
    interval: Duration,
    windows: Mutex<HashMap<&'static str, Window>>,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// `Some(suppressed)` if a failure of `key` should be logged now, where
    /// `suppressed` counts the ones dropped since the last logged failure
    pub fn admit(&self, key: &'static str) -> Option<u64> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        match windows.get_mut(key) {
            Some(window) if now.duration_since(window.opened) < self.interval => {
                window.suppressed += 1;
                None
            }
            Some(window) => {
                let suppressed = std::mem::take(&mut window.suppressed);
                window.opened = now;
                Some(suppressed)
            }
            None => {
                windows.insert(
                    key,
                    Window {
                        opened: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }
}

/// `warn!` gated by a [`LogThrottler`], tagged with the suppressed count
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.admit($key) {
            tracing::warn!(suppressed, $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_one_warning_per_interval() {
        let throttler = LogThrottler::new(Duration::from_secs(5));

        assert_eq!(throttler.admit("cursor_image"), Some(0));
        assert_eq!(throttler.admit("cursor_image"), None);
        assert_eq!(throttler.admit("cursor_image"), None);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(throttler.admit("cursor_image"), Some(2));
        assert_eq!(throttler.admit("cursor_image"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_throttled_apart() {
        let throttler = LogThrottler::new(Duration::from_secs(5));

        assert_eq!(throttler.admit("cursor_image"), Some(0));
        assert_eq!(throttler.admit("cursor_position"), Some(0));
        assert_eq!(throttler.admit("cursor_position"), None);
        assert_eq!(throttler.admit("cursor_image"), None);
    }
}
