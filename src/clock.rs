//! Time source for the monitor and scheduler.
//!
//! Production code runs on [`SystemClock`], which delegates to `tokio::time`
//! so tests may also drive it with tokio's paused clock. [`ManualClock`] lets
//! tests step time by hand.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// Trait for providing time in tests and production
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant
    fn now(&self) -> Instant;

    /// Sleep for a duration
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Clock backed by the tokio timer
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
pub use manual::ManualClock;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_moves_time() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_paused_tokio_time() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(90)).await;
        assert!(clock.now() - start >= Duration::from_secs(90));
    }
}
