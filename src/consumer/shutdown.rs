//! Graceful shutdown state shared across worker tasks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Tracks shutdown progress and in-flight message counts.
#[derive(Debug, Default)]
pub struct ShutdownState {
    shutting_down: AtomicBool,
    inflight: AtomicUsize,
}

impl ShutdownState {
    /// Create a fresh state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag shutdown; intake stops, in-flight work drains.
    pub fn begin(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        info!("shutdown initiated");
    }

    /// Whether shutdown is in progress.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Track a message entering processing.
    pub fn add_inflight(&self) {
        self.inflight.fetch_add(1, Ordering::Relaxed);
    }

    /// Track a message finishing processing.
    pub fn remove_inflight(&self) {
        self.inflight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current in-flight count.
    pub fn inflight_count(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Wait until in-flight work drains or the grace window ends.
    ///
    /// Returns whether the drain completed in time.
    pub async fn wait_for_drain(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let mut last_logged = None;

        while self.inflight_count() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    inflight = self.inflight_count(),
                    "shutdown grace window elapsed with messages in flight"
                );
                return false;
            }
            let current = self.inflight_count();
            if last_logged != Some(current) {
                info!(inflight = current, "waiting for in-flight messages");
                last_logged = Some(current);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inflight_tracking() {
        let state = ShutdownState::new();
        assert_eq!(state.inflight_count(), 0);
        state.add_inflight();
        state.add_inflight();
        assert_eq!(state.inflight_count(), 2);
        state.remove_inflight();
        assert_eq!(state.inflight_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_completes() {
        let state = std::sync::Arc::new(ShutdownState::new());
        state.add_inflight();

        let cloned = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cloned.remove_inflight();
        });

        assert!(state.wait_for_drain(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let state = ShutdownState::new();
        state.add_inflight();
        assert!(!state.wait_for_drain(Duration::from_millis(150)).await);
    }
}
