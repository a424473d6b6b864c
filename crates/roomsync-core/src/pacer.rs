use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Minimum spacing between outbound calls, adjustable while running.
#[derive(Debug)]
pub struct Pacer {
    delay_ms: AtomicU64,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
        tracing::info!(delay_ms = delay.as_millis() as u64, "send delay updated");
    }

    /// Suspend the calling task for the configured delay.
    pub async fn pause(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}
