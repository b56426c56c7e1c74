//! Human-readable status line.
//!
//! Every report bumps a generation counter. A transient report clears the
//! line after its duration only if no newer report has happened since, so a
//! stale timer never wipes a newer message.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const CONNECTING: &str = "Connecting…";
pub const ENTER_PASSWORD: &str = "Please enter the password.";
pub const CHECKING: &str = "Checking…";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    generation: u64,
}

#[derive(Clone)]
pub struct StatusReporter {
    tx: Arc<watch::Sender<Status>>,
    default_duration: Duration,
}

impl StatusReporter {
    /// `default_duration` is used by [`StatusReporter::flash`].
    pub fn new(default_duration: Duration) -> Self {
        let (tx, _) = watch::channel(Status::default());
        Self {
            tx: Arc::new(tx),
            default_duration,
        }
    }

    /// Set the status until something else replaces it.
    pub fn report(&self, message: impl Into<String>) {
        self.publish(message.into());
    }

    /// Set the status and clear it after `duration`, unless superseded first.
    pub fn report_transient(&self, message: impl Into<String>, duration: Duration) {
        let generation = self.publish(message.into());

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no runtime for status auto-clear, message stays");
                return;
            }
        };

        let tx = self.tx.clone();
        handle.spawn(async move {
            tokio::time::sleep(duration).await;
            tx.send_if_modified(|status| {
                if status.generation == generation {
                    status.message.clear();
                    true
                } else {
                    false
                }
            });
        });
    }

    /// Transient report with the default duration.
    pub fn flash(&self, message: impl Into<String>) {
        self.report_transient(message, self.default_duration);
    }

    pub fn current(&self) -> String {
        self.tx.borrow().message.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    fn publish(&self, message: String) -> u64 {
        debug!(status = %message, "status");
        let mut generation = 0;
        self.tx.send_modify(|status| {
            status.generation += 1;
            status.message = message;
            generation = status.generation;
        });
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn reporter() -> StatusReporter {
        StatusReporter::new(Duration::from_millis(1000))
    }

    #[test]
    fn test_report_outside_runtime() {
        let status = reporter();
        status.report("Connecting…");
        assert_eq!(status.current(), "Connecting…");
        // No runtime: the message is kept instead of panicking.
        status.report_transient("✅ OK", Duration::from_millis(10));
        assert_eq!(status.current(), "✅ OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_clears_after_duration() {
        let status = reporter();
        status.report_transient("✅ OK", Duration::from_millis(1000));
        sleep(Duration::from_millis(999)).await;
        assert_eq!(status.current(), "✅ OK");
        sleep(Duration::from_millis(50)).await;
        assert_eq!(status.current(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_transient_wins() {
        let status = reporter();
        status.report_transient("first", Duration::from_millis(1000));
        sleep(Duration::from_millis(100)).await;
        status.report_transient("second", Duration::from_millis(1000));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(status.current(), "second");

        // The first timer fires at 1000ms and must leave "second" alone.
        sleep(Duration::from_millis(900)).await;
        assert_eq!(status.current(), "second");

        sleep(Duration::from_millis(200)).await;
        assert_eq!(status.current(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_report_cancels_pending_clear() {
        let status = reporter();
        status.report_transient("✅ OK", Duration::from_millis(100));
        status.report("❌ Wrong password");
        sleep(Duration::from_millis(500)).await;
        assert_eq!(status.current(), "❌ Wrong password");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_uses_default_duration() {
        let status = StatusReporter::new(Duration::from_millis(300));
        status.flash("Admin locked");
        sleep(Duration::from_millis(250)).await;
        assert_eq!(status.current(), "Admin locked");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(status.current(), "");
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let status = reporter();
        let mut rx = status.subscribe();
        status.report(CHECKING);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().message, CHECKING);
    }
}
