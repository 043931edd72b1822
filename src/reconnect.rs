use crate::config::ReconnectConfig;
use tokio::task::JoinHandle;
use tracing::debug;

/// Schedules delayed reconnect attempts with linear backoff.
///
/// Owned by the multiplexer's driver task, so no internal locking: every
/// `start`/`cancel`/`on_connected` call happens on the single event queue.
#[derive(Debug)]
pub(crate) struct ReconnectScheduler {
    config: ReconnectConfig,
    attempts: u32,
    pending: Option<JoinHandle<()>>,
}

impl ReconnectScheduler {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            pending: None,
        }
    }

    /// Cancel any pending timer and schedule `on_fire` to run once after the
    /// next backoff delay. Each consecutive call without an intervening
    /// `on_connected` waits longer.
    pub fn start(&mut self, on_fire: impl FnOnce() + Send + 'static) {
        self.cancel();
        self.attempts += 1;
        let delay = self.config.delay_for_attempt(self.attempts);
        debug!(attempt = self.attempts, ?delay, "scheduling reconnect");
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        }));
    }

    /// Reset the backoff counter. Call on successful connection.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// Abort any pending timer without firing it. Safe to call when nothing
    /// is scheduled.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
