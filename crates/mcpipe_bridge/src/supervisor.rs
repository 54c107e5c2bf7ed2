//! Keeps one bridge alive: retries every failed attempt after a growing,
//! jittered delay, until shutdown.

use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::backoff::{BackoffPolicy, RetryState};
use crate::bridge::Bridge;
use crate::shutdown_requested;

pub struct Supervisor {
    bridge: Bridge,
    policy: BackoffPolicy,
}

impl Supervisor {
    pub fn new(bridge: Bridge, policy: BackoffPolicy) -> Self {
        Self { bridge, policy }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Retry forever; returns only once `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let key = self.bridge.key().to_string();
        let mut retry = RetryState::new(&self.policy);
        info!(bridge = %key, "Supervising bridge to {}", self.bridge.url());

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Some(delay) = retry.next_delay(&self.policy) {
                info!(
                    bridge = %key,
                    attempt = retry.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting in {:.1}s",
                    delay.as_secs_f64()
                );
                self.bridge
                    .ctx
                    .sink
                    .note_retry(&key, retry.attempt(), delay)
                    .await;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }

            let started = Instant::now();
            match self.bridge.connect(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    retry.note_uptime(&self.policy, started.elapsed());
                    retry.record_failure(&self.policy);
                    warn!(
                        bridge = %key,
                        attempt = retry.attempt(),
                        "Bridge attempt failed: {}",
                        e
                    );
                }
            }
        }

        info!(bridge = %key, "Supervisor stopped");
    }
}
