//! Endpoint liveness monitor.
//!
//! Holds its own WebSocket to an endpoint and pings it periodically,
//! independent of any bridge, so observers can tell an unreachable
//! endpoint from a failing server process.

use anyhow::Context;
use futures::{SinkExt, Stream, StreamExt};
use mcpipe_core::{EndpointUpdate, StatusSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::shutdown_requested;

const PING_PAYLOAD: &[u8] = b"mcpipe-heartbeat";

pub struct EndpointMonitor {
    name: String,
    url: String,
    sink: Arc<dyn StatusSink>,
    interval: Duration,
    pong_timeout: Duration,
    retry_delay: Duration,
}

impl EndpointMonitor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            sink,
            interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
        }
    }

    pub fn with_timing(mut self, interval: Duration, pong_timeout: Duration, retry_delay: Duration) -> Self {
        self.interval = interval;
        self.pong_timeout = pong_timeout;
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(endpoint = %self.name, "Monitoring {}", self.url);
        loop {
            let outcome = tokio::select! {
                r = self.watch_once() => r,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            if let Err(e) = outcome {
                warn!(endpoint = %self.name, "Heartbeat failed: {:#}", e);
                self.sink
                    .update_endpoint(
                        &self.name,
                        EndpointUpdate::disconnected(&self.url, format!("{:#}", e)),
                    )
                    .await;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!(endpoint = %self.name, "Monitor stopped");
    }

    /// Connect and ping until something fails.
    async fn watch_once(&self) -> anyhow::Result<()> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        self.sink
            .update_endpoint(&self.name, EndpointUpdate::connected(&self.url))
            .await;

        let (mut tx, mut rx) = ws.split();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tx.send(Message::Ping(PING_PAYLOAD.to_vec()))
                .await
                .context("failed to send ping")?;
            tokio::time::timeout(self.pong_timeout, wait_for_pong(&mut rx))
                .await
                .map_err(|_| anyhow::anyhow!("no pong within {:?}", self.pong_timeout))??;
            debug!(endpoint = %self.name, "Pong received");
            self.sink
                .update_endpoint(&self.name, EndpointUpdate::heartbeat())
                .await;
        }
    }
}

async fn wait_for_pong<S>(rx: &mut S) -> anyhow::Result<()>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = rx.next().await {
        match msg.context("WebSocket read failed")? {
            Message::Pong(_) => return Ok(()),
            Message::Close(frame) => {
                let detail = frame
                    .map(|f| format!("code {}: {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "no close frame".into());
                anyhow::bail!("endpoint closed the connection ({})", detail);
            }
            _ => {}
        }
    }
    anyhow::bail!("connection closed")
}
