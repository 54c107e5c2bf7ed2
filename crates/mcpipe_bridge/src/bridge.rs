//! One bridge attempt: dial, resolve, launch, pump, close.
//!
//! A [`Bridge`] is cheap and reusable; every call to [`Bridge::connect`]
//! builds a fresh session (socket + process + pumps) and fully tears it
//! down before returning.

use futures::{SinkExt, StreamExt};
use mcpipe_core::{
    CommandResolver, ConfigSource, EndpointUpdate, LaunchSpec, StatusSink, Target, TargetUpdate,
    ToolProbe, Tunables,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, PumpDirection};
use crate::launcher::{launch, ProcessPipes};
use crate::pumps;
use crate::shutdown_requested;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for our own close handshake before dropping the socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timing knobs for a bridge session.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Grace delay before the tool-discovery probe runs.
    pub probe_delay: Duration,
    /// How long a subprocess gets to exit after SIGTERM.
    pub terminate_timeout: Duration,
    /// Upper bound on one WebSocket dial, so a hung handshake cannot hold
    /// a connect permit forever.
    pub connect_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            probe_delay: Duration::from_secs(3),
            terminate_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Tunables> for BridgeOptions {
    fn from(t: &Tunables) -> Self {
        Self {
            probe_delay: t.probe_delay,
            terminate_timeout: t.terminate_timeout,
            ..Default::default()
        }
    }
}

/// Process-wide cap on bridges that are mid-handshake.
///
/// Held only while dialing; Active bridges do not count against it.
#[derive(Debug, Clone)]
pub struct ConnectGate {
    permits: Arc<Semaphore>,
}

impl ConnectGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Permits not currently held by a dialing bridge.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn enter(&self) -> Result<SemaphorePermit<'_>, BridgeError> {
        self.permits.acquire().await.map_err(|_| BridgeError::Connect {
            cause: "connect gate closed".into(),
        })
    }
}

impl Default for ConnectGate {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Collaborators shared by every bridge of one process.
#[derive(Clone)]
pub struct BridgeContext {
    pub config: Arc<dyn ConfigSource>,
    pub resolver: Arc<CommandResolver>,
    pub sink: Arc<dyn StatusSink>,
    pub probe: Option<Arc<dyn ToolProbe>>,
    pub gate: ConnectGate,
    pub options: BridgeOptions,
}

/// Bridge between one Target's subprocess and one WebSocket URL.
#[derive(Clone)]
pub struct Bridge {
    url: String,
    target: Target,
    endpoint: String,
    key: String,
    pub(crate) ctx: BridgeContext,
}

impl Bridge {
    pub fn new(
        url: impl Into<String>,
        target: Target,
        endpoint_name: impl Into<String>,
        ctx: BridgeContext,
    ) -> Self {
        let key = target.to_string();
        Self {
            url: url.into(),
            target,
            endpoint: endpoint_name.into(),
            key,
            ctx,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Status key of this bridge's Target.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Run one session until it ends.
    ///
    /// Returns `Ok(())` only when shutdown was requested; every other
    /// ending is an error the supervisor retries. Any subprocess started by
    /// this call has been reaped by the time it returns.
    pub async fn connect(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), BridgeError> {
        self.ctx
            .sink
            .update_target(&self.key, TargetUpdate::connecting())
            .await;

        let dialed = tokio::select! {
            r = self.dial() => r,
            _ = shutdown_requested(shutdown) => {
                self.ctx
                    .sink
                    .update_target(&self.key, TargetUpdate::stopped())
                    .await;
                return Ok(());
            }
        };
        let ws = match dialed {
            Ok(ws) => ws,
            Err(e) => {
                warn!(bridge = %self.key, url = %self.url, "{}", e);
                self.ctx
                    .sink
                    .update_endpoint(
                        &self.endpoint,
                        EndpointUpdate::disconnected(&self.url, e.to_string()),
                    )
                    .await;
                self.ctx
                    .sink
                    .update_target(&self.key, TargetUpdate::error(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        info!(bridge = %self.key, "Connected to {}", self.url);
        self.ctx
            .sink
            .update_endpoint(&self.endpoint, EndpointUpdate::connected(&self.url))
            .await;

        let result = self.run_session(ws, shutdown).await;
        match &result {
            Ok(()) => info!(bridge = %self.key, "Bridge stopped for shutdown"),
            Err(e) if e.is_failure() => {
                warn!(bridge = %self.key, "Bridge failed: {}", e);
                self.ctx
                    .sink
                    .update_target(&self.key, TargetUpdate::error(e.to_string()))
                    .await;
            }
            Err(e) => info!(bridge = %self.key, "Bridge ended: {}", e),
        }
        result
    }

    async fn dial(&self) -> Result<WsStream, BridgeError> {
        let _permit = self.ctx.gate.enter().await?;
        debug!(bridge = %self.key, "Dialing {}", self.url);

        let connecting = connect_async(self.url.as_str());
        match tokio::time::timeout(self.ctx.options.connect_timeout, connecting).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(BridgeError::Connect {
                cause: e.to_string(),
            }),
            Err(_) => Err(BridgeError::Connect {
                cause: format!(
                    "handshake timed out after {:?}",
                    self.ctx.options.connect_timeout
                ),
            }),
        }
    }

    async fn run_session(
        &self,
        ws: WsStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        let (mut ws_tx, ws_rx) = ws.split();

        // Re-resolved on every attempt so config edits apply on the next retry
        let config = self.ctx.config.snapshot();
        let spawned = self
            .ctx
            .resolver
            .resolve(&config, &self.target)
            .map_err(BridgeError::from)
            .and_then(|spec| launch(&spec).map(|launched| (spec, launched)));
        let (spec, (mut process, pipes)) = match spawned {
            Ok(s) => s,
            Err(e) => {
                close_socket(&mut ws_tx).await;
                return Err(e);
            }
        };

        info!(bridge = %self.key, pid = ?process.id(), "Started '{}'", spec);
        self.ctx
            .sink
            .update_target(&self.key, TargetUpdate::running())
            .await;
        let _probe = self.schedule_probe(spec);

        // Active: the first pump to finish decides the outcome. stdin is
        // owned by the inbound pump, so it closes as soon as the select ends.
        let ProcessPipes {
            stdin,
            stdout,
            stderr,
        } = pipes;
        let outcome = tokio::select! {
            r = pumps::inbound(ws_rx, stdin) => r,
            r = pumps::outbound(stdout, &mut ws_tx) => match r {
                Ok(()) => Err(BridgeError::ProcessEnded),
                Err(e) => Err(e),
            },
            r = async {
                pumps::diagnostic(stderr, tokio::io::stderr()).await?;
                // stderr closing alone does not end the session
                std::future::pending::<Result<(), BridgeError>>().await
            } => r,
            _ = shutdown_requested(shutdown) => Ok(()),
        };

        // Closing
        if !matches!(outcome, Err(BridgeError::WebSocketClosed { .. })) {
            close_socket(&mut ws_tx).await;
        }
        process
            .terminate(self.ctx.options.terminate_timeout)
            .await;
        self.ctx
            .sink
            .update_target(&self.key, TargetUpdate::stopped())
            .await;
        if let Err(e) = &outcome {
            if lost_socket(e) {
                self.ctx
                    .sink
                    .update_endpoint(
                        &self.endpoint,
                        EndpointUpdate::disconnected(&self.url, e.to_string()),
                    )
                    .await;
            }
        }

        outcome
    }

    fn schedule_probe(&self, spec: LaunchSpec) -> Option<ProbeTask> {
        let probe = self.ctx.probe.clone()?;
        let sink = self.ctx.sink.clone();
        let key = self.key.clone();
        let delay = self.ctx.options.probe_delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match probe.discover(&spec).await {
                Ok(tools) if tools.is_empty() => {
                    debug!(bridge = %key, "Tool discovery found no tools");
                }
                Ok(tools) => {
                    info!(bridge = %key, "Discovered {} tools", tools.len());
                    sink.merge_tools(&key, tools).await;
                }
                Err(e) => warn!(bridge = %key, "Tool discovery failed: {:#}", e),
            }
        });
        Some(ProbeTask(handle))
    }
}

/// Whether the session ended because the socket itself went away.
fn lost_socket(e: &BridgeError) -> bool {
    match e {
        BridgeError::WebSocketClosed { .. } => true,
        BridgeError::Pump { direction, .. } => *direction != PumpDirection::Diagnostic,
        _ => false,
    }
}

/// Aborts the probe if the session ends first.
struct ProbeTask(JoinHandle<()>);

impl Drop for ProbeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn close_socket<S>(ws_tx: &mut S)
where
    S: futures::Sink<tokio_tungstenite::tungstenite::Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match tokio::time::timeout(CLOSE_TIMEOUT, ws_tx.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("WebSocket close: {}", e),
        Err(_) => debug!("WebSocket close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_is_at_least_one() {
        let gate = ConnectGate::new(0);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_gate_permits_released_on_drop() {
        let gate = ConnectGate::new(2);
        {
            let _a = gate.enter().await.unwrap();
            let _b = gate.enter().await.unwrap();
            assert_eq!(gate.available(), 0);
        }
        assert_eq!(gate.available(), 2);
    }

    #[test]
    fn test_lost_socket_classification() {
        assert!(lost_socket(&BridgeError::WebSocketClosed {
            code: Some(4004),
            reason: "gone".into(),
        }));
        assert!(lost_socket(&BridgeError::pump(PumpDirection::Outbound, "reset")));
        assert!(lost_socket(&BridgeError::pump(PumpDirection::Inbound, "reset")));
        assert!(!lost_socket(&BridgeError::pump(PumpDirection::Diagnostic, "broken")));
        assert!(!lost_socket(&BridgeError::ProcessEnded));
    }

    #[test]
    fn test_options_from_tunables() {
        let tunables = Tunables {
            probe_delay: Duration::from_millis(10),
            terminate_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let opts = BridgeOptions::from(&tunables);
        assert_eq!(opts.probe_delay, Duration::from_millis(10));
        assert_eq!(opts.terminate_timeout, Duration::from_millis(20));
        assert_eq!(opts.connect_timeout, Duration::from_secs(30));
    }
}
