//! Bridges a subprocess's stdio to a remote WebSocket endpoint and keeps
//! that bridge alive with bounded-concurrency reconnection.

pub mod backoff;
pub mod bridge;
pub mod error;
pub mod heartbeat;
pub mod launcher;
pub mod orchestrator;
pub mod pumps;
pub mod supervisor;

pub use backoff::{BackoffPolicy, RetryState, INITIAL_BACKOFF, MAX_BACKOFF};
pub use bridge::{Bridge, BridgeContext, BridgeOptions, ConnectGate};
pub use error::{BridgeError, PumpDirection};
pub use heartbeat::EndpointMonitor;
pub use launcher::{launch, ProcessHandle, ProcessPipes};
pub use orchestrator::{plan, ConnectPolicy, LaunchPlan, Orchestrator, PlannedBridge};
pub use supervisor::Supervisor;

use tokio::sync::watch;

/// Resolves once shutdown has been signalled.
///
/// A dropped sender means nobody can request shutdown any more, so this
/// then never resolves.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
