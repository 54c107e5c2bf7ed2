//! Observer-facing status of targets and endpoints.
//!
//! Bridges report lifecycle changes through the [`StatusSink`] trait. Every
//! update is an atomic read-modify-write of the whole record set, so
//! concurrent writers never interleave partially.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::tools::{merge_tools, ToolInfo};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Connecting,
    Running,
    Error,
    #[default]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub status: RunState,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default = "Local::now")]
    pub last_updated: DateTime<Local>,
    /// Failed attempts so far in the current retry sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Delay before the next reconnection attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in_secs: Option<f64>,
}

impl Default for TargetStatus {
    fn default() -> Self {
        Self {
            status: RunState::default(),
            error: String::new(),
            tools: Vec::new(),
            last_updated: Local::now(),
            attempt: None,
            retry_in_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "Local::now")]
    pub last_heartbeat: DateTime<Local>,
}

impl Default for EndpointStatus {
    fn default() -> Self {
        Self {
            connected: false,
            error: String::new(),
            url: String::new(),
            last_heartbeat: Local::now(),
        }
    }
}

/// The whole status document: `{ "endpoints": {...}, "tools": {...} }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    pub endpoints: BTreeMap<String, EndpointStatus>,
    /// Per-target records, keyed by the rendered target.
    pub tools: BTreeMap<String, TargetStatus>,
}

// ============================================================================
// Updates
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TargetUpdate {
    pub status: RunState,
    pub error: Option<String>,
}

impl TargetUpdate {
    pub fn connecting() -> Self {
        Self {
            status: RunState::Connecting,
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            status: RunState::Running,
            error: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: RunState::Stopped,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunState::Error,
            error: Some(message.into()),
        }
    }
}

/// Partial endpoint update; `None` fields keep their previous value.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointUpdate {
    pub connected: bool,
    pub error: Option<String>,
    pub url: Option<String>,
}

impl EndpointUpdate {
    pub fn connected(url: impl Into<String>) -> Self {
        Self {
            connected: true,
            error: Some(String::new()),
            url: Some(url.into()),
        }
    }

    pub fn disconnected(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
            url: Some(url.into()),
        }
    }

    /// Refresh `last_heartbeat` on a live connection.
    pub fn heartbeat() -> Self {
        Self {
            connected: true,
            error: None,
            url: None,
        }
    }
}

impl StatusSnapshot {
    pub fn apply_target(&mut self, target: &str, update: TargetUpdate) {
        let entry = self.tools.entry(target.to_string()).or_default();
        entry.status = update.status;
        entry.error = update.error.unwrap_or_default();
        entry.last_updated = Local::now();
        if update.status == RunState::Running {
            entry.attempt = None;
            entry.retry_in_secs = None;
        }
    }

    pub fn apply_tools(&mut self, target: &str, tools: Vec<ToolInfo>) {
        let entry = self.tools.entry(target.to_string()).or_default();
        merge_tools(&mut entry.tools, tools);
        entry.last_updated = Local::now();
    }

    pub fn apply_endpoint(&mut self, endpoint: &str, update: EndpointUpdate) {
        let entry = self.endpoints.entry(endpoint.to_string()).or_default();
        entry.connected = update.connected;
        if let Some(error) = update.error {
            entry.error = error;
        }
        if let Some(url) = update.url {
            entry.url = url;
        }
        entry.last_heartbeat = Local::now();
    }

    pub fn apply_retry(&mut self, target: &str, attempt: u32, delay: Duration) {
        let entry = self.tools.entry(target.to_string()).or_default();
        entry.attempt = Some(attempt);
        entry.retry_in_secs = Some(delay.as_secs_f64());
        entry.last_updated = Local::now();
    }
}

// ============================================================================
// Sink trait
// ============================================================================

/// External store of per-target and per-endpoint health.
///
/// Implementations swallow (and log) their own storage failures; status
/// reporting never fails a bridge.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update_target(&self, target: &str, update: TargetUpdate);
    /// Merge discovered tools by name, keeping the current run state.
    async fn merge_tools(&self, target: &str, tools: Vec<ToolInfo>);
    async fn update_endpoint(&self, endpoint: &str, update: EndpointUpdate);
    /// Record that `target` will retry after `delay` following `attempt` failures.
    async fn note_retry(&self, target: &str, attempt: u32, delay: Duration);
    async fn snapshot(&self) -> StatusSnapshot;
}

/// One call made against a [`MemoryStatusSink`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Target {
        target: String,
        update: TargetUpdate,
    },
    Tools {
        target: String,
        names: Vec<String>,
    },
    Endpoint {
        endpoint: String,
        update: EndpointUpdate,
    },
    Retry {
        target: String,
        attempt: u32,
        delay: Duration,
    },
}

// ============================================================================
// In-memory sink
// ============================================================================

const JOURNAL_CAPACITY: usize = 1024;

/// Lock-guarded in-memory sink that also keeps a bounded journal of updates.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    inner: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshot: StatusSnapshot,
    journal: VecDeque<StatusEvent>,
}

impl MemoryState {
    fn record(&mut self, event: StatusEvent) {
        if self.journal.len() == JOURNAL_CAPACITY {
            self.journal.pop_front();
        }
        self.journal.push_back(event);
    }
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent updates, oldest first.
    pub async fn journal(&self) -> Vec<StatusEvent> {
        self.inner.read().await.journal.iter().cloned().collect()
    }
}

#[async_trait]
impl StatusSink for MemoryStatusSink {
    async fn update_target(&self, target: &str, update: TargetUpdate) {
        let mut state = self.inner.write().await;
        state.snapshot.apply_target(target, update.clone());
        state.record(StatusEvent::Target {
            target: target.to_string(),
            update,
        });
    }

    async fn merge_tools(&self, target: &str, tools: Vec<ToolInfo>) {
        let mut state = self.inner.write().await;
        let names = tools.iter().map(|t| t.name.clone()).collect();
        state.snapshot.apply_tools(target, tools);
        state.record(StatusEvent::Tools {
            target: target.to_string(),
            names,
        });
    }

    async fn update_endpoint(&self, endpoint: &str, update: EndpointUpdate) {
        let mut state = self.inner.write().await;
        state.snapshot.apply_endpoint(endpoint, update.clone());
        state.record(StatusEvent::Endpoint {
            endpoint: endpoint.to_string(),
            update,
        });
    }

    async fn note_retry(&self, target: &str, attempt: u32, delay: Duration) {
        let mut state = self.inner.write().await;
        state.snapshot.apply_retry(target, attempt, delay);
        state.record(StatusEvent::Retry {
            target: target.to_string(),
            attempt,
            delay,
        });
    }

    async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.snapshot.clone()
    }
}

// ============================================================================
// JSON file sink
// ============================================================================

/// Status document persisted as a JSON file that external observers poll.
///
/// Each update re-reads the file, applies the change and replaces the file
/// through a temp-file rename, all under one async mutex.
#[derive(Debug)]
pub struct JsonFileStatusSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStatusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file if missing; repair missing keys or corrupt contents.
    pub async fn init(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let snapshot = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<StatusSnapshot>(&content) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(
                        "Status file {} is corrupt ({}), reinitialising",
                        self.path.display(),
                        e
                    );
                    StatusSnapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusSnapshot::default(),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read status file {}", self.path.display())
                })
            }
        };
        self.write(&snapshot).await
    }

    async fn read(&self) -> StatusSnapshot {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable status file {}: {}", self.path.display(), e);
                StatusSnapshot::default()
            }),
            Err(_) => StatusSnapshot::default(),
        }
    }

    async fn write(&self, snapshot: &StatusSnapshot) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "status.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn modify<F>(&self, apply: F)
    where
        F: FnOnce(&mut StatusSnapshot) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut snapshot = self.read().await;
        apply(&mut snapshot);
        if let Err(e) = self.write(&snapshot).await {
            tracing::error!("Failed to update status file: {:#}", e);
        }
    }
}

#[async_trait]
impl StatusSink for JsonFileStatusSink {
    async fn update_target(&self, target: &str, update: TargetUpdate) {
        self.modify(|s| s.apply_target(target, update)).await;
    }

    async fn merge_tools(&self, target: &str, tools: Vec<ToolInfo>) {
        self.modify(|s| s.apply_tools(target, tools)).await;
    }

    async fn update_endpoint(&self, endpoint: &str, update: EndpointUpdate) {
        self.modify(|s| s.apply_endpoint(endpoint, update)).await;
    }

    async fn note_retry(&self, target: &str, attempt: u32, delay: Duration) {
        self.modify(|s| s.apply_retry(target, attempt, delay)).await;
    }

    async fn snapshot(&self) -> StatusSnapshot {
        let _guard = self.lock.lock().await;
        self.read().await
    }
}
