use arc_swap::ArcSwap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::resolver::ResolveError;

/// Errors raised while loading configuration or planning targets at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no enabled mcpServers found in config")]
    NoEnabledServers,
    #[error("no endpoint configured: add mcpEndpoints to the config or set MCP_ENDPOINT")]
    NoEndpoint,
    #[error("'{0}' is neither a configured server nor an existing script")]
    UnknownTarget(String),
}

// ============================================================================
// Top-level config
// ============================================================================

/// The parsed configuration record.
///
/// Only entry lookup by name is needed by the bridge; the record is re-read
/// from its [`ConfigSource`] on every connection attempt.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipeConfig {
    #[serde(deserialize_with = "null_entries_as_default")]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
    #[serde(deserialize_with = "null_entries_as_default")]
    pub mcp_endpoints: BTreeMap<String, EndpointEntry>,
    pub connect_all_endpoints: Option<bool>,
    pub primary_endpoint: Option<String>,
}

impl PipeConfig {
    /// Load config from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Try to load from path; a missing or unreadable file yields an empty config.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(ConfigError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::default()
            }
            Err(e) => {
                tracing::warn!("{}, using empty config", e);
                Self::default()
            }
        }
    }

    pub fn server(&self, name: &str) -> Option<&ServerEntry> {
        self.mcp_servers.get(name)
    }

    /// Names of servers not marked disabled, in name order.
    pub fn enabled_servers(&self) -> Vec<&str> {
        self.mcp_servers
            .iter()
            .filter(|(_, entry)| !entry.disabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn disabled_servers(&self) -> Vec<&str> {
        self.mcp_servers
            .iter()
            .filter(|(_, entry)| entry.disabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Enabled endpoints that actually carry a URL, in name order.
    pub fn enabled_endpoints(&self) -> Vec<(&str, &EndpointEntry)> {
        self.mcp_endpoints
            .iter()
            .filter(|(_, ep)| ep.enabled && !ep.url.trim().is_empty())
            .map(|(name, ep)| (name.as_str(), ep))
            .collect()
    }
}

// ============================================================================
// Entries
// ============================================================================

/// A raw `mcpServers` entry as it appears in the file.
///
/// Validation into a [`ServerKind`] happens at resolution time so that an
/// edited file is re-checked on every attempt.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub disabled: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub transport_type: Option<String>,
    pub command: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub args: Vec<String>,
    pub url: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub env: BTreeMap<String, Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub headers: BTreeMap<String, Value>,
}

/// A validated server definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKind {
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        headers: Vec<(String, String)>,
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
        headers: Vec<(String, String)>,
        env: BTreeMap<String, String>,
    },
}

impl ServerEntry {
    /// Transport name, lowercased. `type` wins over `transportType`; stdio when absent.
    pub fn transport(&self) -> String {
        self.kind
            .as_deref()
            .or(self.transport_type.as_deref())
            .unwrap_or("stdio")
            .to_lowercase()
    }

    /// Validate this entry into a typed server definition.
    pub fn validate(&self, name: &str) -> Result<ServerKind, ResolveError> {
        let env = stringify_map(&self.env);
        let transport = self.transport();
        match transport.as_str() {
            "stdio" => {
                let command = non_empty(self.command.as_deref()).ok_or_else(|| {
                    ResolveError::MissingField {
                        server: name.to_string(),
                        field: "command",
                    }
                })?;
                Ok(ServerKind::Stdio {
                    command,
                    args: self.args.clone(),
                    env,
                })
            }
            "sse" | "http" | "streamablehttp" => {
                let url =
                    non_empty(self.url.as_deref()).ok_or_else(|| ResolveError::MissingField {
                        server: name.to_string(),
                        field: "url",
                    })?;
                let headers = stringify_map(&self.headers).into_iter().collect();
                if transport == "sse" {
                    Ok(ServerKind::Sse { url, headers, env })
                } else {
                    Ok(ServerKind::Http { url, headers, env })
                }
            }
            _ => Err(ResolveError::UnsupportedType {
                server: name.to_string(),
                kind: transport,
            }),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Env and header values may be any JSON scalar; strings are taken verbatim.
fn stringify_map(map: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EndpointEntry {
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_enabled")]
    pub enabled: bool,
}

impl Default for EndpointEntry {
    fn default() -> Self {
        Self {
            url: String::new(),
            enabled: true,
        }
    }
}

// Hand-edited configs write `null` for "not set"; treat it like a missing key.

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_enabled<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn null_entries_as_default<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let entries = Option::<BTreeMap<String, Option<T>>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|(name, entry)| (name, entry.unwrap_or_default()))
        .collect())
}

// ============================================================================
// Config sources
// ============================================================================

/// Where a bridge gets its configuration snapshot on each attempt.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> PipeConfig;
}

/// Re-reads a JSON file on every snapshot.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn snapshot(&self) -> PipeConfig {
        PipeConfig::load_or_default(&self.path)
    }
}

/// An in-memory config that can be swapped while bridges are running.
#[derive(Debug)]
pub struct SharedConfigSource {
    inner: ArcSwap<PipeConfig>,
}

impl SharedConfigSource {
    pub fn new(config: PipeConfig) -> Self {
        Self {
            inner: ArcSwap::from_pointee(config),
        }
    }

    pub fn replace(&self, config: PipeConfig) {
        self.inner.store(Arc::new(config));
    }
}

impl ConfigSource for SharedConfigSource {
    fn snapshot(&self) -> PipeConfig {
        self.inner.load().as_ref().clone()
    }
}

/// `$MCP_CONFIG`, else `./mcp_config.json`.
pub fn default_config_path() -> PathBuf {
    match std::env::var("MCP_CONFIG") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("mcp_config.json"),
    }
}

// ============================================================================
// Environment tunables
// ============================================================================

/// Knobs that come from the environment rather than the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    /// Fallback endpoint when no `mcpEndpoints` are configured.
    pub endpoint_url: Option<String>,
    /// How many bridges may be dialing a WebSocket at the same time.
    pub max_concurrent_connects: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub connect_all_endpoints: Option<bool>,
    pub primary_endpoint: Option<String>,
    /// Interpreter used for `.py` script targets.
    pub script_interpreter: String,
    /// Program + leading args of the stdio-to-HTTP/SSE proxy.
    pub proxy_command: Vec<String>,
    /// Grace delay before the tool-discovery probe runs.
    pub probe_delay: Duration,
    /// How long a subprocess gets to exit after SIGTERM.
    pub terminate_timeout: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            max_concurrent_connects: 8,
            batch_size: 4,
            batch_delay: Duration::from_millis(1000),
            connect_all_endpoints: None,
            primary_endpoint: None,
            script_interpreter: "python3".to_string(),
            proxy_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "mcp_proxy".to_string(),
            ],
            probe_delay: Duration::from_millis(3000),
            terminate_timeout: Duration::from_millis(5000),
        }
    }
}

impl Tunables {
    /// Defaults with process environment overrides applied.
    pub fn from_env() -> Self {
        let mut tunables = Self::default();
        tunables.apply_overrides(|key| std::env::var(key).ok());
        tunables
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MCP_ENDPOINT") {
            self.endpoint_url = Some(v.trim().to_string());
        }
        if let Some(v) = get("MCP_MAX_CONCURRENT_CONNECTS") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.max_concurrent_connects = n.max(1);
            }
        }
        if let Some(v) = get("MCP_BATCH_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                self.batch_size = n.max(1);
            }
        }
        if let Some(v) = get("MCP_BATCH_DELAY_MS") {
            if let Ok(n) = v.trim().parse() {
                self.batch_delay = Duration::from_millis(n);
            }
        }
        if let Some(v) = get("MCP_CONNECT_ALL_ENDPOINTS") {
            self.connect_all_endpoints = parse_flag(&v);
        }
        if let Some(v) = get("MCP_PRIMARY_ENDPOINT") {
            self.primary_endpoint = Some(v.trim().to_string());
        }
        if let Some(v) = get("MCP_SCRIPT_INTERPRETER") {
            self.script_interpreter = v.trim().to_string();
        }
        if let Some(v) = get("MCP_PROXY_COMMAND") {
            self.proxy_command = v.split_whitespace().map(String::from).collect();
        }
        if let Some(v) = get("MCP_PROBE_DELAY_MS") {
            if let Ok(n) = v.trim().parse() {
                self.probe_delay = Duration::from_millis(n);
            }
        }
        if let Some(v) = get("MCP_TERMINATE_TIMEOUT_MS") {
            if let Ok(n) = v.trim().parse() {
                self.terminate_timeout = Duration::from_millis(n);
            }
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
