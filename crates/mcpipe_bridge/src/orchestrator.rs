//! Turns a config snapshot into a set of supervised bridges.

use mcpipe_core::{ConfigError, PipeConfig, Target, Tunables};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::bridge::{Bridge, BridgeContext};
use crate::shutdown_requested;
use crate::supervisor::Supervisor;

/// Endpoint name used when the URL comes from `MCP_ENDPOINT` alone.
pub const FALLBACK_ENDPOINT: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPolicy {
    /// Every server connects to the one primary endpoint.
    Primary,
    /// Every server connects to every endpoint as `server::endpoint`.
    AllEndpoints,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBridge {
    pub target: Target,
    pub endpoint: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub policy: ConnectPolicy,
    pub bridges: Vec<PlannedBridge>,
    /// Configured but disabled servers.
    pub skipped: Vec<String>,
}

/// Decide which bridges to run.
///
/// With `only`, exactly one target is planned: a configured server name or
/// a path to a script. Otherwise every enabled server is planned.
pub fn plan(
    config: &PipeConfig,
    tunables: &Tunables,
    only: Option<&str>,
) -> Result<LaunchPlan, ConfigError> {
    let (servers, skipped): (Vec<String>, Vec<String>) = match only {
        Some(name) => {
            if config.server(name).is_none() && !Path::new(name).exists() {
                return Err(ConfigError::UnknownTarget(name.to_string()));
            }
            (vec![name.to_string()], Vec::new())
        }
        None => {
            let enabled: Vec<String> = config
                .enabled_servers()
                .into_iter()
                .map(String::from)
                .collect();
            if enabled.is_empty() {
                return Err(ConfigError::NoEnabledServers);
            }
            let disabled = config
                .disabled_servers()
                .into_iter()
                .map(String::from)
                .collect();
            (enabled, disabled)
        }
    };

    let mut endpoints: Vec<(String, String)> = config
        .enabled_endpoints()
        .into_iter()
        .map(|(name, ep)| (name.to_string(), ep.url.clone()))
        .collect();
    if endpoints.is_empty() {
        let url = tunables
            .endpoint_url
            .clone()
            .ok_or(ConfigError::NoEndpoint)?;
        endpoints.push((FALLBACK_ENDPOINT.to_string(), url));
    }

    let connect_all = config
        .connect_all_endpoints
        .or(tunables.connect_all_endpoints)
        .unwrap_or(false);
    let policy = if connect_all && only.is_none() && endpoints.len() > 1 {
        ConnectPolicy::AllEndpoints
    } else {
        ConnectPolicy::Primary
    };

    let bridges = match policy {
        ConnectPolicy::AllEndpoints => servers
            .iter()
            .flat_map(|server| {
                endpoints.iter().map(move |(name, url)| PlannedBridge {
                    target: Target::with_endpoint(server.clone(), name.clone()),
                    endpoint: name.clone(),
                    url: url.clone(),
                })
            })
            .collect(),
        ConnectPolicy::Primary => {
            let (name, url) = primary_endpoint(config, tunables, &endpoints);
            servers
                .iter()
                .map(|server| PlannedBridge {
                    target: Target::new(server.clone()),
                    endpoint: name.clone(),
                    url: url.clone(),
                })
                .collect()
        }
    };

    Ok(LaunchPlan {
        policy,
        bridges,
        skipped,
    })
}

/// `MCP_PRIMARY_ENDPOINT`, then `primaryEndpoint`, then the first by name.
fn primary_endpoint(
    config: &PipeConfig,
    tunables: &Tunables,
    endpoints: &[(String, String)],
) -> (String, String) {
    let wanted = tunables
        .primary_endpoint
        .as_deref()
        .or(config.primary_endpoint.as_deref());
    if let Some(wanted) = wanted {
        if let Some(found) = endpoints.iter().find(|(name, _)| name == wanted) {
            return found.clone();
        }
        warn!(
            "Primary endpoint '{}' is not configured or disabled, using '{}'",
            wanted, endpoints[0].0
        );
    }
    endpoints[0].clone()
}

/// Runs one supervisor per planned bridge.
pub struct Orchestrator {
    ctx: BridgeContext,
    policy: BackoffPolicy,
    batch_size: usize,
    batch_delay: Duration,
}

impl Orchestrator {
    pub fn new(ctx: BridgeContext, policy: BackoffPolicy, tunables: &Tunables) -> Self {
        Self {
            ctx,
            policy,
            batch_size: tunables.batch_size.max(1),
            batch_delay: tunables.batch_delay,
        }
    }

    /// Start every planned bridge and wait until all supervisors stop.
    ///
    /// Cross-product plans start in batches with a pause between them.
    pub async fn run(&self, plan: LaunchPlan, shutdown: watch::Receiver<bool>) {
        for name in &plan.skipped {
            info!("Skipping disabled server '{}'", name);
        }

        let batch = match plan.policy {
            ConnectPolicy::AllEndpoints => self.batch_size,
            ConnectPolicy::Primary => plan.bridges.len().max(1),
        };
        info!(
            "Starting {} bridge(s), policy {:?}, batch size {}",
            plan.bridges.len(),
            plan.policy,
            batch
        );

        let mut waiter = shutdown.clone();
        let mut supervisors = JoinSet::new();
        for (i, chunk) in plan.bridges.chunks(batch).enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.batch_delay) => {}
                    _ = shutdown_requested(&mut waiter) => break,
                }
            }
            for planned in chunk {
                let bridge = Bridge::new(
                    planned.url.clone(),
                    planned.target.clone(),
                    planned.endpoint.clone(),
                    self.ctx.clone(),
                );
                let supervisor = Supervisor::new(bridge, self.policy.clone());
                supervisors.spawn(supervisor.run(shutdown.clone()));
            }
        }

        while let Some(joined) = supervisors.join_next().await {
            if let Err(e) = joined {
                error!("Supervisor task failed: {}", e);
            }
        }
        info!("All bridges stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpipe_core::{EndpointEntry, ServerEntry};

    fn stdio(command: &str) -> ServerEntry {
        ServerEntry {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    fn endpoint(url: &str) -> EndpointEntry {
        EndpointEntry {
            url: url.into(),
            enabled: true,
        }
    }

    fn two_by_two() -> PipeConfig {
        let mut config = PipeConfig::default();
        config.mcp_servers.insert("calc".into(), stdio("calc_server"));
        config.mcp_servers.insert("notes".into(), stdio("notes_server"));
        config.mcp_servers.insert(
            "old".into(),
            ServerEntry {
                disabled: true,
                ..stdio("old_server")
            },
        );
        config.mcp_endpoints.insert("a".into(), endpoint("ws://a"));
        config.mcp_endpoints.insert("b".into(), endpoint("ws://b"));
        config
    }

    fn no_env() -> Tunables {
        Tunables::default()
    }

    #[test]
    fn test_primary_policy_uses_first_endpoint() {
        let plan = plan(&two_by_two(), &no_env(), None).unwrap();
        assert_eq!(plan.policy, ConnectPolicy::Primary);
        assert_eq!(plan.bridges.len(), 2);
        assert!(plan.bridges.iter().all(|b| b.url == "ws://a"));
        assert_eq!(plan.bridges[0].target.to_string(), "calc");
        assert_eq!(plan.skipped, vec!["old".to_string()]);
    }

    #[test]
    fn test_named_primary_endpoint() {
        let mut config = two_by_two();
        config.primary_endpoint = Some("b".into());
        let plan = plan(&config, &no_env(), None).unwrap();
        assert!(plan.bridges.iter().all(|b| b.endpoint == "b"));

        let tunables = Tunables {
            primary_endpoint: Some("a".into()),
            ..Default::default()
        };
        let plan = super::plan(&config, &tunables, None).unwrap();
        assert!(plan.bridges.iter().all(|b| b.endpoint == "a"));
    }

    #[test]
    fn test_cross_product_targets() {
        let mut config = two_by_two();
        config.connect_all_endpoints = Some(true);
        let plan = plan(&config, &no_env(), None).unwrap();
        assert_eq!(plan.policy, ConnectPolicy::AllEndpoints);
        let targets: Vec<String> = plan.bridges.iter().map(|b| b.target.to_string()).collect();
        assert_eq!(targets, vec!["calc::a", "calc::b", "notes::a", "notes::b"]);
    }

    #[test]
    fn test_connect_all_env_fallback() {
        let tunables = Tunables {
            connect_all_endpoints: Some(true),
            ..Default::default()
        };
        let plan = plan(&two_by_two(), &tunables, None).unwrap();
        assert_eq!(plan.bridges.len(), 4);

        // The config flag wins over the environment
        let mut config = two_by_two();
        config.connect_all_endpoints = Some(false);
        let plan = super::plan(&config, &tunables, None).unwrap();
        assert_eq!(plan.policy, ConnectPolicy::Primary);
    }

    #[test]
    fn test_fallback_endpoint_url() {
        let mut config = two_by_two();
        config.mcp_endpoints.clear();
        assert!(matches!(
            plan(&config, &no_env(), None),
            Err(ConfigError::NoEndpoint)
        ));

        let tunables = Tunables {
            endpoint_url: Some("ws://fallback".into()),
            connect_all_endpoints: Some(true),
            ..Default::default()
        };
        let plan = plan(&config, &tunables, None).unwrap();
        assert_eq!(plan.policy, ConnectPolicy::Primary);
        assert!(plan
            .bridges
            .iter()
            .all(|b| b.url == "ws://fallback" && b.endpoint == FALLBACK_ENDPOINT));
    }

    #[test]
    fn test_no_enabled_servers() {
        let mut config = PipeConfig::default();
        config.mcp_servers.insert(
            "old".into(),
            ServerEntry {
                disabled: true,
                ..stdio("x")
            },
        );
        assert!(matches!(
            plan(&config, &no_env(), None),
            Err(ConfigError::NoEnabledServers)
        ));
    }

    #[test]
    fn test_single_target_mode() {
        let plan = plan(&two_by_two(), &no_env(), Some("notes")).unwrap();
        assert_eq!(plan.bridges.len(), 1);
        assert_eq!(plan.bridges[0].target.to_string(), "notes");

        assert!(matches!(
            super::plan(&two_by_two(), &no_env(), Some("nope")),
            Err(ConfigError::UnknownTarget(_))
        ));
    }
}
