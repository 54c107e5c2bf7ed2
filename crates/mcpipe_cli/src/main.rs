use anyhow::Context;
use clap::Parser;
use mcpipe_bridge::{
    plan, BackoffPolicy, BridgeContext, BridgeOptions, ConnectGate, EndpointMonitor, Orchestrator,
};
use mcpipe_core::{
    default_config_path, CommandResolver, FileConfigSource, JsonFileStatusSink, PipeConfig,
    ResolverOptions, StatusSink, ToolProbe, Tunables,
};
use mcpipe_mcp::McpToolProbe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

mod logging;

#[derive(Parser, Debug)]
#[command(name = "mcpipe", author, version, about, long_about = None)]
struct Args {
    /// Bridge only this target: a configured server name or a script path.
    /// Without it, every enabled server in the config is bridged.
    target: Option<String>,

    /// Path to the JSON config (defaults to ./mcp_config.json)
    #[arg(short, long, env = "MCP_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket endpoint used when the config defines none
    #[arg(short, long, env = "MCP_ENDPOINT")]
    endpoint: Option<String>,

    /// Status file polled by external observers
    #[arg(long, default_value = ".mcp_status.json")]
    status_file: PathBuf,

    /// Serve the read-only status API on this address (e.g. 127.0.0.1:8090)
    #[arg(long)]
    status_addr: Option<String>,

    /// Keep a heartbeat connection to every configured endpoint
    #[arg(long)]
    monitor_endpoints: bool,

    /// Skip MCP tool discovery
    #[arg(long)]
    no_probe: bool,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,

    /// Also write daily-rolling log files into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _log_guard = logging::init_tracing(args.log_json, args.log_dir.as_deref())?;

    let mut tunables = Tunables::from_env();
    if let Some(url) = &args.endpoint {
        tunables.endpoint_url = Some(url.clone());
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    info!("Loading config from {}", config_path.display());
    let config = PipeConfig::load_or_default(&config_path);
    let launch_plan =
        plan(&config, &tunables, args.target.as_deref()).context("Invalid configuration")?;

    let status = Arc::new(JsonFileStatusSink::new(&args.status_file));
    status.init().await?;
    let sink: Arc<dyn StatusSink> = status;

    let probe: Option<Arc<dyn ToolProbe>> = if args.no_probe {
        None
    } else {
        Some(Arc::new(McpToolProbe::default()))
    };

    let ctx = BridgeContext {
        config: Arc::new(FileConfigSource::new(&config_path)),
        resolver: Arc::new(CommandResolver::new(ResolverOptions::from(&tunables))),
        sink: sink.clone(),
        probe,
        gate: ConnectGate::new(tunables.max_concurrent_connects),
        options: BridgeOptions::from(&tunables),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if let Some(addr) = &args.status_addr {
        #[cfg(feature = "gateway")]
        background.push(
            mcpipe_gateway::StatusServer::new(sink.clone(), addr.clone())
                .start(shutdown_rx.clone()),
        );
        #[cfg(not(feature = "gateway"))]
        tracing::warn!("Built without the gateway feature, ignoring --status-addr {}", addr);
    }

    if args.monitor_endpoints {
        for (name, endpoint) in config.enabled_endpoints() {
            let monitor = EndpointMonitor::new(name, endpoint.url.clone(), sink.clone());
            background.push(tokio::spawn(monitor.run(shutdown_rx.clone())));
        }
    }

    let orchestrator = Orchestrator::new(ctx, BackoffPolicy::default(), &tunables);
    let mut supervisors =
        tokio::spawn(async move { orchestrator.run(launch_plan, shutdown_rx).await });

    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let mut supervisors_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM, shutting down");
        }
        joined = &mut supervisors => {
            supervisors_done = true;
            if let Err(e) = joined {
                error!("Orchestrator task failed: {}", e);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !supervisors_done {
        if let Err(e) = supervisors.await {
            error!("Orchestrator task failed: {}", e);
        }
    }
    for handle in background {
        let _ = handle.await;
    }

    info!("mcpipe stopped");
    Ok(())
}
