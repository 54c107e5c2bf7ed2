use anyhow::Context;
use async_trait::async_trait;
use mcpipe_core::{LaunchSpec, ToolInfo, ToolProbe};
use rmcp::service::ServiceExt;
use rmcp::transport::TokioChildProcess;
use serde_json::Value;
use std::time::Duration;

/// Discovers a server's tools by speaking MCP to a separate, short-lived
/// instance of it.
///
/// The live bridged process is never touched: its stdio belongs to the
/// pumps, and a second reader on that pipe would steal protocol frames.
#[derive(Debug, Clone)]
pub struct McpToolProbe {
    timeout: Duration,
}

impl Default for McpToolProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl McpToolProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolProbe for McpToolProbe {
    async fn discover(&self, spec: &LaunchSpec) -> anyhow::Result<Vec<ToolInfo>> {
        tokio::time::timeout(self.timeout, list_tools(spec))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "tool discovery for '{}' timed out after {:?}",
                    spec,
                    self.timeout
                )
            })?
    }
}

/// Launch `spec`, run the MCP handshake, list every tool, then shut the
/// instance down again.
async fn list_tools(spec: &LaunchSpec) -> anyhow::Result<Vec<ToolInfo>> {
    let transport = TokioChildProcess::new(spec.command())
        .with_context(|| format!("failed to launch probe instance '{}'", spec))?;
    let service = ()
        .serve(transport)
        .await
        .map_err(|e| anyhow::anyhow!("MCP handshake failed for '{}': {}", spec, e))?;

    let listed = service.peer().list_all_tools().await;

    // Cancel the service (kills child process)
    if let Err(e) = service.cancel().await {
        tracing::warn!("Error cancelling probe instance '{}': {:?}", spec, e);
    }

    let tools = listed.map_err(|e| anyhow::anyhow!("list_tools failed for '{}': {}", spec, e))?;
    for t in &tools {
        tracing::debug!("  → tool '{}' from '{}'", t.name, spec);
    }
    Ok(tools.iter().map(convert_mcp_tool).collect())
}

/// Convert rmcp::model::Tool → ToolInfo for the status sink.
pub fn convert_mcp_tool(mcp_tool: &rmcp::model::Tool) -> ToolInfo {
    ToolInfo {
        name: mcp_tool.name.to_string(),
        description: mcp_tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default(),
        input_schema: Value::Object(mcp_tool.input_schema.as_ref().clone()),
    }
}
