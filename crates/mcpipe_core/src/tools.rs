//! Tool descriptors reported by bridged servers, and the probe seam that
//! discovers them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::launch::LaunchSpec;

/// A capability declared by a bridged server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

impl ToolInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: Value::Null,
        }
    }
}

/// Union `incoming` into `existing` by tool name.
///
/// Same-named entries are replaced in place; new names are appended in the
/// order they arrive.
pub fn merge_tools(existing: &mut Vec<ToolInfo>, incoming: Vec<ToolInfo>) {
    for tool in incoming {
        match existing.iter_mut().find(|t| t.name == tool.name) {
            Some(slot) => *slot = tool,
            None => existing.push(tool),
        }
    }
}

/// Discovers the tools a server exposes by launching a throwaway instance of it.
#[async_trait]
pub trait ToolProbe: Send + Sync {
    async fn discover(&self, spec: &LaunchSpec) -> anyhow::Result<Vec<ToolInfo>>;
}
