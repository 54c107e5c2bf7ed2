use chrono::{DateTime, Local};
use mcpipe_core::{EndpointStatus, RunState, TargetStatus};
use serde::{Deserialize, Serialize};

/// `GET /endpoint-status` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub connected: bool,
    pub error: String,
    pub last_check: DateTime<Local>,
}

impl From<&EndpointStatus> for EndpointHealth {
    fn from(ep: &EndpointStatus) -> Self {
        Self {
            connected: ep.connected,
            error: ep.error.clone(),
            last_check: ep.last_heartbeat,
        }
    }
}

/// `GET /tool-status` entry: run state of one target, without its tool list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHealth {
    pub status: RunState,
    pub error: String,
    pub last_check: DateTime<Local>,
}

impl From<&TargetStatus> for ToolHealth {
    fn from(t: &TargetStatus) -> Self {
        Self {
            status: t.status,
            error: t.error.clone(),
            last_check: t.last_updated,
        }
    }
}
