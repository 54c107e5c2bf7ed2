use mcpipe_core::ResolveError;
use std::fmt;

/// Which copy loop a pump failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpDirection {
    /// WebSocket → subprocess stdin.
    Inbound,
    /// Subprocess stdout → WebSocket.
    Outbound,
    /// Subprocess stderr → local stderr.
    Diagnostic,
}

impl fmt::Display for PumpDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inbound => "websocket→stdin",
            Self::Outbound => "stdout→websocket",
            Self::Diagnostic => "stderr→terminal",
        })
    }
}

/// Why one bridge attempt ended. The supervisor retries all of them alike.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to connect to WebSocket server: {cause}")]
    Connect { cause: String },

    #[error("WebSocket connection closed{}: {reason}", close_code_label(.code))]
    WebSocketClosed { code: Option<u16>, reason: String },

    #[error("{direction} pipe failed: {cause}")]
    Pump {
        direction: PumpDirection,
        cause: String,
    },

    #[error("failed to start server process: {cause}")]
    SpawnFailed { cause: String },

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// The subprocess closed its stdout; not a fault, but the session is over.
    #[error("server process ended its output")]
    ProcessEnded,
}

fn close_code_label(code: &Option<u16>) -> String {
    match code {
        Some(code) => format!(" with code {}", code),
        None => String::new(),
    }
}

impl BridgeError {
    pub(crate) fn pump(direction: PumpDirection, cause: impl fmt::Display) -> Self {
        Self::Pump {
            direction,
            cause: cause.to_string(),
        }
    }

    /// Whether this outcome should be reported to observers as an error.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::ProcessEnded)
    }
}
