pub mod probe;

pub use probe::{convert_mcp_tool, McpToolProbe};
