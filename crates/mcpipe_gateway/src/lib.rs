pub mod server;
pub mod types;

pub use server::StatusServer;
pub use types::{EndpointHealth, ToolHealth};
