pub mod config;
pub mod launch;
pub mod resolver;
pub mod status;
pub mod target;
pub mod tools;

pub use config::{
    default_config_path, ConfigError, ConfigSource, EndpointEntry, FileConfigSource, PipeConfig,
    ServerEntry, ServerKind, SharedConfigSource, Tunables,
};
pub use launch::LaunchSpec;
pub use resolver::{CommandResolver, ResolveError, ResolverOptions};
pub use status::{
    EndpointStatus, EndpointUpdate, JsonFileStatusSink, MemoryStatusSink, RunState, StatusEvent,
    StatusSink, StatusSnapshot, TargetStatus, TargetUpdate,
};
pub use target::Target;
pub use tools::{merge_tools, ToolInfo, ToolProbe};
