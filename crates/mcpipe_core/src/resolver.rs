//! Maps a [`Target`] to a [`LaunchSpec`].
//!
//! Resolution is a pure function of the configuration snapshot it is handed
//! (plus a filesystem existence check for script targets). Bridges call it on
//! every connection attempt so config edits apply on the next retry.

use std::path::Path;

use crate::config::{PipeConfig, ServerKind, Tunables};
use crate::launch::LaunchSpec;
use crate::target::Target;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("server '{server}' is disabled in config")]
    Disabled { server: String },
    #[error("server '{server}' is missing '{field}'")]
    MissingField { server: String, field: &'static str },
    #[error("server '{server}' has unsupported type '{kind}'")]
    UnsupportedType { server: String, kind: String },
    #[error("'{target}' is neither a configured server nor an existing script")]
    NotFound { target: String },
}

impl ResolveError {
    /// Short machine-readable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disabled { .. } => "disabled",
            Self::MissingField { .. } => "missing_field",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::NotFound { .. } => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    pub script_interpreter: String,
    pub proxy_command: Vec<String>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::from(&Tunables::default())
    }
}

impl From<&Tunables> for ResolverOptions {
    fn from(t: &Tunables) -> Self {
        Self {
            script_interpreter: t.script_interpreter.clone(),
            proxy_command: t.proxy_command.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandResolver {
    options: ResolverOptions,
}

impl CommandResolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self { options }
    }

    pub fn resolve(&self, config: &PipeConfig, target: &Target) -> Result<LaunchSpec, ResolveError> {
        let server = target.server();

        if let Some(entry) = config.server(server) {
            if entry.disabled {
                return Err(ResolveError::Disabled {
                    server: server.to_string(),
                });
            }
            return Ok(match entry.validate(server)? {
                ServerKind::Stdio { command, args, env } => {
                    LaunchSpec::Command { command, args, env }
                }
                ServerKind::Sse { url, headers, env } => self.proxy_spec(false, url, headers, env),
                ServerKind::Http { url, headers, env } => self.proxy_spec(true, url, headers, env),
            });
        }

        // Back-compat: a bare script path
        let path = Path::new(server);
        if !path.exists() {
            return Err(ResolveError::NotFound {
                target: server.to_string(),
            });
        }
        let interpreter = match path.extension().and_then(|e| e.to_str()) {
            Some("py") => Some(self.options.script_interpreter.clone()),
            _ => None,
        };
        Ok(LaunchSpec::Script {
            path: path.to_path_buf(),
            interpreter,
        })
    }

    /// Wrap a remote SSE/HTTP server into an invocation of the stdio proxy.
    fn proxy_spec(
        &self,
        streamable_http: bool,
        url: String,
        headers: Vec<(String, String)>,
        env: std::collections::BTreeMap<String, String>,
    ) -> LaunchSpec {
        let defaults;
        let proxy = if self.options.proxy_command.is_empty() {
            defaults = Tunables::default().proxy_command;
            &defaults
        } else {
            &self.options.proxy_command
        };

        let command = proxy[0].clone();
        let mut args: Vec<String> = proxy[1..].to_vec();
        if streamable_http {
            args.push("--transport".into());
            args.push("streamablehttp".into());
        }
        for (name, value) in headers {
            args.push("-H".into());
            args.push(name);
            args.push(value);
        }
        args.push(url);
        LaunchSpec::Command { command, args, env }
    }
}
