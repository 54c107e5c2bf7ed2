use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Resolved description of how to start a subprocess.
///
/// `env` holds overrides only; the child always inherits the current process
/// environment underneath them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSpec {
    /// A script path run directly, or through an interpreter when one is set.
    Script {
        path: PathBuf,
        interpreter: Option<String>,
    },
    Command {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
}

impl LaunchSpec {
    /// Full argument vector, program first.
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Script {
                path,
                interpreter: Some(interpreter),
            } => vec![interpreter.clone(), path.display().to_string()],
            Self::Script {
                path,
                interpreter: None,
            } => vec![path.display().to_string()],
            Self::Command { command, args, .. } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(command.clone());
                argv.extend(args.iter().cloned());
                argv
            }
        }
    }

    pub fn env_overrides(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Command { env, .. } => Some(env),
            Self::Script { .. } => None,
        }
    }

    /// Build a `tokio` command for this spec. Stdio wiring is left to the caller.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = match self {
            Self::Script {
                path,
                interpreter: Some(interpreter),
            } => {
                let mut cmd = tokio::process::Command::new(interpreter);
                cmd.arg(path);
                cmd
            }
            Self::Script {
                path,
                interpreter: None,
            } => tokio::process::Command::new(path),
            Self::Command { command, args, .. } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                cmd
            }
        };
        if let Some(env) = self.env_overrides() {
            cmd.envs(env);
        }
        cmd
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}
