use std::fmt;

/// Logical identifier for one bridge; the key for all status reporting.
///
/// Rendered as `server` or, when paired with one of several endpoints,
/// `server::endpoint`. Only the server part takes part in command resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    server: String,
    endpoint: Option<String>,
}

impl Target {
    pub const SEPARATOR: &'static str = "::";

    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(server: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Split `server::endpoint`; anything without a non-empty pair is a plain server.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(Self::SEPARATOR) {
            Some((server, endpoint)) if !server.is_empty() && !endpoint.is_empty() => {
                Self::with_endpoint(server, endpoint)
            }
            _ => Self::new(raw),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}{}{}", self.server, Self::SEPARATOR, endpoint),
            None => f.write_str(&self.server),
        }
    }
}
