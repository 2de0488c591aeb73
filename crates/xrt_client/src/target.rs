//! Session target addresses: `grpc://host:port`, `tcp://host:port` or a bare
//! `host:port`.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Grpc,
    Tcp,
}

impl Transport {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Tcp => "tcp",
        }
    }
}

/// Where a session connects. Both transports speak the same line-delimited
/// JSON-RPC over TCP; the scheme is kept so targets print the way they were
/// configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(transport: Transport, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport,
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for `ToSocketAddrs`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport.scheme(), self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    Empty,
    UnsupportedScheme(String),
    MissingPort(String),
    InvalidPort(String),
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::Empty => write!(f, "Empty target address"),
            TargetError::UnsupportedScheme(s) => {
                write!(f, "Unsupported target scheme '{}' (expected grpc:// or tcp://)", s)
            },
            TargetError::MissingPort(t) => write!(f, "Target '{}' has no port", t),
            TargetError::InvalidPort(p) => write!(f, "Invalid target port: {}", p),
        }
    }
}

impl std::error::Error for TargetError {}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TargetError::Empty);
        }

        let (transport, rest) = match s.split_once("://") {
            Some(("grpc", rest)) => (Transport::Grpc, rest),
            Some(("tcp", rest)) => (Transport::Tcp, rest),
            Some((scheme, _)) => return Err(TargetError::UnsupportedScheme(scheme.to_string())),
            None => (Transport::Tcp, s),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| TargetError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(TargetError::Empty);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TargetError::InvalidPort(port.to_string()))?;

        Ok(Target::new(transport, host, port))
    }
}
