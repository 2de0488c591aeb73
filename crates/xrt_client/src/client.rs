//! JSON-RPC client for the accelerator server
//!
//! One TCP connection per session. Requests are answered in order; `$/log`
//! notifications that arrive before a response are forwarded into `tracing`.

use crate::target::Target;
use std::io::{BufReader, ErrorKind};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use xrt_rpc::{
    is_protocol_compatible, methods, read_message, write_message, InitializeParams, InitializeResult, LogParams,
    Notification, Request, RequestId, Response, RpcError, PROTOCOL_VERSION,
};

/// Delay between connection attempts while the server is starting.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub struct RpcClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
    next_id: i64,
}

impl RpcClient {
    /// Connect to `target`, retrying refused or failed attempts until
    /// `timeout` has elapsed.
    pub fn connect(target: &Target, timeout: Duration) -> Result<Self, ClientError> {
        let address = target.address();
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match Self::try_connect(&address, deadline) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Connect {
                    target: target.to_string(),
                    attempts,
                    message: error.to_string(),
                });
            }
            tracing::trace!(%target, attempts, "connect failed: {}", error);
            std::thread::sleep(RETRY_INTERVAL.min(deadline - now));
        }
    }

    fn try_connect(address: &str, deadline: Instant) -> std::io::Result<TcpStream> {
        let mut last = std::io::Error::new(ErrorKind::NotFound, format!("{} did not resolve", address));
        for addr in address.to_socket_addrs()? {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => return Ok(stream),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, ClientError> {
        stream.set_nodelay(true).map_err(ClientError::Io)?;
        let peer = stream.peer_addr().map_err(ClientError::Io)?;
        let reader = BufReader::new(stream.try_clone().map_err(ClientError::Io)?);
        Ok(Self {
            reader,
            writer: stream,
            peer,
            next_id: 1,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Open the session and validate protocol compatibility
    pub fn initialize(&mut self, seed: Option<u64>) -> Result<InitializeResult, ClientError> {
        let params = InitializeParams {
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            seed,
        };
        let result: InitializeResult = self.call(methods::INITIALIZE, Some(params))?;

        if !is_protocol_compatible(PROTOCOL_VERSION, &result.protocol_version) {
            return Err(ClientError::ProtocolMismatch {
                client: PROTOCOL_VERSION.to_string(),
                server: result.protocol_version.clone(),
            });
        }
        if result.version != env!("CARGO_PKG_VERSION") {
            tracing::warn!(
                "server '{}' version ({}) differs from client ({})",
                result.name,
                result.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Ok(result)
    }

    /// Ask the server process to stop accepting connections.
    pub fn shutdown(&mut self) -> Result<(), ClientError> {
        self.call::<(), serde_json::Value>(methods::SHUTDOWN, None)?;
        Ok(())
    }

    /// Send a request and wait for its response, forwarding notifications
    pub fn call<P, R>(&mut self, method: &str, params: Option<P>) -> Result<R, ClientError>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        let params = params
            .map(|p| serde_json::to_value(p))
            .transpose()
            .map_err(ClientError::Serialize)?;
        let request = Request::new(method, params, id.clone());
        write_message(&mut self.writer, &request).map_err(ClientError::Io)?;

        loop {
            let value = match read_message(&mut self.reader) {
                Ok(Some(value)) => value,
                Ok(None) => return Err(ClientError::ConnectionClosed),
                Err(e) if e.kind() == ErrorKind::InvalidData => return Err(ClientError::Parse(e.to_string())),
                Err(e) => return Err(ClientError::Io(e)),
            };

            if value.get("id").is_none() {
                if let Ok(notification) = serde_json::from_value::<Notification>(value) {
                    forward_notification(&notification);
                }
                continue;
            }

            let response: Response = serde_json::from_value(value).map_err(|e| ClientError::Parse(e.to_string()))?;
            if response.id != id {
                return Err(ClientError::IdMismatch);
            }
            if let Some(error) = response.error {
                return Err(ClientError::Rpc(error));
            }

            let result = response.result.unwrap_or(serde_json::Value::Null);
            return serde_json::from_value(result).map_err(|e| ClientError::Parse(e.to_string()));
        }
    }
}

fn forward_notification(notification: &Notification) {
    if notification.method != methods::NOTIFY_LOG {
        return;
    }
    let Some(params) = notification.params.clone() else {
        return;
    };
    if let Ok(log) = serde_json::from_value::<LogParams>(params) {
        match log.level.as_str() {
            "error" => tracing::error!(target: "xrt_server", "{}", log.message),
            "warn" => tracing::warn!(target: "xrt_server", "{}", log.message),
            "info" => tracing::info!(target: "xrt_server", "{}", log.message),
            "trace" => tracing::trace!(target: "xrt_server", "{}", log.message),
            _ => tracing::debug!(target: "xrt_server", "{}", log.message),
        }
    }
}

/// Client errors
#[derive(Debug)]
pub enum ClientError {
    Connect { target: String, attempts: u32, message: String },
    Io(std::io::Error),
    Serialize(serde_json::Error),
    Parse(String),
    ConnectionClosed,
    IdMismatch,
    Rpc(RpcError),
    ProtocolMismatch { client: String, server: String },
    LockError,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect {
                target,
                attempts,
                message,
            } => write!(
                f,
                "Failed to connect to {} after {} attempt(s): {}",
                target, attempts, message
            ),
            ClientError::Io(e) => write!(f, "IO error: {}", e),
            ClientError::Serialize(e) => write!(f, "Serialization error: {}", e),
            ClientError::Parse(e) => write!(f, "Parse error: {}", e),
            ClientError::ConnectionClosed => write!(f, "Server connection closed unexpectedly"),
            ClientError::IdMismatch => write!(f, "Response ID does not match request"),
            ClientError::Rpc(e) => write!(f, "RPC error ({}): {}", e.code, e.message),
            ClientError::ProtocolMismatch { client, server } => write!(
                f,
                "Protocol version mismatch: client ({}) incompatible with server ({})",
                client, server
            ),
            ClientError::LockError => write!(f, "Failed to acquire lock"),
        }
    }
}

impl std::error::Error for ClientError {}
