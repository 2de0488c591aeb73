//! TCP front end: one thread and one [`ServerSession`] per connection.

use crate::cache::{CompilationCache, SharedCache};
use crate::session::ServerSession;
use std::fmt;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use xrt_rpc::{read_message, write_message, RequestId, Response, RpcError};

/// Default listen address when neither a flag nor `XRT_SERVER_ADDR` names one.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8470";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    /// Base RNG seed; session `n` starts from `seed + n` unless the client
    /// sends its own.
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: std::env::var("XRT_SERVER_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            seed: 0,
        }
    }
}

pub enum ServerError {
    Bind { addr: String, source: io::Error },
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            Self::Io(e) => write!(f, "server io error: {}", e),
        }
    }
}

impl fmt::Debug for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerError({})", self)
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

struct ServerShared {
    cache: SharedCache,
    shutdown: AtomicBool,
    next_session: AtomicU64,
    local_addr: SocketAddr,
    seed: u64,
}

impl ServerShared {
    fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
            // Wake the blocking accept.
            let _ = TcpStream::connect(self.local_addr);
        }
    }
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<ServerShared>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shared.request_shutdown();
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }
}

pub struct Server {
    listener: TcpListener,
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen).map_err(|source| ServerError::Bind {
            addr: config.listen.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            shared: Arc::new(ServerShared {
                cache: CompilationCache::shared(),
                shutdown: AtomicBool::new(false),
                next_session: AtomicU64::new(1),
                local_addr,
                seed: config.seed,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Accept connections until a `shutdown` request or [`ServerHandle::shutdown`].
    pub fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.shared.local_addr, "listening");
        let mut workers = Vec::new();

        for stream in self.listener.incoming() {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    continue;
                },
            };
            let shared = Arc::clone(&self.shared);
            let id = shared.next_session.fetch_add(1, Ordering::SeqCst);
            workers.push(thread::spawn(move || {
                let peer = stream.peer_addr().ok();
                tracing::debug!(session = id, ?peer, "connection accepted");
                if let Err(e) = serve_connection(stream, id, &shared) {
                    tracing::warn!(session = id, "connection error: {}", e);
                }
            }));
            workers.retain(|w| !w.is_finished());
        }

        tracing::info!("server stopped");
        Ok(())
    }

    /// Run on a background thread.
    pub fn spawn(self) -> (ServerHandle, JoinHandle<Result<(), ServerError>>) {
        let handle = self.handle();
        (handle, thread::spawn(move || self.run()))
    }
}

fn serve_connection(stream: TcpStream, id: u64, shared: &ServerShared) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let seed = shared.seed.wrapping_add(id);
    let mut session = ServerSession::new(id, Arc::clone(&shared.cache), seed);

    loop {
        let message = match read_message(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                let response = Response::error(RequestId::Number(0), RpcError::parse_error(e.to_string()));
                write_message(&mut writer, &response)?;
                continue;
            },
            Err(e) => return Err(e),
        };

        let response = session.handle_message(message);
        for notification in session.take_notifications() {
            write_message(&mut writer, &notification)?;
        }
        if let Some(response) = response {
            write_message(&mut writer, &response)?;
        }

        if session.shutdown_requested() {
            shared.request_shutdown();
        }
        if session.is_finished() {
            break;
        }
    }

    let released = session.release_all();
    if released.released_buffers > 0 || released.released_executables > 0 {
        tracing::info!(
            session = id,
            buffers = released.released_buffers,
            executables = released.released_executables,
            "released on disconnect"
        );
    }
    tracing::debug!(session = id, "connection closed");
    Ok(())
}
