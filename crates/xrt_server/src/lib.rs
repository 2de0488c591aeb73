//! xrt server
//!
//! Owns device memory and compiled executables on behalf of connected
//! clients. Each TCP connection is one session; compiled programs are shared
//! across sessions through a fingerprint-keyed cache.

pub mod cache;
pub mod memory;
pub mod server;
pub mod session;

pub use cache::{fingerprint, CompilationCache, CompiledProgram, SharedCache};
pub use memory::DeviceMemory;
pub use server::{Server, ServerConfig, ServerError, ServerHandle, DEFAULT_LISTEN_ADDR};
pub use session::ServerSession;
