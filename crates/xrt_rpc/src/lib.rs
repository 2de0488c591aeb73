//! JSON-RPC 2.0 protocol types for client <-> accelerator server communication
//!
//! Messages are single-line JSON objects separated by `\n` over a TCP stream.
//! The server answers every request in order and may interleave `$/log`
//! notifications before a response.

mod framing;

pub use framing::{read_message, write_message};

use serde::{Deserialize, Serialize};
use std::fmt;
use xrt_core::{Computation, HostValue, ValueType};

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ============================================================================
// Core JSON-RPC Types
// ============================================================================

/// JSON-RPC request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: RequestId,
}

/// JSON-RPC response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

/// JSON-RPC notification message (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Request ID (can be number or string)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ============================================================================
// Error Codes (JSON-RPC standard + custom)
// ============================================================================

pub mod error_codes {
    // Standard JSON-RPC errors
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Accelerator errors (-32000 to -32099)
    pub const SESSION_ERROR: i32 = -32000;
    pub const COMPILE_ERROR: i32 = -32001;
    pub const EXECUTION_ERROR: i32 = -32002;
    pub const HANDLE_NOT_FOUND: i32 = -32003;
    pub const TYPE_MISMATCH: i32 = -32004;
}

// ============================================================================
// Method Names
// ============================================================================

pub mod methods {
    // Lifecycle
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const SESSION_CLOSE: &str = "session.close";
    pub const SESSION_STATS: &str = "session.stats";

    // Device memory
    pub const BUFFER_ALLOCATE: &str = "buffer.allocate";
    pub const BUFFER_READ: &str = "buffer.read";
    pub const BUFFER_RELEASE: &str = "buffer.release";

    // Compilation and execution
    pub const COMPILE: &str = "compile";
    pub const EXECUTE: &str = "execute";
    pub const EXECUTABLE_RELEASE: &str = "executable.release";

    // Notifications (server -> client)
    pub const NOTIFY_LOG: &str = "$/log";
}

// ============================================================================
// Handles
// ============================================================================

/// Server-side id of a device-resident value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferHandle(pub u64);

/// Server-side id of a compiled executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutableHandle(pub u64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

impl fmt::Display for ExecutableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executable#{}", self.0)
    }
}

// ============================================================================
// Request/Response Params
// ============================================================================

/// Initialize request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    pub client_version: String,
    pub protocol_version: String,
    /// Seed for the session's random number generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Initialize response result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub session_id: u64,
    pub devices: Vec<String>,
}

/// Buffer allocate request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateParams {
    pub value: HostValue,
}

/// A buffer living on the device, as returned by allocate and execute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferResult {
    pub handle: BufferHandle,
    #[serde(rename = "type")]
    pub ty: ValueType,
}

/// Params of `buffer.read` and `buffer.release`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferParams {
    pub handle: BufferHandle,
}

/// Buffer read response result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub value: HostValue,
}

/// Release response result; `released` is false for unknown handles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResult {
    pub released: bool,
}

/// Compile request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileParams {
    pub computation: Computation,
}

/// Compile response result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResult {
    pub executable: ExecutableHandle,
    /// Hex SHA-256 of the computation's canonical JSON
    pub fingerprint: String,
    pub parameter_types: Vec<ValueType>,
    pub result_type: ValueType,
    /// Whether the compilation cache already held this computation
    pub cache_hit: bool,
}

/// Execute request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteParams {
    pub executable: ExecutableHandle,
    pub arguments: Vec<BufferHandle>,
}

/// Params of `executable.release`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableParams {
    pub executable: ExecutableHandle,
}

/// Session close response result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseResult {
    pub released_buffers: usize,
    pub released_executables: usize,
}

/// Session stats response result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: u64,
    pub live_buffers: usize,
    pub live_executables: usize,
    pub bytes_in_use: usize,
    pub compilations: usize,
    pub cache_hits: usize,
    pub executions: usize,
}

/// Log notification params (server -> client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogParams {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub message: String,
}

// ============================================================================
// Helper Implementations
// ============================================================================

impl Request {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

impl Response {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    pub fn log(level: impl Into<String>, message: impl Into<String>) -> Self {
        let params = LogParams {
            level: level.into(),
            message: message.into(),
        };
        Self::new(methods::NOTIFY_LOG, serde_json::to_value(params).ok())
    }
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, msg)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, msg)
    }

    pub fn session_error(msg: impl Into<String>) -> Self {
        Self::new(error_codes::SESSION_ERROR, msg)
    }

    pub fn compile_error(msg: impl Into<String>) -> Self {
        Self::new(error_codes::COMPILE_ERROR, msg)
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::new(error_codes::EXECUTION_ERROR, msg)
    }

    pub fn handle_not_found(handle: impl fmt::Display) -> Self {
        Self::new(error_codes::HANDLE_NOT_FOUND, format!("Handle not found: {}", handle))
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::new(error_codes::TYPE_MISMATCH, msg)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Check if two protocol versions are compatible
/// - For 0.x.y: major.minor must match (unstable API)
/// - For >= 1.0.0: major must match
pub fn is_protocol_compatible(v1: &str, v2: &str) -> bool {
    let parse = |v: &str| -> (u32, u32) {
        let mut parts = v.split('.').map(|s| s.parse().unwrap_or(0));
        (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
    };
    let (major1, minor1) = parse(v1);
    let (major2, minor2) = parse(v2);

    if major1 == 0 || major2 == 0 {
        major1 == major2 && minor1 == minor2
    } else {
        major1 == major2
    }
}
