//! One client session: dispatches JSON-RPC requests against the session's
//! device memory and executables.

use crate::cache::{CompiledProgram, SharedCache};
use crate::memory::DeviceMemory;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use xrt_core::interp::{check_arguments, evaluate};
use xrt_core::{HostValue, XrtError};
use xrt_rpc::{
    error_codes, is_protocol_compatible, methods, AllocateParams, BufferParams, BufferResult, CloseResult,
    CompileParams, CompileResult, ExecutableHandle, ExecutableParams, ExecuteParams, InitializeParams,
    InitializeResult, Notification, ReadResult, ReleaseResult, Request, RequestId, Response, RpcError, SessionStats,
    PROTOCOL_VERSION,
};

pub const SERVER_NAME: &str = "xrt_server";
pub const DEVICE_NAME: &str = "interp:0";

type RpcResult = Result<serde_json::Value, RpcError>;

fn parse_params<P: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<P, RpcError> {
    match params {
        Some(v) => serde_json::from_value(v).map_err(|e| RpcError::invalid_params(e.to_string())),
        None => Err(RpcError::invalid_params("Missing params")),
    }
}

fn to_value<R: Serialize>(result: R) -> RpcResult {
    serde_json::to_value(result).map_err(|e| RpcError::internal_error(e.to_string()))
}

fn execution_error(e: XrtError) -> RpcError {
    match e {
        XrtError::TypeMismatch { .. } | XrtError::ArgumentCount { .. } => RpcError::type_mismatch(e.to_string()),
        other => RpcError::execution_error(other.to_string()),
    }
}

/// Per-connection server state.
pub struct ServerSession {
    id: u64,
    initialized: bool,
    closed: bool,
    shutdown_requested: bool,
    memory: DeviceMemory,
    executables: BTreeMap<ExecutableHandle, Arc<CompiledProgram>>,
    next_executable: u64,
    cache: SharedCache,
    rng: StdRng,
    compilations: usize,
    cache_hits: usize,
    executions: usize,
    outbox: Vec<Notification>,
}

impl ServerSession {
    /// `seed` is the default RNG seed; the client may override it in `initialize`.
    pub fn new(id: u64, cache: SharedCache, seed: u64) -> Self {
        Self {
            id,
            initialized: false,
            closed: false,
            shutdown_requested: false,
            memory: DeviceMemory::new(),
            executables: BTreeMap::new(),
            next_executable: 1,
            cache,
            rng: StdRng::seed_from_u64(seed),
            compilations: 0,
            cache_hits: 0,
            executions: 0,
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The connection should be dropped after the current response.
    pub fn is_finished(&self) -> bool {
        self.closed || self.shutdown_requested
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Notifications queued while handling the last message, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    fn log(&mut self, level: &str, message: String) {
        self.outbox.push(Notification::log(level, message));
    }

    /// Handle one incoming JSON value. Notifications from the client get no
    /// response.
    pub fn handle_message(&mut self, message: serde_json::Value) -> Option<Response> {
        if message.get("id").is_none() {
            return None;
        }

        let request: Request = match serde_json::from_value(message) {
            Ok(req) => req,
            Err(e) => {
                return Some(Response::error(
                    RequestId::Number(0),
                    RpcError::invalid_request(e.to_string()),
                ));
            },
        };

        let id = request.id.clone();
        tracing::debug!(session = self.id, method = %request.method, "request");

        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request.params),
            methods::SHUTDOWN => {
                self.shutdown_requested = true;
                self.release_all();
                Ok(serde_json::Value::Null)
            },
            _ if !self.initialized => Err(RpcError::new(error_codes::INVALID_REQUEST, "Session not initialized")),
            _ if self.closed => Err(RpcError::session_error("Session closed")),
            methods::SESSION_CLOSE => self.handle_close(),
            methods::SESSION_STATS => to_value(self.stats()),
            methods::BUFFER_ALLOCATE => self.handle_allocate(request.params),
            methods::BUFFER_READ => self.handle_read(request.params),
            methods::BUFFER_RELEASE => self.handle_release(request.params),
            methods::COMPILE => self.handle_compile(request.params),
            methods::EXECUTE => self.handle_execute(request.params),
            methods::EXECUTABLE_RELEASE => self.handle_executable_release(request.params),
            method => Err(RpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(value) => Response::success(id, value),
            Err(error) => {
                tracing::debug!(session = self.id, code = error.code, "{}", error.message);
                Response::error(id, error)
            },
        })
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            live_buffers: self.memory.len(),
            live_executables: self.executables.len(),
            bytes_in_use: self.memory.bytes_in_use(),
            compilations: self.compilations,
            cache_hits: self.cache_hits,
            executions: self.executions,
        }
    }

    /// Drop every buffer and executable the session still holds.
    pub fn release_all(&mut self) -> CloseResult {
        let released_executables = self.executables.len();
        self.executables.clear();
        CloseResult {
            released_buffers: self.memory.clear(),
            released_executables,
        }
    }

    fn handle_initialize(&mut self, params: Option<serde_json::Value>) -> RpcResult {
        if self.initialized {
            return Err(RpcError::new(error_codes::INVALID_REQUEST, "Already initialized"));
        }
        let params: InitializeParams = parse_params(params)?;
        if !is_protocol_compatible(PROTOCOL_VERSION, &params.protocol_version) {
            return Err(RpcError::session_error(format!(
                "Incompatible protocol version: server {}, client {}",
                PROTOCOL_VERSION, params.protocol_version
            )));
        }
        if let Some(seed) = params.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.initialized = true;
        tracing::info!(session = self.id, client = %params.client_version, "session opened");

        to_value(InitializeResult {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            session_id: self.id,
            devices: vec![DEVICE_NAME.to_string()],
        })
    }

    fn handle_close(&mut self) -> RpcResult {
        let result = self.release_all();
        self.closed = true;
        tracing::info!(
            session = self.id,
            buffers = result.released_buffers,
            executables = result.released_executables,
            "session closed"
        );
        to_value(result)
    }

    fn handle_allocate(&mut self, params: Option<serde_json::Value>) -> RpcResult {
        let params: AllocateParams = parse_params(params)?;
        let ty = params.value.value_type();
        let handle = self.memory.allocate(params.value);
        to_value(BufferResult { handle, ty })
    }

    fn handle_read(&mut self, params: Option<serde_json::Value>) -> RpcResult {
        let params: BufferParams = parse_params(params)?;
        let value = self
            .memory
            .get(params.handle)
            .cloned()
            .ok_or_else(|| RpcError::handle_not_found(params.handle))?;
        to_value(ReadResult { value })
    }

    fn handle_release(&mut self, params: Option<serde_json::Value>) -> RpcResult {
        let params: BufferParams = parse_params(params)?;
        to_value(ReleaseResult {
            released: self.memory.release(params.handle),
        })
    }

    fn handle_compile(&mut self, params: Option<serde_json::Value>) -> RpcResult {
        let params: CompileParams = parse_params(params)?;
        let name = params.computation.name.clone();

        let (program, cache_hit) = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| RpcError::internal_error("compilation cache lock poisoned"))?;
            cache
                .get_or_compile(params.computation)
                .map_err(|e| RpcError::compile_error(format!("{}: {}", name, e)))?
        };

        self.compilations += 1;
        if cache_hit {
            self.cache_hits += 1;
        }

        let executable = ExecutableHandle(self.next_executable);
        self.next_executable += 1;
        let computation = &program.computation;
        let parameter_types = computation.parameter_types();
        let result_type = computation
            .result_type()
            .map_err(|e| RpcError::compile_error(e.to_string()))?
            .clone();
        let fingerprint = program.fingerprint.clone();
        self.executables.insert(executable, Arc::clone(&program));

        let short = &fingerprint[..fingerprint.len().min(12)];
        tracing::info!(session = self.id, %executable, fingerprint = short, cache_hit, "compiled {}", name);
        self.log(
            "info",
            format!(
                "compiled {} as {} ({}, {})",
                name,
                executable,
                short,
                if cache_hit { "cache hit" } else { "cache miss" }
            ),
        );

        to_value(CompileResult {
            executable,
            fingerprint,
            parameter_types,
            result_type,
            cache_hit,
        })
    }

    fn handle_execute(&mut self, params: Option<serde_json::Value>) -> RpcResult {
        let params: ExecuteParams = parse_params(params)?;
        let program = self
            .executables
            .get(&params.executable)
            .cloned()
            .ok_or_else(|| RpcError::handle_not_found(params.executable))?;

        let args = params
            .arguments
            .iter()
            .map(|&h| self.memory.get(h).cloned().ok_or_else(|| RpcError::handle_not_found(h)))
            .collect::<Result<Vec<HostValue>, _>>()?;

        let arg_types: Vec<_> = args.iter().map(HostValue::value_type).collect();
        check_arguments(&program.computation, &arg_types).map_err(execution_error)?;
        let value = evaluate(&program.computation, &args, &mut self.rng).map_err(execution_error)?;

        self.executions += 1;
        let ty = value.value_type();
        let handle = self.memory.allocate(value);
        tracing::debug!(session = self.id, executable = %params.executable, %handle, "executed");
        self.log("debug", format!("executed {} -> {} : {}", params.executable, handle, ty));

        to_value(BufferResult { handle, ty })
    }

    fn handle_executable_release(&mut self, params: Option<serde_json::Value>) -> RpcResult {
        let params: ExecutableParams = parse_params(params)?;
        to_value(ReleaseResult {
            released: self.executables.remove(&params.executable).is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CompilationCache;
    use serde_json::json;
    use xrt_core::{trace, DType, Literal, ValueType};
    use xrt_rpc::BufferHandle;

    fn request(session: &mut ServerSession, id: i64, method: &str, params: serde_json::Value) -> Response {
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        session.handle_message(message).unwrap()
    }

    fn ok<R: DeserializeOwned>(response: Response) -> R {
        assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
        serde_json::from_value(response.result.unwrap()).unwrap()
    }

    fn open() -> ServerSession {
        let mut session = ServerSession::new(7, CompilationCache::shared(), 0);
        let init: InitializeResult = ok(request(
            &mut session,
            1,
            methods::INITIALIZE,
            json!({ "client_version": "test", "protocol_version": PROTOCOL_VERSION }),
        ));
        assert_eq!(init.session_id, 7);
        assert_eq!(init.devices, vec![DEVICE_NAME.to_string()]);
        session
    }

    fn compile_square(session: &mut ServerSession) -> CompileResult {
        let computation = trace("square", &[ValueType::tensor(DType::F32, [3])], |_, p| p[0].mul(&p[0])).unwrap();
        ok(request(session, 2, methods::COMPILE, json!({ "computation": computation })))
    }

    #[test]
    fn test_requests_before_initialize_are_rejected() {
        let mut session = ServerSession::new(1, CompilationCache::shared(), 0);
        let response = request(&mut session, 1, methods::SESSION_STATS, json!(null));
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn test_notifications_get_no_response() {
        let mut session = open();
        assert!(session
            .handle_message(json!({ "jsonrpc": "2.0", "method": "$/cancel" }))
            .is_none());
    }

    #[test]
    fn test_allocate_compile_execute_read() {
        let mut session = open();
        let buffer: BufferResult = ok(request(
            &mut session,
            2,
            methods::BUFFER_ALLOCATE,
            json!({ "value": HostValue::from(Literal::vec1(&[1f32, 2.0, 3.0])) }),
        ));
        assert_eq!(buffer.ty, ValueType::tensor(DType::F32, [3]));

        let compiled = compile_square(&mut session);
        assert!(!compiled.cache_hit);
        assert_eq!(compiled.result_type, ValueType::tensor(DType::F32, [3]));
        let logs = session.take_notifications();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].method, methods::NOTIFY_LOG);

        let result: BufferResult = ok(request(
            &mut session,
            3,
            methods::EXECUTE,
            json!({ "executable": compiled.executable, "arguments": [buffer.handle] }),
        ));
        let read: ReadResult = ok(request(&mut session, 4, methods::BUFFER_READ, json!({ "handle": result.handle })));
        assert_eq!(read.value.to_vec::<f32>().unwrap(), vec![1.0, 4.0, 9.0]);

        let stats = session.stats();
        assert_eq!((stats.live_buffers, stats.live_executables, stats.executions), (2, 1, 1));
        assert_eq!(stats.bytes_in_use, 24);
    }

    #[test]
    fn test_second_compile_hits_cache() {
        let mut session = open();
        let first = compile_square(&mut session);
        let second = compile_square(&mut session);
        assert!(second.cache_hit);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_ne!(first.executable, second.executable);
        assert_eq!(session.stats().cache_hits, 1);
    }

    #[test]
    fn test_execute_with_wrong_argument_type() {
        let mut session = open();
        let compiled = compile_square(&mut session);
        let buffer: BufferResult = ok(request(
            &mut session,
            3,
            methods::BUFFER_ALLOCATE,
            json!({ "value": HostValue::from(Literal::vec1(&[1i32, 2])) }),
        ));
        let response = request(
            &mut session,
            4,
            methods::EXECUTE,
            json!({ "executable": compiled.executable, "arguments": [buffer.handle] }),
        );
        assert_eq!(response.error.unwrap().code, error_codes::TYPE_MISMATCH);
        assert_eq!(session.stats().executions, 0);
    }

    #[test]
    fn test_unknown_handles() {
        let mut session = open();
        let response = request(&mut session, 2, methods::BUFFER_READ, json!({ "handle": BufferHandle(99) }));
        assert_eq!(response.error.unwrap().code, error_codes::HANDLE_NOT_FOUND);

        let released: ReleaseResult = ok(request(
            &mut session,
            3,
            methods::BUFFER_RELEASE,
            json!({ "handle": BufferHandle(99) }),
        ));
        assert!(!released.released);
    }

    #[test]
    fn test_close_releases_everything() {
        let mut session = open();
        compile_square(&mut session);
        let _: BufferResult = ok(request(
            &mut session,
            3,
            methods::BUFFER_ALLOCATE,
            json!({ "value": HostValue::from(Literal::scalar(1f32)) }),
        ));

        let closed: CloseResult = ok(request(&mut session, 4, methods::SESSION_CLOSE, json!(null)));
        assert_eq!((closed.released_buffers, closed.released_executables), (1, 1));
        assert!(session.is_finished());

        let response = request(&mut session, 5, methods::SESSION_STATS, json!(null));
        assert_eq!(response.error.unwrap().code, error_codes::SESSION_ERROR);
    }

    #[test]
    fn test_malformed_computation_is_a_compile_error() {
        let mut session = open();
        let mut computation =
            trace("square", &[ValueType::tensor(DType::F32, [3])], |_, p| p[0].mul(&p[0])).unwrap();
        let root = computation.root.0;
        computation.nodes[root].ty = ValueType::tensor(DType::F32, [4]);
        let response = request(&mut session, 2, methods::COMPILE, json!({ "computation": computation }));
        assert_eq!(response.error.unwrap().code, error_codes::COMPILE_ERROR);
    }

    /// Drop the last element's bytes from every literal inside `value`.
    fn truncate_literals(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                if let Some(serde_json::Value::Array(bytes)) = map.get_mut("data") {
                    bytes.truncate(bytes.len().saturating_sub(4));
                }
                map.values_mut().for_each(truncate_literals);
            },
            serde_json::Value::Array(items) => items.iter_mut().for_each(truncate_literals),
            _ => {},
        }
    }

    #[test]
    fn test_short_literal_is_rejected() {
        let mut session = open();
        let value = json!({
            "kind": "tensor",
            "value": { "dtype": "f32", "shape": [4], "data": [0, 0, 128, 63] }
        });
        let response = request(&mut session, 2, methods::BUFFER_ALLOCATE, json!({ "value": value }));
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
        assert_eq!(session.stats().live_buffers, 0);
    }

    #[test]
    fn test_short_constant_is_rejected() {
        let mut session = open();
        let computation = trace("shift", &[ValueType::tensor(DType::F32, [2])], |b, p| {
            let offset = b.constant(Literal::vec1(&[1f32, 2.0]));
            p[0].add(&offset)
        })
        .unwrap();
        let mut computation = serde_json::to_value(&computation).unwrap();
        truncate_literals(&mut computation);

        let response = request(&mut session, 2, methods::COMPILE, json!({ "computation": computation }));
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
        assert_eq!(session.stats().live_executables, 0);
    }
}
