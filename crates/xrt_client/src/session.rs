//! Remote sessions and the device handles they issue.
//!
//! A [`Session`] is an explicit context: every transfer, compile and execute
//! goes through one. Handles ([`DeviceValue`], [`Executable`]) keep the
//! session alive and release their server-side resource when dropped, unless
//! [`Session::release_all`] or [`Session::close`] got there first.

use crate::client::{ClientError, RpcClient};
use crate::error::{HarnessError, HarnessResult};
use crate::target::Target;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use xrt_core::{Computation, GraphBuilder, HostValue, Traced, ValueType, XrtResult};
use xrt_rpc::{
    methods, AllocateParams, BufferHandle, BufferParams, BufferResult, CloseResult, CompileParams, CompileResult,
    ExecutableHandle, ExecutableParams, ExecuteParams, InitializeResult, ReadResult, ReleaseResult, SessionStats,
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(crate::config::DEFAULT_CONNECT_TIMEOUT_MS),
            seed: None,
        }
    }
}

/// Handles released by [`Session::release_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub buffers: usize,
    pub executables: usize,
}

struct SessionState {
    /// `None` once the session is closed.
    client: Option<RpcClient>,
    buffers: BTreeSet<BufferHandle>,
    executables: BTreeSet<ExecutableHandle>,
}

struct SessionShared {
    state: Mutex<SessionState>,
    info: InitializeResult,
    target: Target,
}

impl SessionShared {
    fn lock(&self) -> HarnessResult<MutexGuard<'_, SessionState>> {
        self.state.lock().map_err(|_| HarnessError::Client(ClientError::LockError))
    }

    fn call<P, R>(&self, method: &str, params: P, on_error: fn(ClientError) -> HarnessError) -> HarnessResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let mut state = self.lock()?;
        let client = state.client.as_mut().ok_or(HarnessError::SessionClosed)?;
        client.call(method, Some(params)).map_err(on_error)
    }

    fn release_buffer(&self, handle: BufferHandle) -> HarnessResult<bool> {
        let mut state = self.lock()?;
        if !state.buffers.remove(&handle) {
            return Ok(false);
        }
        let Some(client) = state.client.as_mut() else {
            return Ok(false);
        };
        let result: ReleaseResult = client.call(methods::BUFFER_RELEASE, Some(BufferParams { handle }))?;
        Ok(result.released)
    }

    fn release_executable(&self, executable: ExecutableHandle) -> HarnessResult<bool> {
        let mut state = self.lock()?;
        if !state.executables.remove(&executable) {
            return Ok(false);
        }
        let Some(client) = state.client.as_mut() else {
            return Ok(false);
        };
        let result: ReleaseResult = client.call(methods::EXECUTABLE_RELEASE, Some(ExecutableParams { executable }))?;
        Ok(result.released)
    }
}

/// A connection to an accelerator server.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Connect to `target` and run the `initialize` handshake.
    pub fn open(target: &Target, options: &SessionOptions) -> HarnessResult<Self> {
        let mut client = RpcClient::connect(target, options.connect_timeout)?;
        let info = client.initialize(options.seed)?;
        tracing::info!(
            %target,
            session = info.session_id,
            server = %info.name,
            devices = ?info.devices,
            "session opened"
        );

        Ok(Self {
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState {
                    client: Some(client),
                    buffers: BTreeSet::new(),
                    executables: BTreeSet::new(),
                }),
                info,
                target: target.clone(),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.info.session_id
    }

    pub fn info(&self) -> &InitializeResult {
        &self.shared.info
    }

    pub fn target(&self) -> &Target {
        &self.shared.target
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().map(|s| s.client.is_none()).unwrap_or(true)
    }

    /// Buffers issued by this session and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.shared.lock().map(|s| s.buffers.len()).unwrap_or(0)
    }

    pub fn live_executables(&self) -> usize {
        self.shared.lock().map(|s| s.executables.len()).unwrap_or(0)
    }

    /// Copy a host value to the device.
    pub fn transfer(&self, value: impl Into<HostValue>) -> HarnessResult<DeviceValue> {
        let value = value.into();
        let result: BufferResult = self
            .shared
            .call(methods::BUFFER_ALLOCATE, AllocateParams { value }, HarnessError::from)?;
        tracing::debug!(handle = %result.handle, ty = %result.ty, "transferred");
        Ok(self.adopt_buffer(result))
    }

    fn adopt_buffer(&self, result: BufferResult) -> DeviceValue {
        if let Ok(mut state) = self.shared.lock() {
            state.buffers.insert(result.handle);
        }
        DeviceValue {
            handle: result.handle,
            ty: result.ty,
            session: Arc::clone(&self.shared),
        }
    }

    pub fn compile(&self, computation: &Computation) -> HarnessResult<Executable> {
        let result: CompileResult = self.shared.call(
            methods::COMPILE,
            CompileParams {
                computation: computation.clone(),
            },
            HarnessError::compile,
        )?;
        tracing::debug!(
            name = %computation.name,
            executable = %result.executable,
            cache_hit = result.cache_hit,
            "compiled"
        );

        if let Ok(mut state) = self.shared.lock() {
            state.executables.insert(result.executable);
        }
        Ok(Executable {
            handle: result.executable,
            name: computation.name.clone(),
            fingerprint: result.fingerprint,
            parameter_types: result.parameter_types,
            result_type: result.result_type,
            cache_hit: result.cache_hit,
            session: Arc::clone(&self.shared),
        })
    }

    /// Trace `f` against the operands' types and compile the result.
    pub fn trace<F>(&self, name: &str, operands: &[&DeviceValue], f: F) -> HarnessResult<Executable>
    where
        F: FnOnce(&GraphBuilder, &[Traced]) -> XrtResult<Traced>,
    {
        let types: Vec<ValueType> = operands.iter().map(|d| d.value_type().clone()).collect();
        let computation = xrt_core::trace(name, &types, f).map_err(|e| HarnessError::Compile(e.to_string()))?;
        self.compile(&computation)
    }

    pub fn stats(&self) -> HarnessResult<SessionStats> {
        self.shared
            .call(methods::SESSION_STATS, serde_json::Value::Null, HarnessError::from)
    }

    /// Release every handle this session still tracks, on the server too.
    pub fn release_all(&self) -> HarnessResult<ReleaseSummary> {
        let mut state = self.shared.lock()?;
        let buffers = std::mem::take(&mut state.buffers);
        let executables = std::mem::take(&mut state.executables);
        let Some(client) = state.client.as_mut() else {
            return Ok(ReleaseSummary::default());
        };

        // Every handle gets its release call; the first failure is returned
        // after the rest have been tried.
        let mut summary = ReleaseSummary::default();
        let mut first_error = None;
        for handle in buffers {
            match client.call::<_, ReleaseResult>(methods::BUFFER_RELEASE, Some(BufferParams { handle })) {
                Ok(result) => summary.buffers += usize::from(result.released),
                Err(e) => {
                    tracing::warn!(%handle, "release failed: {}", e);
                    first_error.get_or_insert(e);
                },
            }
        }
        for executable in executables {
            match client.call::<_, ReleaseResult>(methods::EXECUTABLE_RELEASE, Some(ExecutableParams { executable })) {
                Ok(result) => summary.executables += usize::from(result.released),
                Err(e) => {
                    tracing::warn!(%executable, "release failed: {}", e);
                    first_error.get_or_insert(e);
                },
            }
        }
        tracing::debug!(buffers = summary.buffers, executables = summary.executables, "released handles");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(summary),
        }
    }

    /// Release outstanding handles and end the session. Later calls do
    /// nothing.
    pub fn close(&self) -> HarnessResult<CloseResult> {
        if self.is_closed() {
            return Ok(CloseResult::default());
        }
        self.release_all()?;

        let mut state = self.shared.lock()?;
        let Some(mut client) = state.client.take() else {
            return Ok(CloseResult::default());
        };
        let result: CloseResult = client.call(methods::SESSION_CLOSE, Some(serde_json::Value::Null))?;
        tracing::info!(session = self.id(), "session closed");
        Ok(result)
    }

    /// Ask the server to stop. Ends this session.
    pub fn shutdown_server(&self) -> HarnessResult<()> {
        let mut state = self.shared.lock()?;
        state.buffers.clear();
        state.executables.clear();
        let mut client = state.client.take().ok_or(HarnessError::SessionClosed)?;
        client.shutdown()?;
        Ok(())
    }
}

/// A value resident on the device: a tensor or a tuple of values.
pub struct DeviceValue {
    handle: BufferHandle,
    ty: ValueType,
    session: Arc<SessionShared>,
}

impl DeviceValue {
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    /// Copy the value back to the host.
    pub fn fetch(&self) -> HarnessResult<HostValue> {
        let result: ReadResult =
            self.session
                .call(methods::BUFFER_READ, BufferParams { handle: self.handle }, HarnessError::execute)?;
        Ok(result.value)
    }

    /// Release now instead of on drop.
    pub fn release(self) -> HarnessResult<bool> {
        self.session.release_buffer(self.handle)
    }
}

impl Drop for DeviceValue {
    fn drop(&mut self) {
        if let Err(e) = self.session.release_buffer(self.handle) {
            tracing::debug!(handle = %self.handle, "release on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for DeviceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceValue({} : {})", self.handle, self.ty)
    }
}

/// A compiled computation on the server.
pub struct Executable {
    handle: ExecutableHandle,
    name: String,
    fingerprint: String,
    parameter_types: Vec<ValueType>,
    result_type: ValueType,
    cache_hit: bool,
    session: Arc<SessionShared>,
}

impl Executable {
    pub fn handle(&self) -> ExecutableHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn parameter_types(&self) -> &[ValueType] {
        &self.parameter_types
    }

    pub fn result_type(&self) -> &ValueType {
        &self.result_type
    }

    /// Whether the server's compilation cache already held this computation.
    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// Run on device-resident arguments. The result stays on the device.
    pub fn execute(&self, args: &[&DeviceValue]) -> HarnessResult<DeviceValue> {
        if args.len() != self.parameter_types.len() {
            return Err(HarnessError::Execute(format!(
                "{} expects {} argument(s), got {}",
                self.name,
                self.parameter_types.len(),
                args.len()
            )));
        }
        for (i, (arg, expected)) in args.iter().zip(&self.parameter_types).enumerate() {
            if !Arc::ptr_eq(&arg.session, &self.session) {
                return Err(HarnessError::Execute(format!(
                    "{}: argument {} belongs to another session",
                    self.name, i
                )));
            }
            if &arg.ty != expected {
                return Err(HarnessError::Execute(format!(
                    "{}: argument {} has type {}, expected {}",
                    self.name, i, arg.ty, expected
                )));
            }
        }

        let result: BufferResult = self.session.call(
            methods::EXECUTE,
            ExecuteParams {
                executable: self.handle,
                arguments: args.iter().map(|a| a.handle).collect(),
            },
            HarnessError::execute,
        )?;
        tracing::debug!(name = %self.name, result = %result.handle, "executed");

        if let Ok(mut state) = self.session.lock() {
            state.buffers.insert(result.handle);
        }
        Ok(DeviceValue {
            handle: result.handle,
            ty: result.ty,
            session: Arc::clone(&self.session),
        })
    }
}

impl Drop for Executable {
    fn drop(&mut self) {
        if let Err(e) = self.session.release_executable(self.handle) {
            tracing::debug!(executable = %self.handle, "release on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Executable({} {} {})", self.handle, self.name, self.result_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Transport;
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use xrt_core::Literal;
    use xrt_rpc::{read_message, write_message, Request, Response, RpcError, PROTOCOL_VERSION};

    /// Serve one connection with canned answers. Releasing buffer 1 fails;
    /// every release call is counted.
    fn scripted_server(releases: Arc<AtomicUsize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut next_handle = 0;
            while let Ok(Some(message)) = read_message(&mut reader) {
                let request: Request = serde_json::from_value(message).unwrap();
                let params = request.params.unwrap_or_default();
                let result = match request.method.as_str() {
                    methods::INITIALIZE => Ok(serde_json::to_value(InitializeResult {
                        name: "scripted".into(),
                        version: env!("CARGO_PKG_VERSION").into(),
                        protocol_version: PROTOCOL_VERSION.into(),
                        session_id: 1,
                        devices: Vec::new(),
                    })
                    .unwrap()),
                    methods::BUFFER_ALLOCATE => {
                        next_handle += 1;
                        let params: AllocateParams = serde_json::from_value(params).unwrap();
                        Ok(serde_json::to_value(BufferResult {
                            handle: BufferHandle(next_handle),
                            ty: params.value.value_type(),
                        })
                        .unwrap())
                    },
                    methods::BUFFER_RELEASE => {
                        releases.fetch_add(1, Ordering::SeqCst);
                        let params: BufferParams = serde_json::from_value(params).unwrap();
                        if params.handle == BufferHandle(1) {
                            Err(RpcError::internal_error("device busy"))
                        } else {
                            Ok(serde_json::to_value(ReleaseResult { released: true }).unwrap())
                        }
                    },
                    _ => Ok(serde_json::Value::Null),
                };
                let response = match result {
                    Ok(value) => Response::success(request.id, value),
                    Err(error) => Response::error(request.id, error),
                };
                write_message(&mut writer, &response).unwrap();
            }
        });
        port
    }

    #[test]
    fn test_release_all_continues_after_a_failure() {
        let releases = Arc::new(AtomicUsize::new(0));
        let port = scripted_server(Arc::clone(&releases));
        let target = Target::new(Transport::Tcp, "127.0.0.1", port);
        let session = Session::open(&target, &SessionOptions::default()).unwrap();
        let values: Vec<DeviceValue> = (0..3)
            .map(|i| session.transfer(Literal::scalar(i as f32)).unwrap())
            .collect();

        assert!(matches!(session.release_all(), Err(HarnessError::Client(ClientError::Rpc(_)))));
        assert_eq!(releases.load(Ordering::SeqCst), 3);
        assert_eq!(session.live_buffers(), 0);

        // Already released, so dropping sends nothing.
        drop(values);
        assert_eq!(releases.load(Ordering::SeqCst), 3);
    }
}
