use crate::client::ClientError;
use crate::config::ConfigError;
use crate::process::ProcessError;
use crate::target::TargetError;
use xrt_core::XrtError;
use xrt_rpc::RpcError;

/// Everything a harness run can fail with.
pub enum HarnessError {
    /// The server could not be launched.
    Process(ProcessError),
    /// Session establishment or transport failure.
    Client(ClientError),
    /// The computation was rejected while tracing or compiling.
    Compile(String),
    /// Execution failed, including argument type mismatches.
    Execute(String),
    /// A fetched result did not match the expectation.
    Assertion(String),
    Core(XrtError),
    Config(ConfigError),
    SessionClosed,
}

impl HarnessError {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    pub(crate) fn from_rpc(error: &RpcError) -> String {
        format!("{} (code {})", error.message, error.code)
    }

    pub(crate) fn compile(error: ClientError) -> Self {
        match error {
            ClientError::Rpc(e) => Self::Compile(Self::from_rpc(&e)),
            other => Self::Client(other),
        }
    }

    pub(crate) fn execute(error: ClientError) -> Self {
        match error {
            ClientError::Rpc(e) => Self::Execute(Self::from_rpc(&e)),
            other => Self::Client(other),
        }
    }

    /// True for launch and transport failures, which end the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Process(_) | Self::Client(_) | Self::SessionClosed)
    }
}

impl std::fmt::Display for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process(e) => write!(f, "{}", e),
            Self::Client(e) => write!(f, "{}", e),
            Self::Compile(msg) => write!(f, "Compilation failed: {}", msg),
            Self::Execute(msg) => write!(f, "Execution failed: {}", msg),
            Self::Assertion(msg) => write!(f, "Assertion failed: {}", msg),
            Self::Core(e) => write!(f, "{}", e),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::SessionClosed => write!(f, "Session is closed"),
        }
    }
}

impl std::fmt::Debug for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HarnessError({})", self)
    }
}

impl std::error::Error for HarnessError {}

impl From<ProcessError> for HarnessError {
    fn from(e: ProcessError) -> Self {
        Self::Process(e)
    }
}

impl From<ClientError> for HarnessError {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

impl From<XrtError> for HarnessError {
    fn from(e: XrtError) -> Self {
        Self::Core(e)
    }
}

impl From<ConfigError> for HarnessError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TargetError> for HarnessError {
    fn from(e: TargetError) -> Self {
        Self::Config(ConfigError::Target(e))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
