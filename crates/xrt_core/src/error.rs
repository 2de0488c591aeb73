use crate::types::{DType, Shape, ValueType};
use std::fmt;

/// Main error type for xrt_core.
///
/// Covers tracing (graph construction), verification, host tensor
/// conversion and interpretation failures.
#[derive(Clone)]
#[non_exhaustive]
pub enum XrtError {
    // ===== DType Errors =====
    /// Data type mismatch between expected and actual dtype.
    DTypeMismatch { expected: DType, got: DType },
    /// Data type conflict in a binary operation.
    DTypeConflictInOp { left: DType, right: DType, op: String },
    /// Unsupported dtype for a specific operation.
    UnsupportedDTypeForOp { dtype: DType, op: String },

    // ===== Shape Errors =====
    /// Shape mismatch between expected and actual shapes.
    ShapeMismatch { expected: Shape, got: Shape },
    /// Size mismatch between expected and actual sizes.
    SizeMismatch { expected: usize, got: usize },
    /// Incompatible shapes in an operation.
    IncompatibleShapes { lhs: Shape, rhs: Shape, op: String },
    /// Invalid axis for the given rank.
    InvalidAxis { axis: usize, ndim: usize },
    /// Index outside of the indexed dimension.
    IndexOutOfBounds { index: i64, size: usize },

    // ===== Value Errors =====
    /// Value type mismatch (tensor vs tuple, or differing tensor types).
    TypeMismatch { expected: ValueType, got: ValueType },
    /// A tensor was expected but a tuple was found (or the reverse).
    InvalidValueKind(String),

    // ===== Graph Errors =====
    /// Operands traced by different builders were combined.
    BuilderMismatch,
    /// The graph is malformed (dangling operand, bad ordering, duplicate parameter).
    InvalidGraph(String),
    /// Wrong number of arguments for a computation.
    ArgumentCount { expected: usize, got: usize },

    // ===== Gradient Errors =====
    /// VJP rule not found for an operation on a differentiated path.
    VjpNotFound(String),
    /// Gradient computation failed.
    GradientComputationFailed(String),

    // ===== Misc =====
    /// Invalid argument provided.
    InvalidArgument(String),
    /// Serialization failed.
    SerializationFailed(String),
    /// Unsupported operation.
    UnsupportedOperation(String),
    /// Internal error with a descriptive message.
    InternalError(String),
}

impl fmt::Display for XrtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // DType Errors
            Self::DTypeMismatch { expected, got } => {
                write!(f, "dtype mismatch: expected {}, got {}", expected, got)
            },
            Self::DTypeConflictInOp { left, right, op } => {
                write!(f, "dtype conflict in operation {}: left is {}, right is {}", op, left, right)
            },
            Self::UnsupportedDTypeForOp { dtype, op } => {
                write!(f, "unsupported dtype {} for operation {}", dtype, op)
            },

            // Shape Errors
            Self::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {}, got {}", expected, got)
            },
            Self::SizeMismatch { expected, got } => {
                write!(f, "size mismatch: expected {}, got {}", expected, got)
            },
            Self::IncompatibleShapes { lhs, rhs, op } => {
                write!(f, "incompatible shapes in operation {}: lhs {}, rhs {}", op, lhs, rhs)
            },
            Self::InvalidAxis { axis, ndim } => {
                write!(f, "invalid axis {} for {}-dimensional tensor", axis, ndim)
            },
            Self::IndexOutOfBounds { index, size } => {
                write!(f, "index {} out of bounds for dimension of size {}", index, size)
            },

            // Value Errors
            Self::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            },
            Self::InvalidValueKind(msg) => write!(f, "invalid value kind: {}", msg),

            // Graph Errors
            Self::BuilderMismatch => write!(f, "operands belong to different graph builders"),
            Self::InvalidGraph(msg) => write!(f, "invalid graph: {}", msg),
            Self::ArgumentCount { expected, got } => {
                write!(f, "wrong number of arguments: expected {}, got {}", expected, got)
            },

            // Gradient Errors
            Self::VjpNotFound(op) => write!(f, "vjp function not found: {}", op),
            Self::GradientComputationFailed(msg) => write!(f, "gradient computation failed: {}", msg),

            // Misc
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::SerializationFailed(msg) => write!(f, "serialization failed: {}", msg),
            Self::UnsupportedOperation(msg) => write!(f, "unsupported operation: {}", msg),
            Self::InternalError(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl fmt::Debug for XrtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for XrtError {}

impl From<serde_json::Error> for XrtError {
    fn from(e: serde_json::Error) -> Self {
        XrtError::SerializationFailed(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for XrtError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        XrtError::InternalError(format!("lock poisoned: {}", e))
    }
}

/// Result type alias for xrt_core operations.
pub type XrtResult<T> = Result<T, XrtError>;
