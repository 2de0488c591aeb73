use super::{DType, Shape};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statically typed tensor descriptor: element type plus fixed shape.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorType {
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self {
            dtype,
            shape: Shape::scalar(),
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.shape.size() * self.dtype.size_in_bytes()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

impl fmt::Debug for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Type of a value in a computation: a tensor or a (possibly nested) tuple.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "lowercase")]
pub enum ValueType {
    Tensor(TensorType),
    Tuple(Vec<ValueType>),
}

impl ValueType {
    pub fn tensor(dtype: DType, shape: impl Into<Shape>) -> Self {
        Self::Tensor(TensorType::new(dtype, shape))
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::Tensor(TensorType::scalar(dtype))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Self::Tensor(t) => Some(t),
            Self::Tuple(_) => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[ValueType]> {
        match self {
            Self::Tensor(_) => None,
            Self::Tuple(elements) => Some(elements),
        }
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Self::Tuple(_))
    }

    /// Number of tensor leaves.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Tensor(_) => 1,
            Self::Tuple(elements) => elements.iter().map(ValueType::leaf_count).sum(),
        }
    }
}

impl From<TensorType> for ValueType {
    fn from(t: TensorType) -> Self {
        Self::Tensor(t)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor(t) => write!(f, "{}", t),
            Self::Tuple(elements) => {
                write!(f, "(")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            },
        }
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
