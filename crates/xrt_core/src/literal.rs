//! Host-side tensor values.
//!
//! A [`Literal`] owns little-endian element bytes plus its [`DType`] and
//! [`Shape`]. It is what gets transferred to and from the device. Typed access
//! goes through [`NativeType`]. Float elements widen to `f64` and integer or
//! boolean elements to `i64`, both exactly.

use crate::error::{XrtError, XrtResult};
use crate::types::{DType, Shape, TensorType, ValueType};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rust element types that map onto a [`DType`].
pub trait NativeType: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f64(self) -> f64;
    fn from_f64(v: f64) -> Self;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! native_type {
    ($ty:ty, $dtype:expr, $n:expr, |$v:ident| $to:expr, |$f:ident| $from:expr) => {
        impl NativeType for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn to_f64(self) -> f64 {
                let $v = self;
                $to
            }

            #[inline]
            fn from_f64($f: f64) -> Self {
                $from
            }

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&bytes[..$n]);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

native_type!(i32, DType::I32, 4, |v| v as f64, |f| f as i32);
native_type!(i64, DType::I64, 8, |v| v as f64, |f| f as i64);
native_type!(bf16, DType::BF16, 2, |v| v.to_f64(), |f| bf16::from_f64(f));
native_type!(f16, DType::F16, 2, |v| v.to_f64(), |f| f16::from_f64(f));
native_type!(f32, DType::F32, 4, |v| v as f64, |f| f as f32);
native_type!(f64, DType::F64, 8, |v| v, |f| f);

impl NativeType for bool {
    const DTYPE: DType = DType::BOOL;

    #[inline]
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v != 0.0
    }

    #[inline]
    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

fn encode<T: NativeType>(values: impl IntoIterator<Item = T>, capacity: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(capacity * T::DTYPE.size_in_bytes());
    for v in values {
        v.write_le(&mut out);
    }
    out
}

fn decode<T: NativeType>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::DTYPE.size_in_bytes()).map(T::read_le).collect()
}

fn encode_f64(dtype: DType, values: &[f64]) -> Vec<u8> {
    let it = values.iter().copied();
    match dtype {
        DType::BOOL => encode(it.map(bool::from_f64), values.len()),
        DType::I32 => encode(it.map(i32::from_f64), values.len()),
        DType::I64 => encode(it.map(i64::from_f64), values.len()),
        DType::BF16 => encode(it.map(bf16::from_f64), values.len()),
        DType::F16 => encode(it.map(f16::from_f64), values.len()),
        DType::F32 => encode(it.map(f32::from_f64), values.len()),
        DType::F64 => encode(it, values.len()),
    }
}

fn decode_f64(dtype: DType, bytes: &[u8]) -> Vec<f64> {
    fn widen<T: NativeType>(bytes: &[u8]) -> Vec<f64> {
        decode::<T>(bytes).into_iter().map(T::to_f64).collect()
    }

    match dtype {
        DType::BOOL => widen::<bool>(bytes),
        DType::I32 => widen::<i32>(bytes),
        DType::I64 => widen::<i64>(bytes),
        DType::BF16 => widen::<bf16>(bytes),
        DType::F16 => widen::<f16>(bytes),
        DType::F32 => widen::<f32>(bytes),
        DType::F64 => widen::<f64>(bytes),
    }
}

fn encode_i64(dtype: DType, values: &[i64]) -> Vec<u8> {
    let it = values.iter().copied();
    match dtype {
        DType::BOOL => encode(it.map(|v| v != 0), values.len()),
        DType::I32 => encode(it.map(|v| v as i32), values.len()),
        DType::I64 => encode(it, values.len()),
        _ => encode_f64(dtype, &values.iter().map(|&v| v as f64).collect::<Vec<_>>()),
    }
}

fn decode_i64(dtype: DType, bytes: &[u8]) -> Vec<i64> {
    match dtype {
        DType::BOOL => decode::<bool>(bytes).into_iter().map(i64::from).collect(),
        DType::I32 => decode::<i32>(bytes).into_iter().map(i64::from).collect(),
        DType::I64 => decode::<i64>(bytes),
        _ => decode_f64(dtype, bytes).into_iter().map(|v| v as i64).collect(),
    }
}

/// Wire form of a [`Literal`], checked by [`Literal::from_bytes`] before use.
#[derive(Deserialize)]
struct RawLiteral {
    dtype: DType,
    shape: Shape,
    data: Vec<u8>,
}

impl TryFrom<RawLiteral> for Literal {
    type Error = XrtError;

    fn try_from(raw: RawLiteral) -> XrtResult<Self> {
        Literal::from_bytes(raw.dtype, raw.shape, raw.data)
    }
}

/// A host tensor: dtype, shape and raw little-endian element bytes.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLiteral")]
pub struct Literal {
    dtype: DType,
    shape: Shape,
    data: Vec<u8>,
}

impl Literal {
    /// Create a literal from raw bytes, checking the byte count against the shape.
    pub fn from_bytes(dtype: DType, shape: impl Into<Shape>, data: Vec<u8>) -> XrtResult<Self> {
        let shape = shape.into();
        let expected = shape.size() * dtype.size_in_bytes();
        if data.len() != expected {
            return Err(XrtError::SizeMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Zero-dimensional literal.
    pub fn scalar<T: NativeType>(value: T) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: Shape::scalar(),
            data: encode([value], 1),
        }
    }

    /// Rank-1 literal.
    pub fn vec1<T: NativeType>(values: &[T]) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: Shape::from([values.len()]),
            data: encode(values.iter().copied(), values.len()),
        }
    }

    /// Literal of the given shape from row-major values.
    pub fn from_vec<T: NativeType>(values: &[T], shape: impl Into<Shape>) -> XrtResult<Self> {
        let shape = shape.into();
        if values.len() != shape.size() {
            return Err(XrtError::SizeMismatch {
                expected: shape.size(),
                got: values.len(),
            });
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data: encode(values.iter().copied(), values.len()),
        })
    }

    /// Literal of `dtype` from `f64` values, narrowing each element.
    pub fn from_f64(dtype: DType, shape: impl Into<Shape>, values: &[f64]) -> XrtResult<Self> {
        let shape = shape.into();
        if values.len() != shape.size() {
            return Err(XrtError::SizeMismatch {
                expected: shape.size(),
                got: values.len(),
            });
        }
        Ok(Self {
            dtype,
            shape,
            data: encode_f64(dtype, values),
        })
    }

    /// Literal of `dtype` from `i64` values. Integer dtypes wrap, `bool` is
    /// `v != 0`.
    pub fn from_i64(dtype: DType, shape: impl Into<Shape>, values: &[i64]) -> XrtResult<Self> {
        let shape = shape.into();
        if values.len() != shape.size() {
            return Err(XrtError::SizeMismatch {
                expected: shape.size(),
                got: values.len(),
            });
        }
        Ok(Self {
            dtype,
            shape,
            data: encode_i64(dtype, values),
        })
    }

    pub fn filled(dtype: DType, shape: impl Into<Shape>, value: f64) -> Self {
        let shape = shape.into();
        let values = vec![value; shape.size()];
        Self {
            dtype,
            data: encode_f64(dtype, &values),
            shape,
        }
    }

    pub fn zeros(dtype: DType, shape: impl Into<Shape>) -> Self {
        Self::filled(dtype, shape, 0.0)
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn tensor_type(&self) -> TensorType {
        TensorType::new(self.dtype, self.shape.clone())
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn element_count(&self) -> usize {
        self.shape.size()
    }

    /// Typed copy of the elements. Fails if `T` does not match the dtype.
    pub fn to_vec<T: NativeType>(&self) -> XrtResult<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(XrtError::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        Ok(decode(&self.data))
    }

    /// Elements widened to `f64`, whatever the dtype.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        decode_f64(self.dtype, &self.data)
    }

    /// Elements as `i64`. Exact for integer and boolean dtypes; floats
    /// truncate toward zero.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        decode_i64(self.dtype, &self.data)
    }

    pub fn get_first_element<T: NativeType>(&self) -> XrtResult<T> {
        if T::DTYPE != self.dtype {
            return Err(XrtError::DTypeMismatch {
                expected: self.dtype,
                got: T::DTYPE,
            });
        }
        if self.data.is_empty() {
            return Err(XrtError::InvalidArgument("literal has no elements".into()));
        }
        Ok(T::read_le(&self.data))
    }

    pub fn reshape(self, shape: impl Into<Shape>) -> XrtResult<Self> {
        let shape = shape.into();
        if shape.size() != self.shape.size() {
            return Err(XrtError::ShapeMismatch {
                expected: self.shape,
                got: shape,
            });
        }
        Ok(Self { shape, ..self })
    }

    /// Element-wise conversion to another dtype.
    pub fn convert(&self, dtype: DType) -> Self {
        if dtype == self.dtype {
            return self.clone();
        }
        let data = if dtype.is_float() || self.dtype.is_float() {
            encode_f64(dtype, &self.to_f64_vec())
        } else {
            encode_i64(dtype, &self.to_i64_vec())
        };
        Self {
            dtype,
            shape: self.shape.clone(),
            data,
        }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 16;
        let values = self.to_f64_vec();
        write!(f, "{}{} [", self.dtype, self.shape)?;
        for (i, v) in values.iter().take(PREVIEW).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        if values.len() > PREVIEW {
            write!(f, ", ...")?;
        }
        write!(f, "]")
    }
}

/// A host value: a tensor or a (possibly nested) tuple of values.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum HostValue {
    Tensor(Literal),
    Tuple(Vec<HostValue>),
}

impl HostValue {
    pub fn tuple(elements: Vec<HostValue>) -> Self {
        Self::Tuple(elements)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Tensor(lit) => ValueType::Tensor(lit.tensor_type()),
            Self::Tuple(elements) => ValueType::Tuple(elements.iter().map(HostValue::value_type).collect()),
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Tensor(lit) => Some(lit),
            Self::Tuple(_) => None,
        }
    }

    pub fn into_literal(self) -> XrtResult<Literal> {
        match self {
            Self::Tensor(lit) => Ok(lit),
            Self::Tuple(_) => Err(XrtError::InvalidValueKind("expected a tensor, got a tuple".into())),
        }
    }

    pub fn as_tuple(&self) -> Option<&[HostValue]> {
        match self {
            Self::Tensor(_) => None,
            Self::Tuple(elements) => Some(elements),
        }
    }

    pub fn into_tuple(self) -> XrtResult<Vec<HostValue>> {
        match self {
            Self::Tensor(_) => Err(XrtError::InvalidValueKind("expected a tuple, got a tensor".into())),
            Self::Tuple(elements) => Ok(elements),
        }
    }

    /// Typed elements of a tensor value.
    pub fn to_vec<T: NativeType>(&self) -> XrtResult<Vec<T>> {
        match self {
            Self::Tensor(lit) => lit.to_vec(),
            Self::Tuple(_) => Err(XrtError::InvalidValueKind("expected a tensor, got a tuple".into())),
        }
    }

    /// Follow a path of tuple indices.
    pub fn get(&self, path: &[usize]) -> Option<&HostValue> {
        match path.split_first() {
            None => Some(self),
            Some((&i, rest)) => self.as_tuple()?.get(i)?.get(rest),
        }
    }

    /// Apply `f` to every tensor leaf, keeping the tuple structure.
    pub fn map_leaves(&self, f: &mut impl FnMut(&Literal) -> Literal) -> HostValue {
        match self {
            Self::Tensor(lit) => Self::Tensor(f(lit)),
            Self::Tuple(elements) => Self::Tuple(elements.iter().map(|e| e.map_leaves(f)).collect()),
        }
    }
}

impl From<Literal> for HostValue {
    fn from(lit: Literal) -> Self {
        Self::Tensor(lit)
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensor(lit) => fmt::Debug::fmt(lit, f),
            Self::Tuple(elements) => {
                let mut t = f.debug_tuple("");
                for e in elements {
                    t.field(e);
                }
                t.finish()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_literal() {
        let lit = Literal::scalar(3.5f32);
        assert_eq!(lit.dtype(), DType::F32);
        assert!(lit.shape().is_scalar());
        assert_eq!(lit.get_first_element::<f32>().unwrap(), 3.5);
    }

    #[test]
    fn test_to_vec_checks_dtype() {
        let lit = Literal::vec1(&[1i64, 2, 3]);
        assert!(lit.to_vec::<f32>().is_err());
        assert_eq!(lit.to_vec::<i64>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_from_bytes_size_check() {
        assert!(Literal::from_bytes(DType::F32, [2], vec![0u8; 7]).is_err());
        assert!(Literal::from_bytes(DType::F32, [2], vec![0u8; 8]).is_ok());
    }

    #[test]
    fn test_convert_f32_to_i32_truncates() {
        let lit = Literal::vec1(&[1.7f32, -2.5]);
        assert_eq!(lit.convert(DType::I32).to_vec::<i32>().unwrap(), vec![1, -2]);
    }

    #[test]
    fn test_integers_stay_exact() {
        let big = (1i64 << 53) + 1;
        let lit = Literal::vec1(&[big, i64::MAX, i64::MIN]);
        assert_eq!(lit.to_i64_vec(), vec![big, i64::MAX, i64::MIN]);

        let narrowed = lit.convert(DType::I32);
        assert_eq!(narrowed.to_vec::<i32>().unwrap(), vec![1, -1, 0]);
        let back = Literal::from_i64(DType::I64, [3], &lit.to_i64_vec()).unwrap();
        assert_eq!(back, lit);
    }

    #[test]
    fn test_deserialize_checks_byte_count() {
        let short = r#"{"dtype":"f32","shape":[4],"data":[0,0,128,63]}"#;
        assert!(serde_json::from_str::<Literal>(short).is_err());

        let json = serde_json::to_string(&Literal::vec1(&[1f32, 2.0])).unwrap();
        let lit: Literal = serde_json::from_str(&json).unwrap();
        assert_eq!(lit.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_half_precision() {
        let lit = Literal::from_f64(DType::BF16, [2], &[1.0, 0.5]).unwrap();
        assert_eq!(lit.data().len(), 4);
        assert_eq!(lit.to_f64_vec(), vec![1.0, 0.5]);
    }

    #[test]
    fn test_host_value_path() {
        let v = HostValue::tuple(vec![
            Literal::scalar(1f32).into(),
            HostValue::tuple(vec![Literal::scalar(2f32).into()]),
        ]);
        let leaf = v.get(&[1, 0]).and_then(HostValue::as_literal).unwrap();
        assert_eq!(leaf.get_first_element::<f32>().unwrap(), 2.0);
        assert!(v.get(&[2]).is_none());
    }
}
