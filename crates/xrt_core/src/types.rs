mod dtype;
mod shape;
mod value_type;

pub use dtype::DType;
pub use shape::Shape;
pub use value_type::{TensorType, ValueType};
