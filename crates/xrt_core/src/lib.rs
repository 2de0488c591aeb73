//! xrt core
//!
//! Everything both ends of the wire agree on:
//! - `types` / `literal`: dtypes, shapes and host tensor values
//! - `graph` / `builder` / `infer`: the typed computation IR and how it is traced
//! - `interp`: the reference executor the server runs compiled graphs with
//! - `autodiff`: reverse-mode gradients over traced graphs
//! - `layers` / `models`: layered models and their lowering

pub mod autodiff;
pub mod builder;
pub mod error;
pub mod graph;
pub mod infer;
pub mod interp;
pub mod layers;
pub mod literal;
pub mod models;
pub mod types;

pub use builder::{trace, GraphBuilder, Traced};
pub use error::{XrtError, XrtResult};
pub use graph::{Computation, Conv2dParams, Op};
pub use literal::{HostValue, Literal, NativeType};
pub use types::{DType, Shape, TensorType, ValueType};
