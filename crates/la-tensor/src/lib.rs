//! `la-tensor` - Tensor storage, shapes and pluggable compute kernels for linalg-autodiff.
//!
//! This crate provides:
//! - A `Tensor` type over reference-counted CPU storage
//! - A `ComputeBackend` trait for pluggable kernels (matmul, elementwise, eigensolver)
//! - A reference `CpuBackend` implementation
//! - Shape utilities and broadcasting
//! - Data type definitions (F16, F32, F64)

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::{default_backend, ComputeBackend, Triangle};
pub use cpu::{CpuBackend, EigenSolverConfig};
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
