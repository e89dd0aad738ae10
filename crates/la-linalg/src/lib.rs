//! `la-linalg` - Differentiable linear-algebra primitives.
//!
//! - `dot`: generalized batched matrix product, reduced to one 2-D kernel call
//! - `eigh`: symmetric eigendecomposition with an eigenvector-aware gradient
//! - `eigvalsh`: eigenvalues only, never differentiable
//!
//! Kernels run with backprop recording disabled; gradient rules are written
//! in terms of `dot` and the elementary ops of `la-autograd`, so they can be
//! differentiated again.

pub mod dot;
pub mod eigh;
pub mod shape_algebra;

#[cfg(test)]
pub(crate) mod testing;

pub use dot::dot;
pub use eigh::{eigh, eigvalsh};
pub use la_tensor::Triangle;
pub use shape_algebra::DotPlan;
