use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::cpu::CpuBackend;
use crate::error::{Result, TensorError};

/// Which triangle of a symmetric matrix the eigensolver reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Triangle {
    Upper,
    #[default]
    Lower,
}

impl FromStr for Triangle {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "U" | "u" => Ok(Triangle::Upper),
            "L" | "l" => Ok(Triangle::Lower),
            other => Err(TensorError::InvalidTriangle(other.to_string())),
        }
    }
}

impl fmt::Display for Triangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Triangle::Upper => write!(f, "U"),
            Triangle::Lower => write!(f, "L"),
        }
    }
}

/// Trait for pluggable compute backends (CPU, GPU, etc.).
///
/// All kernels work on row-major f64 slices and return owned vectors; the
/// caller rounds results into the tensor's storage dtype.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Result<Vec<f64>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>>;

    /// Element-wise subtraction: result[i] = a[i] - b[i].
    fn sub(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>>;

    /// Element-wise multiplication: result[i] = a[i] * b[i].
    fn mul(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>>;

    /// Symmetric eigendecomposition of the `n x n` matrix `a`.
    ///
    /// Only the `triangle` half of `a` is read. Returns the eigenvalues in
    /// ascending order and, when `compute_v` is set, the row-major matrix whose
    /// columns are the matching orthonormal eigenvectors.
    fn syevd(
        &self,
        a: &[f64],
        n: usize,
        triangle: Triangle,
        compute_v: bool,
    ) -> Result<(Vec<f64>, Option<Vec<f64>>)>;
}

/// The backend tensors are created on unless told otherwise.
pub fn default_backend() -> Arc<dyn ComputeBackend> {
    static DEFAULT: OnceLock<Arc<dyn ComputeBackend>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(CpuBackend::new()))
        .clone()
}
