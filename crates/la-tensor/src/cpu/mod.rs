mod eigen;
mod matmul;

use log::trace;

use crate::backend::{ComputeBackend, Triangle};
use crate::error::{Result, TensorError};

/// Configuration for the CPU symmetric eigensolver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EigenSolverConfig {
    /// Maximum number of full Jacobi sweeps before giving up.
    pub max_sweeps: usize,
    /// Convergence threshold on the off-diagonal Frobenius norm, relative to
    /// the Frobenius norm of the input.
    pub tolerance: f64,
}

impl Default for EigenSolverConfig {
    fn default() -> Self {
        EigenSolverConfig {
            max_sweeps: 100,
            tolerance: 1e-14,
        }
    }
}

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    eigen: EigenSolverConfig,
}

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend::default()
    }

    /// Create a backend with a custom eigensolver configuration.
    pub fn with_config(eigen: EigenSolverConfig) -> Self {
        CpuBackend { eigen }
    }

    pub fn eigen_config(&self) -> &EigenSolverConfig {
        &self.eigen
    }
}

fn check_same_len(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![a.len()],
            got: vec![b.len()],
        });
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Result<Vec<f64>> {
        if a.len() != m * k {
            return Err(TensorError::Other(format!(
                "matmul: a.len()={} but expected m*k={}",
                a.len(),
                m * k
            )));
        }
        if b.len() != k * n {
            return Err(TensorError::Other(format!(
                "matmul: b.len()={} but expected k*n={}",
                b.len(),
                k * n
            )));
        }
        trace!("cpu matmul [{}x{}] @ [{}x{}]", m, k, k, n);
        Ok(matmul::matmul_naive(a, b, m, k, n))
    }

    fn add(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
        check_same_len(a, b)?;
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x + y).collect())
    }

    fn sub(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
        check_same_len(a, b)?;
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x - y).collect())
    }

    fn mul(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
        check_same_len(a, b)?;
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).collect())
    }

    fn syevd(
        &self,
        a: &[f64],
        n: usize,
        triangle: Triangle,
        compute_v: bool,
    ) -> Result<(Vec<f64>, Option<Vec<f64>>)> {
        if a.len() != n * n {
            return Err(TensorError::Other(format!(
                "syevd: a.len()={} but expected n*n={}",
                a.len(),
                n * n
            )));
        }
        trace!("cpu syevd n={} uplo={} compute_v={}", n, triangle, compute_v);
        let eig = eigen::jacobi_eigh(a, n, triangle, compute_v, &self.eigen)?;
        Ok((eig.values, eig.vectors))
    }
}
