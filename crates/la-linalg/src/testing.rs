//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use la_tensor::{ComputeBackend, CpuBackend, Result, Shape, Tensor, Triangle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A CPU backend that counts kernel calls.
#[derive(Debug, Default)]
pub(crate) struct CountingBackend {
    inner: CpuBackend,
    matmuls: AtomicUsize,
    syevds: AtomicUsize,
}

impl CountingBackend {
    pub(crate) fn shared() -> Arc<CountingBackend> {
        Arc::new(CountingBackend::default())
    }

    pub(crate) fn matmul_calls(&self) -> usize {
        self.matmuls.load(Ordering::SeqCst)
    }

    pub(crate) fn syevd_calls(&self) -> usize {
        self.syevds.load(Ordering::SeqCst)
    }
}

impl ComputeBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting-cpu"
    }

    fn matmul(&self, a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Result<Vec<f64>> {
        self.matmuls.fetch_add(1, Ordering::SeqCst);
        self.inner.matmul(a, b, m, k, n)
    }

    fn add(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
        self.inner.add(a, b)
    }

    fn sub(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
        self.inner.sub(a, b)
    }

    fn mul(&self, a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
        self.inner.mul(a, b)
    }

    fn syevd(
        &self,
        a: &[f64],
        n: usize,
        triangle: Triangle,
        compute_v: bool,
    ) -> Result<(Vec<f64>, Option<Vec<f64>>)> {
        self.syevds.fetch_add(1, Ordering::SeqCst);
        self.inner.syevd(a, n, triangle, compute_v)
    }
}

pub(crate) fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// F64 tensor of the given shape with entries uniform in [-1, 1).
pub(crate) fn random_tensor(rng: &mut StdRng, dims: &[usize]) -> Tensor {
    let shape = Shape::from(dims);
    let values = (0..shape.numel()).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Tensor::from_f64(values, shape)
}

/// Symmetric F64 matrix with well separated eigenvalues.
pub(crate) fn random_symmetric(rng: &mut StdRng, n: usize) -> Tensor {
    let mut values = vec![0.0f64; n * n];
    for i in 0..n {
        for j in 0..=i {
            let x: f64 = rng.gen_range(-0.5..0.5);
            values[i * n + j] = x;
            values[j * n + i] = x;
        }
        values[i * n + i] += 3.0 * i as f64;
    }
    Tensor::from_f64(values, Shape::new(vec![n, n]))
}

pub(crate) fn assert_all_close(got: &[f64], expected: &[f64], eps: f64) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!(
            approx::abs_diff_eq!(*g, *e, epsilon = eps),
            "element {}: got {}, expected {}",
            i,
            g,
            e
        );
    }
}
