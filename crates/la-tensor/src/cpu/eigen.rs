// Cyclic Jacobi eigensolver for real symmetric matrices.

use log::debug;

use super::EigenSolverConfig;
use crate::backend::Triangle;
use crate::error::{Result, TensorError};

/// Eigenpairs of a symmetric matrix, ascending by eigenvalue.
pub(crate) struct SymmetricEigen {
    pub values: Vec<f64>,
    /// Row-major; column j is the eigenvector of `values[j]`.
    pub vectors: Option<Vec<f64>>,
}

/// Build the full symmetric matrix from the authoritative triangle of `a`.
fn symmetrize(a: &[f64], n: usize, triangle: Triangle) -> Vec<f64> {
    let mut full = vec![0.0f64; n * n];
    for i in 0..n {
        for j in i..n {
            let x = match triangle {
                Triangle::Upper => a[i * n + j],
                Triangle::Lower => a[j * n + i],
            };
            full[i * n + j] = x;
            full[j * n + i] = x;
        }
    }
    full
}

fn off_diagonal_norm(a: &[f64], n: usize) -> f64 {
    let mut sum = 0.0f64;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                sum += a[i * n + j] * a[i * n + j];
            }
        }
    }
    sum.sqrt()
}

pub(crate) fn jacobi_eigh(
    a: &[f64],
    n: usize,
    triangle: Triangle,
    compute_v: bool,
    config: &EigenSolverConfig,
) -> Result<SymmetricEigen> {
    let mut m = symmetrize(a, n, triangle);
    let mut v = compute_v.then(|| {
        let mut eye = vec![0.0f64; n * n];
        for i in 0..n {
            eye[i * n + i] = 1.0;
        }
        eye
    });

    let norm = m.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mut converged = false;
    for sweep in 0..config.max_sweeps {
        let off = off_diagonal_norm(&m, n);
        if off <= config.tolerance * norm {
            debug!("jacobi converged after {} sweeps (n={}, off={:e})", sweep, n, off);
            converged = true;
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[p * n + q];
                if apq == 0.0 {
                    continue;
                }
                let app = m[p * n + p];
                let aqq = m[q * n + q];

                // Rotation angle that annihilates m[p][q].
                let theta = (aqq - app) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                // M <- M J
                for k in 0..n {
                    let mkp = m[k * n + p];
                    let mkq = m[k * n + q];
                    m[k * n + p] = c * mkp - s * mkq;
                    m[k * n + q] = s * mkp + c * mkq;
                }
                // M <- J^T M
                for k in 0..n {
                    let mpk = m[p * n + k];
                    let mqk = m[q * n + k];
                    m[p * n + k] = c * mpk - s * mqk;
                    m[q * n + k] = s * mpk + c * mqk;
                }
                m[p * n + q] = 0.0;
                m[q * n + p] = 0.0;
                if let Some(v) = v.as_mut() {
                    for k in 0..n {
                        let vkp = v[k * n + p];
                        let vkq = v[k * n + q];
                        v[k * n + p] = c * vkp - s * vkq;
                        v[k * n + q] = s * vkp + c * vkq;
                    }
                }
            }
        }
    }

    if !converged {
        let off = off_diagonal_norm(&m, n);
        if off > config.tolerance * norm {
            return Err(TensorError::NoConvergence {
                sweeps: config.max_sweeps,
            });
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| m[i * n + i].total_cmp(&m[j * n + j]));

    let values = order.iter().map(|&i| m[i * n + i]).collect();
    let vectors = v.map(|v| {
        let mut sorted = vec![0.0f64; n * n];
        for (col, &src) in order.iter().enumerate() {
            for row in 0..n {
                sorted[row * n + col] = v[row * n + src];
            }
        }
        sorted
    });

    Ok(SymmetricEigen { values, vectors })
}
