//! Symmetric eigendecomposition.

use la_autograd::{no_backprop, ops, Array, BackwardBuilder};
use la_tensor::{Result, Tensor, TensorError, Triangle};
use log::debug;

use crate::dot::dot;

/// Eigenvalues `w` (ascending) and eigenvectors `v` (as columns) of the
/// symmetric matrix `a`, reading only its `triangle` half.
///
/// `a` must be a square rank-2 array. Both outputs are differentiable with
/// respect to `a`; the gradient is undefined when eigenvalues repeat.
pub fn eigh(a: &Array, triangle: Triangle) -> Result<(Array, Array)> {
    let n = a.data().require_square("eigh")?;
    let (w, v) = no_backprop(|| a.data().syevd(triangle, true))?;
    let v = v.ok_or_else(|| {
        TensorError::Other("eigh: backend returned no eigenvectors".to_string())
    })?;
    debug!("eigh: n={} uplo={} dtype={}", n, triangle, a.dtype());

    let mut bb = BackwardBuilder::new("eigh", &[a], [w, v]);
    if let Some(target) = bb.create_target(0) {
        let a_tok = bb.retain_input(0);
        let w_tok = bb.retain_output(0);
        let v_tok = bb.retain_output(1);
        bb.define(target, move |ctx| {
            let a = ctx.retained_input(&a_tok);
            let w = ctx.retained_output(&w_tok);
            let v = ctx.retained_output(&v_tok);
            let gw = ctx.output_grad_or_zeros(0);
            let gv = ctx.output_grad_or_zeros(1);
            ctx.set_input_grad(eigh_grad(&a, &w, &v, &gw, &gv)?);
            Ok(())
        });
    }
    let [w, v] = bb.finalize();
    Ok((w, v))
}

/// Eigenvalues of the symmetric matrix `a` in ascending order.
///
/// Never records a gradient rule: the result is a constant even when `a`
/// requires gradients.
pub fn eigvalsh(a: &Array, triangle: Triangle) -> Result<Array> {
    let n = a.data().require_square("eigvalsh")?;
    let (w, _) = no_backprop(|| a.data().syevd(triangle, false))?;
    debug!("eigvalsh: n={} uplo={} dtype={}", n, triangle, a.dtype());
    Ok(Array::constant(w))
}

// grad_a = v (F * (v^T gv) + diag(gw)) v^T, F[i, j] = 1 / (w[j] - w[i]) off the
// diagonal and 0 on it. F is built from recorded ops on `w` so the gradient
// stays differentiable in `w` as well as in `v`.
fn eigh_grad(a: &Array, w: &Array, v: &Array, gw: &Array, gv: &Array) -> Result<Array> {
    let n = w.numel();
    let gaps = ops::sub(
        &ops::reshape(w, [1, n].into())?,
        &ops::reshape(w, [n, 1].into())?,
    )?;
    let f = ops::reciprocal(&ops::fill_diagonal(&gaps, f64::INFINITY)?)?;

    let vt = ops::t(v)?;
    let eye = Tensor::eye(n, gw.dtype()).with_backend(gw.backend().clone());
    let diag_gw = ops::mul(&ops::reshape(gw, [1, n].into())?, &Array::constant(eye))?;
    let inner = ops::add(&ops::mul(&f, &dot(&vt, gv, None)?)?, &diag_gw)?;
    dot(&dot(v, &inner, None)?, &vt, Some(a.dtype()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        assert_all_close, random_symmetric, random_tensor, seeded, CountingBackend,
    };
    use approx::assert_abs_diff_eq;
    use la_autograd::{backward_with_grads, BackwardOptions};
    use la_tensor::{DType, Shape};

    fn matrix(values: Vec<f64>, n: usize) -> Tensor {
        Tensor::from_f64(values, Shape::from([n, n]))
    }

    #[test]
    fn test_two_by_two() {
        let a = Array::constant(matrix(vec![2.0, 1.0, 1.0, 2.0], 2));
        let (w, v) = eigh(&a, Triangle::Lower).unwrap();
        assert_all_close(&w.to_f64_vec(), &[1.0, 3.0], 1e-12);
        let v = v.to_f64_vec();
        let s = std::f64::consts::FRAC_1_SQRT_2;
        // Columns up to sign: [1, -1] / sqrt2 and [1, 1] / sqrt2.
        assert_abs_diff_eq!(v[0].abs(), s, epsilon = 1e-12);
        assert_abs_diff_eq!(v[0] + v[2], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v[1] - v[3], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reconstruction_and_orthonormality() {
        let mut rng = seeded(11);
        let a_data = random_symmetric(&mut rng, 5);
        let a = Array::constant(a_data.clone());
        let (w, v) = eigh(&a, Triangle::Upper).unwrap();

        let w_values = w.to_f64_vec();
        assert!(w_values.windows(2).all(|p| p[0] <= p[1]));

        let vd = v.data();
        let scaled = vd.mul(&w.data().reshape(Shape::from([1, 5])).unwrap()).unwrap();
        let rebuilt = scaled.matmul(&vd.t().unwrap(), DType::F64).unwrap();
        assert_all_close(&rebuilt.to_f64_vec(), &a_data.to_f64_vec(), 1e-10);

        let gram = vd.t().unwrap().matmul(vd, DType::F64).unwrap();
        assert_all_close(&gram.to_f64_vec(), &Tensor::eye(5, DType::F64).to_f64_vec(), 1e-10);
    }

    #[test]
    fn test_triangle_selects_half() {
        // Upper half says off-diagonal 1, lower half says 0.
        let a = Array::constant(matrix(vec![2.0, 1.0, 0.0, 2.0], 2));
        let upper = eigvalsh(&a, Triangle::Upper).unwrap();
        let lower = eigvalsh(&a, Triangle::Lower).unwrap();
        assert_all_close(&upper.to_f64_vec(), &[1.0, 3.0], 1e-12);
        assert_all_close(&lower.to_f64_vec(), &[2.0, 2.0], 1e-12);
    }

    #[test]
    fn test_non_square_is_dimension_error() {
        let backend = CountingBackend::shared();
        let rect = Array::constant(
            Tensor::zeros(Shape::from([2, 3]), DType::F64).with_backend(backend.clone()),
        );
        let vector = Array::constant(
            Tensor::zeros(Shape::from([4]), DType::F64).with_backend(backend.clone()),
        );
        for a in [&rect, &vector] {
            assert!(matches!(eigh(a, Triangle::Lower), Err(TensorError::Dimension(_))));
            assert!(matches!(eigvalsh(a, Triangle::Lower), Err(TensorError::Dimension(_))));
        }
        assert_eq!(backend.syevd_calls(), 0);
    }

    #[test]
    fn test_eigvalsh_matches_eigh_and_records_nothing() {
        let mut rng = seeded(12);
        let backend = CountingBackend::shared();
        let a = Array::requires_grad(random_symmetric(&mut rng, 4).with_backend(backend.clone()));

        let (w, _) = eigh(&a, Triangle::Lower).unwrap();
        let w_only = eigvalsh(&a, Triangle::Lower).unwrap();
        assert_eq!(backend.syevd_calls(), 2);
        assert_all_close(&w_only.to_f64_vec(), &w.to_f64_vec(), 1e-12);
        assert!(w.is_backprop_required());
        assert!(!w_only.is_backprop_required());

        let seed = Tensor::ones(Shape::from([4]), DType::F64);
        let grads = backward_with_grads(&[(&w_only, seed)], &BackwardOptions::default()).unwrap();
        assert!(grads.is_empty());
        assert!(grads.get(&a).is_none());
    }

    #[test]
    fn test_eigenvalue_grad_is_outer_product() {
        // d w_i / d A = v_i v_i^T
        let mut rng = seeded(13);
        let a = Array::requires_grad(random_symmetric(&mut rng, 3));
        let (w, v) = eigh(&a, Triangle::Lower).unwrap();
        let mut seed = vec![0.0; 3];
        seed[1] = 1.0;
        let grads = backward_with_grads(
            &[(&w, Tensor::from_f64(seed, Shape::from([3])))],
            &BackwardOptions::default(),
        )
        .unwrap();

        let vv = v.to_f64_vec();
        let expected: Vec<f64> = (0..3)
            .flat_map(|i| (0..3).map(move |j| (i, j)))
            .map(|(i, j)| vv[i * 3 + 1] * vv[j * 3 + 1])
            .collect();
        assert_all_close(&grads.get(&a).unwrap().to_f64_vec(), &expected, 1e-10);
    }

    /// `sum(cw * w) + sum(cv * v^2)`, unaffected by eigenvector signs.
    fn loss(a: &Tensor, cw: &[f64], cv: &[f64]) -> f64 {
        let (w, v) = a.syevd(Triangle::Lower, true).unwrap();
        let v = v.unwrap().to_f64_vec();
        let lw: f64 = w.to_f64_vec().iter().zip(cw).map(|(w, c)| w * c).sum();
        let lv: f64 = v.iter().zip(cv).map(|(v, c)| v * v * c).sum();
        lw + lv
    }

    #[test]
    fn test_directional_derivative_matches_finite_difference() {
        let n = 4;
        let mut rng = seeded(14);
        let a_data = random_symmetric(&mut rng, n);
        let cw = random_tensor(&mut rng, &[n]).to_f64_vec();
        let cv = random_tensor(&mut rng, &[n, n]).to_f64_vec();
        let dir = {
            let d = random_tensor(&mut rng, &[n, n]);
            d.add(&d.t().unwrap()).unwrap().to_f64_vec()
        };

        let a = Array::requires_grad(a_data.clone());
        let (w, v) = eigh(&a, Triangle::Lower).unwrap();
        let gv: Vec<f64> = v
            .to_f64_vec()
            .iter()
            .zip(&cv)
            .map(|(v, c)| 2.0 * c * v)
            .collect();
        let grads = backward_with_grads(
            &[
                (&w, Tensor::from_f64(cw.clone(), Shape::from([n]))),
                (&v, Tensor::from_f64(gv, Shape::from([n, n]))),
            ],
            &BackwardOptions::default(),
        )
        .unwrap();
        let grad_a = grads.get(&a).unwrap();
        assert_eq!(grad_a.dtype(), DType::F64);
        let analytic: f64 = grad_a.to_f64_vec().iter().zip(&dir).map(|(g, d)| g * d).sum();

        let eps = 1e-6;
        let shifted = |sign: f64| {
            let values = a_data
                .to_f64_vec()
                .iter()
                .zip(&dir)
                .map(|(a, d)| a + sign * eps * d)
                .collect();
            loss(&Tensor::from_f64(values, Shape::from([n, n])), &cw, &cv)
        };
        let numeric = (shifted(1.0) - shifted(-1.0)) / (2.0 * eps);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
    }

    /// Gradient of `sum(cw * w) + sum(c * v * v)` with respect to a fresh leaf
    /// holding `a_data`.
    fn loss_grad(a_data: &Tensor, cw: &Tensor, c: &Tensor, create_graph: bool) -> (Array, Array) {
        let a = Array::requires_grad(a_data.clone());
        let (w, v) = eigh(&a, Triangle::Lower).unwrap();
        let v2 = ops::mul(&v, &v).unwrap();
        let grads = backward_with_grads(
            &[(&w, cw.clone()), (&v2, c.clone())],
            &BackwardOptions { create_graph },
        )
        .unwrap();
        let grad_a = grads.get(&a).unwrap().clone();
        (a, grad_a)
    }

    fn inner(x: &[f64], y: &[f64]) -> f64 {
        x.iter().zip(y).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_hessian_vector_product_matches_finite_difference() {
        let n = 4;
        let mut rng = seeded(16);
        let a_data = random_symmetric(&mut rng, n);
        let cw = random_tensor(&mut rng, &[n]);
        let c = random_tensor(&mut rng, &[n, n]);
        let symmetric = |t: Tensor| t.add(&t.t().unwrap()).unwrap();
        let d = symmetric(random_tensor(&mut rng, &[n, n]));
        let e = symmetric(random_tensor(&mut rng, &[n, n]));

        // (H d) by differentiating <grad_a, d> through the recorded gradient.
        let (a, grad_a) = loss_grad(&a_data, &cw, &c, true);
        assert!(grad_a.is_backprop_required());
        let grads =
            backward_with_grads(&[(&grad_a, d.clone())], &BackwardOptions::default()).unwrap();
        let analytic = inner(&grads.get(&a).unwrap().to_f64_vec(), &e.to_f64_vec());

        let eps = 1e-5;
        let projected = |sign: f64| {
            let step = Tensor::scalar(sign * eps, DType::F64);
            let shifted = a_data.add(&e.mul(&step).unwrap()).unwrap();
            let (_, g) = loss_grad(&shifted, &cw, &c, false);
            inner(&g.to_f64_vec(), &d.to_f64_vec())
        };
        let numeric = (projected(1.0) - projected(-1.0)) / (2.0 * eps);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
    }

    #[test]
    fn test_eigenvalue_only_hessian() {
        // With only w seeded, H d = sum_i cw_i d(v_i v_i^T), which still needs
        // the eigenvector derivative through F.
        let n = 3;
        let mut rng = seeded(17);
        let a_data = random_symmetric(&mut rng, n);
        let cw = random_tensor(&mut rng, &[n]);
        let zeros = Tensor::zeros(Shape::from([n, n]), DType::F64);
        let d = {
            let t = random_tensor(&mut rng, &[n, n]);
            t.add(&t.t().unwrap()).unwrap()
        };

        let (a, grad_a) = loss_grad(&a_data, &cw, &zeros, true);
        let grads =
            backward_with_grads(&[(&grad_a, d.clone())], &BackwardOptions::default()).unwrap();
        let analytic = inner(&grads.get(&a).unwrap().to_f64_vec(), &d.to_f64_vec());

        let eps = 1e-5;
        let projected = |sign: f64| {
            let step = Tensor::scalar(sign * eps, DType::F64);
            let shifted = a_data.add(&d.mul(&step).unwrap()).unwrap();
            let (_, g) = loss_grad(&shifted, &cw, &zeros, false);
            inner(&g.to_f64_vec(), &d.to_f64_vec())
        };
        let numeric = (projected(1.0) - projected(-1.0)) / (2.0 * eps);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
    }

    #[test]
    fn test_unused_output_grad_reads_as_zeros() {
        // Only v is seeded: the eigenvalue term of the rule sees zeros.
        let mut rng = seeded(15);
        let a = Array::requires_grad(random_symmetric(&mut rng, 3));
        let (_, v) = eigh(&a, Triangle::Lower).unwrap();
        let seed = Tensor::zeros(Shape::from([3, 3]), DType::F64);
        let grads = backward_with_grads(&[(&v, seed)], &BackwardOptions::default()).unwrap();
        let g = grads.get(&a).unwrap();
        assert_eq!(g.shape().dims(), &[3, 3]);
        assert_all_close(&g.to_f64_vec(), &[0.0; 9], 1e-12);
    }

    #[test]
    fn test_grad_cast_to_input_dtype() {
        let a = Array::requires_grad(Tensor::new(vec![2.0, 1.0, 1.0, 3.0], Shape::from([2, 2])));
        let (w, _) = eigh(&a, Triangle::Lower).unwrap();
        assert_eq!(w.dtype(), DType::F32);
        let seed = Tensor::ones(Shape::from([2]), DType::F32);
        let grads = backward_with_grads(&[(&w, seed)], &BackwardOptions::default()).unwrap();
        let g = grads.get(&a).unwrap();
        assert_eq!(g.dtype(), DType::F32);
        // d(trace)/dA = I
        assert_all_close(&g.to_f64_vec(), &[1.0, 0.0, 0.0, 1.0], 1e-6);
    }
}
