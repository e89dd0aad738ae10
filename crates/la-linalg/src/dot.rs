use la_autograd::{no_backprop, ops, Array, BackwardBuilder};
use la_tensor::{DType, Result, Shape, Tensor};
use log::{debug, trace};

use crate::shape_algebra::DotPlan;

/// Generalized matrix product following numpy `dot` semantics.
///
/// The last axis of `a` is contracted with the first axis of `b` if `b` has
/// rank 1 or 2, and with its second-to-last axis otherwise. A scalar operand
/// makes this an element-wise product. The result has dtype `out_dtype`, or
/// the wider operand dtype when not given.
///
/// Returns a `Dimension` error, before any kernel runs, if the contracted
/// sizes differ.
pub fn dot(a: &Array, b: &Array, out_dtype: Option<DType>) -> Result<Array> {
    if a.ndim() == 0 || b.ndim() == 0 {
        debug!(
            "dot: scalar operand ({} x {}), using element-wise product",
            a.shape(),
            b.shape()
        );
        let product = ops::mul(a, b)?;
        return match out_dtype {
            Some(dtype) => ops::astype(&product, dtype),
            None => Ok(product),
        };
    }

    let plan = DotPlan::new(a.shape(), b.shape())?;
    let dtype = out_dtype.unwrap_or_else(|| a.dtype().promote(b.dtype()));
    if plan.k == 0 {
        debug!("dot: empty contraction, result {} is zeros", plan.out_shape);
        let zeros = Tensor::zeros(plan.out_shape, dtype).with_backend(a.backend().clone());
        return Ok(Array::constant(zeros));
    }

    let a_matrix = ops::reshape(a, Shape::new(vec![plan.m, plan.k]))?;
    let b_matrix = match &plan.b_axes {
        Some(axes) => ops::transpose(b, axes)?,
        None => b.clone(),
    };
    let b_matrix = ops::reshape(&b_matrix, Shape::new(vec![plan.k, plan.n]))?;
    let out = matmul(&a_matrix, &b_matrix, dtype)?;
    ops::reshape(&out, plan.out_shape)
}

// The 2-D product and its gradient rule. Both rules are `dot` again, so the
// gradient is differentiable when the backward pass records.
fn matmul(a_matrix: &Array, b_matrix: &Array, dtype: DType) -> Result<Array> {
    trace!(
        "dot: [{}x{}] @ [{}x{}] -> {} on {}",
        a_matrix.shape().dim(0),
        a_matrix.shape().dim(1),
        b_matrix.shape().dim(0),
        b_matrix.shape().dim(1),
        dtype,
        a_matrix.backend().name()
    );
    let out = no_backprop(|| a_matrix.data().matmul(b_matrix.data(), dtype))?;

    let mut bb = BackwardBuilder::new("dot", &[a_matrix, b_matrix], [out]);
    if let Some(target) = bb.create_target(0) {
        let b_tok = bb.retain_input(1);
        let a_dtype = a_matrix.dtype();
        bb.define(target, move |ctx| {
            let gout = ctx.output_grad_or_zeros(0);
            let b_matrix = ctx.retained_input(&b_tok);
            ctx.set_input_grad(dot(&gout, &ops::t(&b_matrix)?, Some(a_dtype))?);
            Ok(())
        });
    }
    if let Some(target) = bb.create_target(1) {
        let a_tok = bb.retain_input(0);
        let b_dtype = b_matrix.dtype();
        bb.define(target, move |ctx| {
            let gout = ctx.output_grad_or_zeros(0);
            let a_matrix = ctx.retained_input(&a_tok);
            ctx.set_input_grad(dot(&ops::t(&a_matrix)?, &gout, Some(b_dtype))?);
            Ok(())
        });
    }
    let [out] = bb.finalize();
    Ok(out)
}
