//! Differentiable elementary operations.
//!
//! Each op computes its result on tensors and registers a rule that is itself
//! written with these ops, so gradients can be differentiated again.

use la_tensor::{DType, Result, Shape, Tensor};

use crate::array::Array;
use crate::graph::BackwardBuilder;

fn single(bb: BackwardBuilder<1>) -> Array {
    let [out] = bb.finalize();
    out
}

/// Reshape to `shape`; the gradient is reshaped back.
pub fn reshape(x: &Array, shape: Shape) -> Result<Array> {
    if x.shape() == &shape {
        return Ok(x.clone());
    }
    let out = x.data().reshape(shape)?;
    let mut bb = BackwardBuilder::new("reshape", &[x], [out]);
    if let Some(target) = bb.create_target(0) {
        let in_shape = x.shape().clone();
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(reshape(&g, in_shape.clone())?);
            Ok(())
        });
    }
    Ok(single(bb))
}

/// Permute axes; the gradient goes through the inverse permutation.
pub fn transpose(x: &Array, axes: &[usize]) -> Result<Array> {
    let out = x.data().transpose(axes)?;
    if axes.iter().enumerate().all(|(i, &a)| i == a) {
        return Ok(x.clone());
    }
    let mut inverse = vec![0; axes.len()];
    for (i, &axis) in axes.iter().enumerate() {
        inverse[axis] = i;
    }

    let mut bb = BackwardBuilder::new("transpose", &[x], [out]);
    if let Some(target) = bb.create_target(0) {
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(transpose(&g, &inverse)?);
            Ok(())
        });
    }
    Ok(single(bb))
}

/// Reverse all axes.
pub fn t(x: &Array) -> Result<Array> {
    let axes: Vec<usize> = (0..x.ndim()).rev().collect();
    transpose(x, &axes)
}

pub fn broadcast_to(x: &Array, shape: &Shape) -> Result<Array> {
    if x.shape() == shape {
        return Ok(x.clone());
    }
    let out = x.data().broadcast_to(shape)?;
    let mut bb = BackwardBuilder::new("broadcast_to", &[x], [out]);
    if let Some(target) = bb.create_target(0) {
        let in_shape = x.shape().clone();
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(sum_to(&g, &in_shape)?);
            Ok(())
        });
    }
    Ok(single(bb))
}

pub fn sum_to(x: &Array, shape: &Shape) -> Result<Array> {
    if x.shape() == shape {
        return Ok(x.clone());
    }
    let out = x.data().sum_to(shape)?;
    let mut bb = BackwardBuilder::new("sum_to", &[x], [out]);
    if let Some(target) = bb.create_target(0) {
        let in_shape = x.shape().clone();
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(broadcast_to(&g, &in_shape)?);
            Ok(())
        });
    }
    Ok(single(bb))
}

/// Convert to `dtype`; the gradient is converted back to the input's dtype.
pub fn astype(x: &Array, dtype: DType) -> Result<Array> {
    if x.dtype() == dtype {
        return Ok(x.clone());
    }
    let out = x.data().astype(dtype);
    let mut bb = BackwardBuilder::new("astype", &[x], [out]);
    if let Some(target) = bb.create_target(0) {
        let in_dtype = x.dtype();
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(astype(&g, in_dtype)?);
            Ok(())
        });
    }
    Ok(single(bb))
}

// Reduce a broadcast gradient back onto an operand.
fn unbroadcast(g: &Array, shape: &Shape, dtype: DType) -> Result<Array> {
    astype(&sum_to(g, shape)?, dtype)
}

/// Element-wise sum with broadcasting.
pub fn add(a: &Array, b: &Array) -> Result<Array> {
    let out = a.data().add(b.data())?;
    let mut bb = BackwardBuilder::new("add", &[a, b], [out]);
    for (index, x) in [a, b].into_iter().enumerate() {
        if let Some(target) = bb.create_target(index) {
            let (shape, dtype) = (x.shape().clone(), x.dtype());
            bb.define(target, move |ctx| {
                let g = ctx.output_grad_or_zeros(0);
                ctx.set_input_grad(unbroadcast(&g, &shape, dtype)?);
                Ok(())
            });
        }
    }
    Ok(single(bb))
}

/// Element-wise product with broadcasting.
pub fn mul(a: &Array, b: &Array) -> Result<Array> {
    let out = a.data().mul(b.data())?;
    let mut bb = BackwardBuilder::new("mul", &[a, b], [out]);
    for (index, x) in [a, b].into_iter().enumerate() {
        if let Some(target) = bb.create_target(index) {
            let other = bb.retain_input(1 - index);
            let (shape, dtype) = (x.shape().clone(), x.dtype());
            bb.define(target, move |ctx| {
                let g = ctx.output_grad_or_zeros(0);
                let other = ctx.retained_input(&other);
                ctx.set_input_grad(unbroadcast(&mul(&g, &other)?, &shape, dtype)?);
                Ok(())
            });
        }
    }
    Ok(single(bb))
}

/// Element-wise difference with broadcasting.
pub fn sub(a: &Array, b: &Array) -> Result<Array> {
    let out = a.data().sub(b.data())?;
    let mut bb = BackwardBuilder::new("sub", &[a, b], [out]);
    if let Some(target) = bb.create_target(0) {
        let (shape, dtype) = (a.shape().clone(), a.dtype());
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(unbroadcast(&g, &shape, dtype)?);
            Ok(())
        });
    }
    if let Some(target) = bb.create_target(1) {
        let (shape, dtype) = (b.shape().clone(), b.dtype());
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(unbroadcast(&negate(&g)?, &shape, dtype)?);
            Ok(())
        });
    }
    Ok(single(bb))
}

/// Element-wise `1 / x`. The gradient is `-g / x^2`, computed from the
/// retained result as `-g * r * r`.
pub fn reciprocal(x: &Array) -> Result<Array> {
    let out = x.data().reciprocal();
    let mut bb = BackwardBuilder::new("reciprocal", &[x], [out]);
    if let Some(target) = bb.create_target(0) {
        let r_tok = bb.retain_output(0);
        bb.define(target, move |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            let r = ctx.retained_output(&r_tok);
            ctx.set_input_grad(negate(&mul(&g, &mul(&r, &r)?)?)?);
            Ok(())
        });
    }
    Ok(single(bb))
}

/// Copy of a square matrix with its diagonal set to `value`. The diagonal of
/// the gradient is zero.
pub fn fill_diagonal(x: &Array, value: f64) -> Result<Array> {
    let out = x.data().fill_diagonal(value)?;
    let mut bb = BackwardBuilder::new("fill_diagonal", &[x], [out]);
    if let Some(target) = bb.create_target(0) {
        bb.define(target, |ctx| {
            let g = ctx.output_grad_or_zeros(0);
            ctx.set_input_grad(fill_diagonal(&g, 0.0)?);
            Ok(())
        });
    }
    Ok(single(bb))
}

fn negate(x: &Array) -> Result<Array> {
    let minus_one = Tensor::scalar(-1.0, x.dtype()).with_backend(x.backend().clone());
    mul(x, &Array::constant(minus_one))
}
