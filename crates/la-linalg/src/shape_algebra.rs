//! Reduction of a batched `dot` to a single 2-D matrix product.

use la_tensor::{Result, Shape, TensorError};

/// How `dot(a, b)` maps onto one `[m, k] x [k, n]` product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotPlan {
    /// Shape of the result.
    pub out_shape: Shape,
    pub m: usize,
    /// Contracted size.
    pub k: usize,
    pub n: usize,
    /// Axis permutation bringing `b`'s contracted axis to the front, when `b`
    /// has rank above 2.
    pub b_axes: Option<Vec<usize>>,
}

impl DotPlan {
    /// Plan for operands of rank at least 1.
    ///
    /// `a`'s last axis is contracted with `b`'s first axis if `b` has rank 1
    /// or 2, and with `b`'s second-to-last axis otherwise.
    pub fn new(a: &Shape, b: &Shape) -> Result<DotPlan> {
        let (p, q) = (a.ndim(), b.ndim());
        if p == 0 || q == 0 {
            return Err(TensorError::Dimension(format!(
                "dot plan needs operands of rank >= 1, got shapes {} and {}",
                a, b
            )));
        }

        let a_dims = a.dims();
        let b_dims = b.dims();
        let k = a_dims[p - 1];
        let b_axis = if q <= 2 { 0 } else { q - 2 };
        if b_dims[b_axis] != k {
            return Err(TensorError::Dimension(format!(
                "dot: shapes {} and {} not aligned: {} (axis {}) != {} (axis {})",
                a,
                b,
                k,
                p - 1,
                b_dims[b_axis],
                b_axis
            )));
        }

        let mut out_dims = a_dims[..p - 1].to_vec();
        let b_axes = if q <= 2 {
            out_dims.extend_from_slice(&b_dims[1..]);
            None
        } else {
            out_dims.extend_from_slice(&b_dims[..q - 2]);
            out_dims.push(b_dims[q - 1]);
            let mut axes = Vec::with_capacity(q);
            axes.push(q - 2);
            axes.extend(0..q - 2);
            axes.push(q - 1);
            Some(axes)
        };

        let m = a_dims[..p - 1].iter().product();
        let n = b_dims
            .iter()
            .enumerate()
            .filter(|&(axis, _)| axis != b_axis)
            .map(|(_, &d)| d)
            .product();

        Ok(DotPlan {
            out_shape: Shape::new(out_dims),
            m,
            k,
            n,
            b_axes,
        })
    }
}
