use crate::error::{Result, TensorError};
use std::fmt;

/// Dimension sizes of a tensor, outermost first. Rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Shape with the given axis sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Shape copied from a slice of axis sizes.
    pub fn from_slice(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }

    /// Rank-0 shape.
    pub fn scalar() -> Self {
        Shape::new(Vec::new())
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Element count; 1 for a scalar, 0 if any axis is empty.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Size of axis `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Axis sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Row-major element strides, e.g. `[12, 4, 1]` for `[2, 3, 4]`.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.dims.len()];
        for i in (1..self.dims.len()).rev() {
            strides[i - 1] = strides[i] * self.dims[i];
        }
        strides
    }

    /// Result shape of a numpy-style broadcast of `a` with `b`.
    ///
    /// Shapes are aligned on their last axis; paired sizes must agree or one
    /// of them must be 1.
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> Result<Shape> {
        let ndim = a.ndim().max(b.ndim());
        let size_at = |s: &Shape, i: usize| {
            let pad = ndim - s.ndim();
            if i < pad {
                1
            } else {
                s.dims[i - pad]
            }
        };

        let mut dims = Vec::with_capacity(ndim);
        for i in 0..ndim {
            let (da, db) = (size_at(a, i), size_at(b, i));
            let d = match (da, db) {
                _ if da == db => da,
                (1, _) => db,
                (_, 1) => da,
                _ => {
                    return Err(TensorError::BroadcastError {
                        a: a.dims.clone(),
                        b: b.dims.clone(),
                    })
                }
            };
            dims.push(d);
        }
        Ok(Shape::new(dims))
    }

    /// For every element of `target` in row-major order, the offset of the
    /// element of `self` it is broadcast from.
    ///
    /// `self` must broadcast to `target` without changing `target`.
    pub fn broadcast_offsets(&self, target: &Shape) -> Result<Vec<usize>> {
        let mismatch = || TensorError::BroadcastError {
            a: self.dims.clone(),
            b: target.dims.clone(),
        };
        if self.ndim() > target.ndim() {
            return Err(mismatch());
        }

        let pad = target.ndim() - self.ndim();
        let src_strides = self.strides();
        let mut effective = vec![0usize; target.ndim()];
        for (i, &d) in self.dims.iter().enumerate() {
            let t = target.dims[pad + i];
            if d == t {
                effective[pad + i] = src_strides[i];
            } else if d != 1 {
                return Err(mismatch());
            }
        }

        let n = target.numel();
        let mut offsets = Vec::with_capacity(n);
        let mut index = vec![0usize; target.ndim()];
        for _ in 0..n {
            offsets.push(index.iter().zip(&effective).map(|(i, s)| i * s).sum());
            advance_index(&mut index, &target.dims);
        }
        Ok(offsets)
    }
}

/// Step a row-major multi-index by one element.
pub(crate) fn advance_index(index: &mut [usize], dims: &[usize]) {
    for d in (0..dims.len()).rev() {
        index[d] += 1;
        if index[d] < dims[d] {
            return;
        }
        index[d] = 0;
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}
