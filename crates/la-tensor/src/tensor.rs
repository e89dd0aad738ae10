use std::sync::Arc;

use crate::backend::{default_backend, ComputeBackend, Triangle};
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::{advance_index, Shape};
use crate::storage::CpuStorage;

/// An immutable tensor over shared CPU storage.
///
/// Holds contiguous, row-major data with an associated shape and dtype.
/// Cloning and reshaping share the storage. Operations that require
/// computation are dispatched to the tensor's `ComputeBackend`.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Arc<CpuStorage>,
    shape: Shape,
    dtype: DType,
    backend: Arc<dyn ComputeBackend>,
}

impl Tensor {
    /// Create a new f32 tensor from data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: Arc::new(CpuStorage::from_f32_vec(data)),
            shape,
            dtype: DType::F32,
            backend: default_backend(),
        }
    }

    /// Create a new f64 tensor from data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn from_f64(data: Vec<f64>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor::from_values(data, shape, DType::F64, default_backend())
    }

    fn from_values(
        values: Vec<f64>,
        shape: Shape,
        dtype: DType,
        backend: Arc<dyn ComputeBackend>,
    ) -> Self {
        Tensor {
            storage: Arc::new(CpuStorage::from_f64_vec(dtype, values)),
            shape,
            dtype,
            backend,
        }
    }

    /// A new tensor on the same backend as `self`.
    fn derive(&self, values: Vec<f64>, shape: Shape, dtype: DType) -> Tensor {
        Tensor::from_values(values, shape, dtype, self.backend.clone())
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let n = shape.numel();
        Tensor {
            storage: Arc::new(CpuStorage::zeros(dtype, n)),
            shape,
            dtype,
            backend: default_backend(),
        }
    }

    /// Create a tensor filled with ones with the given shape.
    pub fn ones(shape: Shape, dtype: DType) -> Self {
        Tensor::full(shape, 1.0, dtype)
    }

    /// Create a tensor with every element set to `value`.
    pub fn full(shape: Shape, value: f64, dtype: DType) -> Self {
        let n = shape.numel();
        Tensor::from_values(vec![value; n], shape, dtype, default_backend())
    }

    /// A rank-0 tensor.
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Tensor::full(Shape::scalar(), value, dtype)
    }

    /// The `n x n` identity matrix.
    pub fn eye(n: usize, dtype: DType) -> Self {
        let mut data = vec![0.0f64; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Tensor::from_values(data, Shape::new(vec![n, n]), dtype, default_backend())
    }

    /// The same tensor, dispatching its kernels to `backend`.
    pub fn with_backend(mut self, backend: Arc<dyn ComputeBackend>) -> Tensor {
        self.backend = backend;
        self
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// The backend this tensor's kernels run on.
    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Copy the elements out in row-major order, widened to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.storage.to_f64_vec()
    }

    /// Reshape the tensor, returning a new tensor sharing the same storage
    /// with a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
            dtype: self.dtype,
            backend: self.backend.clone(),
        })
    }

    /// Permute the axes: output axis `i` is input axis `axes[i]`.
    pub fn transpose(&self, axes: &[usize]) -> Result<Tensor> {
        let ndim = self.ndim();
        let mut seen = vec![false; ndim];
        let valid = axes.len() == ndim
            && axes.iter().all(|&a| a < ndim && !std::mem::replace(&mut seen[a], true));
        if !valid {
            return Err(TensorError::InvalidAxes {
                axes: axes.to_vec(),
                ndim,
            });
        }

        let src_strides = self.shape.strides();
        let out_shape = Shape::new(axes.iter().map(|&a| self.shape.dim(a)).collect());
        let src = self.to_f64_vec();
        let n = out_shape.numel();
        let mut out = Vec::with_capacity(n);
        let mut index = vec![0usize; ndim];
        for _ in 0..n {
            let offset: usize = index
                .iter()
                .zip(axes)
                .map(|(&i, &axis)| i * src_strides[axis])
                .sum();
            out.push(src[offset]);
            advance_index(&mut index, out_shape.dims());
        }
        Ok(self.derive(out, out_shape, self.dtype))
    }

    /// Reverse the order of all axes (matrix transpose for rank 2).
    pub fn t(&self) -> Result<Tensor> {
        let axes: Vec<usize> = (0..self.ndim()).rev().collect();
        self.transpose(&axes)
    }

    /// Repeat the tensor along broadcast axes to reach `shape`.
    pub fn broadcast_to(&self, shape: &Shape) -> Result<Tensor> {
        if &self.shape == shape {
            return Ok(self.clone());
        }
        let offsets = self.shape.broadcast_offsets(shape)?;
        let src = self.to_f64_vec();
        let out = offsets.iter().map(|&o| src[o]).collect();
        Ok(self.derive(out, shape.clone(), self.dtype))
    }

    /// Sum over broadcast axes so the result has `shape`.
    ///
    /// This is the adjoint of `broadcast_to`: `shape` must broadcast to the
    /// shape of `self`.
    pub fn sum_to(&self, shape: &Shape) -> Result<Tensor> {
        if &self.shape == shape {
            return Ok(self.clone());
        }
        let offsets = shape.broadcast_offsets(&self.shape)?;
        let src = self.to_f64_vec();
        let mut out = vec![0.0f64; shape.numel()];
        for (&o, &x) in offsets.iter().zip(&src) {
            out[o] += x;
        }
        Ok(self.derive(out, shape.clone(), self.dtype))
    }

    /// Convert to another dtype, rounding if it is narrower.
    pub fn astype(&self, dtype: DType) -> Tensor {
        if dtype == self.dtype {
            return self.clone();
        }
        self.derive(self.to_f64_vec(), self.shape.clone(), dtype)
    }

    fn binary(
        &self,
        other: &Tensor,
        kernel: impl FnOnce(&dyn ComputeBackend, &[f64], &[f64]) -> Result<Vec<f64>>,
    ) -> Result<Tensor> {
        let shape = Shape::broadcast_shape(&self.shape, &other.shape)?;
        let lhs = self.broadcast_to(&shape)?.to_f64_vec();
        let rhs = other.broadcast_to(&shape)?.to_f64_vec();
        let out = kernel(self.backend.as_ref(), &lhs, &rhs)?;
        Ok(self.derive(out, shape, self.dtype.promote(other.dtype)))
    }

    /// Element-wise sum with numpy broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, |backend, a, b| backend.add(a, b))
    }

    /// Element-wise difference with numpy broadcasting.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, |backend, a, b| backend.sub(a, b))
    }

    /// Element-wise product with numpy broadcasting.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, |backend, a, b| backend.mul(a, b))
    }

    /// Element-wise `1 / x`; `1 / inf` is exactly zero.
    pub fn reciprocal(&self) -> Tensor {
        let out = self.to_f64_vec().into_iter().map(|x| 1.0 / x).collect();
        self.derive(out, self.shape.clone(), self.dtype)
    }

    /// Copy of a square matrix with its diagonal set to `value`.
    pub fn fill_diagonal(&self, value: f64) -> Result<Tensor> {
        let n = self.require_square("fill_diagonal")?;
        let mut data = self.to_f64_vec();
        for i in 0..n {
            data[i * n + i] = value;
        }
        Ok(self.derive(data, self.shape.clone(), self.dtype))
    }

    /// Returns `n` if this is an `n x n` matrix, else a dimension error.
    pub fn require_square(&self, op: &str) -> Result<usize> {
        if self.ndim() != 2 {
            return Err(TensorError::Dimension(format!(
                "{} supports only 2-dimensional arrays, got shape {}",
                op, self.shape
            )));
        }
        if self.shape.dim(0) != self.shape.dim(1) {
            return Err(TensorError::Dimension(format!(
                "{}: matrix is not square, got shape {}",
                op, self.shape
            )));
        }
        Ok(self.shape.dim(0))
    }

    /// Matrix multiplication of two 2D tensors on this tensor's backend.
    ///
    /// self is [m, k], other is [k, n], result is [m, n] in `out_dtype`.
    pub fn matmul(&self, other: &Tensor, out_dtype: DType) -> Result<Tensor> {
        if self.shape.ndim() != 2 || other.shape.ndim() != 2 {
            return Err(TensorError::Other(
                "matmul requires 2D tensors".to_string(),
            ));
        }

        let m = self.shape.dim(0);
        let k = self.shape.dim(1);
        let k2 = other.shape.dim(0);
        let n = other.shape.dim(1);

        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let result_data =
            self.backend
                .matmul(&self.to_f64_vec(), &other.to_f64_vec(), m, k, n)?;
        Ok(self.derive(result_data, Shape::new(vec![m, n]), out_dtype))
    }

    /// Symmetric eigendecomposition reading the `triangle` half of a square matrix.
    ///
    /// Returns ascending eigenvalues `w` of shape [n] and, when `compute_v` is
    /// set, eigenvectors `v` of shape [n, n] stored as columns. Both keep the
    /// input's dtype.
    pub fn syevd(&self, triangle: Triangle, compute_v: bool) -> Result<(Tensor, Option<Tensor>)> {
        let n = self.require_square("syevd")?;
        let (w, v) = self
            .backend
            .syevd(&self.to_f64_vec(), n, triangle, compute_v)?;
        let w = self.derive(w, Shape::new(vec![n]), self.dtype);
        let v = v.map(|v| self.derive(v, Shape::new(vec![n, n]), self.dtype));
        Ok((w, v))
    }
}
