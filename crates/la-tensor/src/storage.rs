use half::f16;

use crate::dtype::DType;

/// CPU-side tensor storage.
///
/// Values are kept in their declared precision. Kernels compute in `f64`, so
/// reads widen losslessly and writes round to the storage dtype.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    /// 16-bit floating point storage.
    F16(Vec<f16>),
    /// 32-bit floating point storage.
    F32(Vec<f32>),
    /// 64-bit floating point storage.
    F64(Vec<f64>),
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F16(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create zero-filled storage for the given dtype and element count.
    pub fn zeros(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::F16 => CpuStorage::F16(vec![f16::ZERO; n]),
            DType::F32 => CpuStorage::F32(vec![0.0; n]),
            DType::F64 => CpuStorage::F64(vec![0.0; n]),
        }
    }

    /// Create storage from an f32 vector.
    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        CpuStorage::F32(data)
    }

    /// Store `f64` values in the given dtype, rounding if it is narrower.
    pub fn from_f64_vec(dtype: DType, data: Vec<f64>) -> Self {
        match dtype {
            DType::F16 => CpuStorage::F16(data.into_iter().map(f16::from_f64).collect()),
            DType::F32 => CpuStorage::F32(data.into_iter().map(|x| x as f32).collect()),
            DType::F64 => CpuStorage::F64(data),
        }
    }

    /// Widen every element to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            CpuStorage::F16(v) => v.iter().map(|x| x.to_f64()).collect(),
            CpuStorage::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            CpuStorage::F64(v) => v.clone(),
        }
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
        }
    }
}
