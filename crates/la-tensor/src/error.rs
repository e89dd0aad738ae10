use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("invalid axes {axes:?} for tensor with {ndim} dimensions")]
    InvalidAxes { axes: Vec<usize>, ndim: usize },
    #[error("cannot broadcast shapes {a:?} and {b:?}")]
    BroadcastError { a: Vec<usize>, b: Vec<usize> },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("dimension error: {0}")]
    Dimension(String),
    #[error("eigensolver did not converge after {sweeps} sweeps")]
    NoConvergence { sweeps: usize },
    #[error("invalid triangle selector {0:?}, expected \"U\" or \"L\"")]
    InvalidTriangle(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
