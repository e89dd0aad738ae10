use la_tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutogradError {
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("backward needs a single-element output or an explicit gradient, got shape {shape:?}")]
    NonScalarOutput { shape: Vec<usize> },
    #[error("seed gradient shape mismatch: expected {expected:?}, got {got:?}")]
    SeedShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("`{op}` produced a gradient of shape {got:?} for input {input}, expected {expected:?}")]
    GradientShapeMismatch {
        op: String,
        input: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("backward rule of `{op}` set no gradient for input {input}")]
    MissingInputGradient { op: String, input: usize },
}

pub type Result<T> = std::result::Result<T, AutogradError>;
