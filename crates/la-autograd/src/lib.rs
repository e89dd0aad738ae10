//! `la-autograd` - Reverse-mode gradient graph for linalg-autodiff.
//!
//! Forward operations record themselves through a `BackwardBuilder`: one
//! closure per differentiable input, each reading forward values only through
//! retained-value tokens. `backward` walks the recorded graph from an output
//! and accumulates gradients per array.

pub mod array;
pub mod backward;
pub mod error;
pub mod graph;
pub mod mode;
pub mod ops;

pub use array::Array;
pub use backward::{backward, backward_with_grads, BackwardOptions, Gradients};
pub use error::{AutogradError, Result};
pub use graph::{
    BackwardBuilder, BackwardContext, BackwardFn, RetainedInputToken, RetainedOutputToken, Target,
};
pub use mode::{is_backprop_enabled, no_backprop, ForceBackpropModeScope, NoBackpropModeScope};
