//! Backward pass over the recorded graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use la_tensor::Tensor;
use log::{debug, trace};

use crate::array::Array;
use crate::error::{AutogradError, Result};
use crate::graph::{BackwardContext, OpNode};
use crate::mode::{ForceBackpropModeScope, NoBackpropModeScope};
use crate::ops;

/// Options for a backward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackwardOptions {
    /// Record the gradient computation itself so the returned gradients can
    /// be differentiated again. When false the pass runs with backprop
    /// recording disabled.
    pub create_graph: bool,
}

/// Gradients computed by a backward pass, keyed by array.
#[derive(Debug, Default)]
pub struct Gradients {
    grads: HashMap<usize, Array>,
}

impl Gradients {
    /// Gradient reaching `array`, if it is part of the traversed graph.
    pub fn get(&self, array: &Array) -> Option<&Array> {
        array.node().and_then(|node| self.grads.get(&node.id))
    }

    /// Number of arrays that received a gradient.
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// True if no array received a gradient.
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

/// Backpropagate from a single-element `output`, seeding its gradient with one.
pub fn backward(output: &Array, options: &BackwardOptions) -> Result<Gradients> {
    if output.numel() != 1 {
        return Err(AutogradError::NonScalarOutput {
            shape: output.shape().dims().to_vec(),
        });
    }
    let seed = Tensor::ones(output.shape().clone(), output.dtype())
        .with_backend(output.backend().clone());
    backward_with_grads(&[(output, seed)], options)
}

/// Backpropagate from several outputs with explicit upstream gradients.
///
/// Outputs that are not part of any recorded graph contribute nothing; if
/// none are, the result is empty.
pub fn backward_with_grads(
    roots: &[(&Array, Tensor)],
    options: &BackwardOptions,
) -> Result<Gradients> {
    let _no_backprop = (!options.create_graph).then(NoBackpropModeScope::new);
    let _force_backprop = options.create_graph.then(ForceBackpropModeScope::new);

    let mut grads = HashMap::new();
    let mut root_ops = Vec::new();
    for (array, seed) in roots {
        let Some(node) = array.node() else {
            continue;
        };
        if seed.shape() != array.shape() {
            return Err(AutogradError::SeedShapeMismatch {
                expected: array.shape().dims().to_vec(),
                got: seed.shape().dims().to_vec(),
            });
        }
        accumulate(&mut grads, node.id, Array::constant(seed.clone()))?;
        if let Some(op) = node.creator.get() {
            root_ops.push(op.clone());
        }
    }

    let order = topological_order(&root_ops);
    debug!(
        "backward over {} op(s) from {} root(s), create_graph={}",
        order.len(),
        roots.len(),
        options.create_graph
    );

    for op in order {
        // Every consumer of these outputs precedes `op` in `order`, so the
        // output gradients are complete here.
        let output_grads: Vec<Option<Array>> = op
            .outputs
            .iter()
            .map(|slot| grads.get(&slot.id).cloned())
            .collect();
        if output_grads.iter().all(Option::is_none) {
            continue;
        }
        trace!("backward through `{}` (op {})", op.name, op.id);

        for (input_index, rule) in &op.rules {
            let mut ctx = BackwardContext::new(&op, &output_grads);
            rule(&mut ctx)?;
            let grad = ctx
                .take_input_grad()
                .ok_or_else(|| AutogradError::MissingInputGradient {
                    op: op.name.to_string(),
                    input: *input_index,
                })?;

            let input = &op.inputs[*input_index];
            if grad.shape() != &input.shape {
                return Err(AutogradError::GradientShapeMismatch {
                    op: op.name.to_string(),
                    input: *input_index,
                    expected: input.shape.dims().to_vec(),
                    got: grad.shape().dims().to_vec(),
                });
            }
            if let Some(node) = &input.node {
                accumulate(&mut grads, node.id, grad)?;
            }
        }
    }

    Ok(Gradients { grads })
}

fn accumulate(grads: &mut HashMap<usize, Array>, id: usize, grad: Array) -> Result<()> {
    let merged = match grads.remove(&id) {
        Some(previous) => ops::add(&previous, &grad)?,
        None => grad,
    };
    grads.insert(id, merged);
    Ok(())
}

/// Ops reachable from `roots`, each before the ops producing its inputs.
fn topological_order(roots: &[Arc<OpNode>]) -> Vec<Arc<OpNode>> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    // `true` marks an op whose producers have already been pushed.
    let mut stack: Vec<(Arc<OpNode>, bool)> =
        roots.iter().rev().map(|op| (op.clone(), false)).collect();
    while let Some((op, expanded)) = stack.pop() {
        if expanded {
            order.push(op);
            continue;
        }
        if !visited.insert(op.id) {
            continue;
        }
        stack.push((op.clone(), true));
        for input in op.inputs.iter().rev() {
            if let Some(creator) = input.node.as_ref().and_then(|n| n.creator.get()) {
                if !visited.contains(&creator.id) {
                    stack.push((creator.clone(), false));
                }
            }
        }
    }
    order.reverse();
    order
}
