//! Recording of gradient rules.
//!
//! A forward operation builds a `BackwardBuilder` over its inputs and output
//! tensors, asks for a `Target` per input it can differentiate, retains the
//! forward values each rule needs and defines one closure per target.
//! `finalize` wires the outputs into the graph.
//!
//! Retained values live in a per-operation table owned by the recorded node;
//! closures only hold index tokens into it and redeem them through the
//! `BackwardContext` when the backward pass runs.

use std::sync::{Arc, Weak};

use la_tensor::{ComputeBackend, DType, Shape, Tensor};
use log::trace;

use crate::array::{next_id, Array, ArrayNode};
use crate::error::Result;
use crate::mode::is_backprop_enabled;

/// A gradient rule: reads output gradients and retained values from the
/// context and sets the gradient of one input.
pub type BackwardFn = Box<dyn Fn(&mut BackwardContext<'_>) -> Result<()> + Send + Sync>;

/// Input `index` of the operation being recorded is differentiable.
#[must_use]
#[derive(Debug)]
pub struct Target {
    index: usize,
}

/// Handle to an input retained for the backward pass.
#[derive(Debug, Clone, Copy)]
pub struct RetainedInputToken(usize);

/// Handle to an output retained for the backward pass.
#[derive(Debug, Clone, Copy)]
pub struct RetainedOutputToken(usize);

pub(crate) struct InputSlot {
    pub(crate) node: Option<Arc<ArrayNode>>,
    pub(crate) shape: Shape,
}

pub(crate) struct OutputSlot {
    pub(crate) id: usize,
    shape: Shape,
    dtype: DType,
    backend: Arc<dyn ComputeBackend>,
}

struct RetainedOutput {
    data: Tensor,
    id: usize,
    // Weak: the output node owns this op through `creator`.
    node: Weak<ArrayNode>,
}

/// A recorded forward operation.
pub(crate) struct OpNode {
    pub(crate) id: usize,
    pub(crate) name: &'static str,
    pub(crate) inputs: Vec<InputSlot>,
    pub(crate) outputs: Vec<OutputSlot>,
    pub(crate) rules: Vec<(usize, BackwardFn)>,
    retained_inputs: Vec<Array>,
    retained_outputs: Vec<RetainedOutput>,
}

impl OpNode {
    // Graph edges owned by this op: input nodes and retained inputs.
    fn take_edges(&mut self) -> impl Iterator<Item = Arc<ArrayNode>> + '_ {
        let inputs = self.inputs.iter_mut().filter_map(|slot| slot.node.take());
        let retained = self.retained_inputs.drain(..).filter_map(Array::into_node);
        inputs.chain(retained)
    }
}

impl Drop for OpNode {
    // Unlink the producer chain iteratively so dropping a deep graph does not
    // recurse once per op.
    fn drop(&mut self) {
        let mut pending: Vec<Arc<ArrayNode>> = self.take_edges().collect();
        while let Some(node) = pending.pop() {
            let Ok(mut node) = Arc::try_unwrap(node) else {
                continue;
            };
            let Some(op) = node.creator.take() else {
                continue;
            };
            if let Ok(mut op) = Arc::try_unwrap(op) {
                pending.extend(op.take_edges());
            }
        }
    }
}

pub struct BackwardBuilder<const N: usize> {
    name: &'static str,
    inputs: Vec<Array>,
    outputs: [Tensor; N],
    recording: bool,
    rules: Vec<(usize, BackwardFn)>,
    retained_inputs: Vec<Array>,
    retained_outputs: Vec<usize>,
}

impl<const N: usize> BackwardBuilder<N> {
    /// Start recording `name` with the given inputs and freshly computed outputs.
    ///
    /// Whether anything is recorded is decided by the backprop mode at this
    /// point, so build after leaving any no-backprop kernel scope.
    pub fn new(name: &'static str, inputs: &[&Array], outputs: [Tensor; N]) -> Self {
        BackwardBuilder {
            name,
            inputs: inputs.iter().map(|&a| a.clone()).collect(),
            outputs,
            recording: is_backprop_enabled(),
            rules: Vec::new(),
            retained_inputs: Vec::new(),
            retained_outputs: Vec::new(),
        }
    }

    /// A target for input `index`, or `None` if that input cannot receive a
    /// gradient in the current context.
    pub fn create_target(&self, index: usize) -> Option<Target> {
        let differentiable = self
            .inputs
            .get(index)
            .is_some_and(Array::is_backprop_required);
        (self.recording && differentiable).then_some(Target { index })
    }

    /// Keep input `index` for use by a rule.
    ///
    /// # Panics
    /// Panics if `index` is not an input of this operation.
    pub fn retain_input(&mut self, index: usize) -> RetainedInputToken {
        self.retained_inputs.push(self.inputs[index].clone());
        RetainedInputToken(self.retained_inputs.len() - 1)
    }

    /// Keep output `index` for use by a rule.
    ///
    /// # Panics
    /// Panics if `index` is not an output of this operation.
    pub fn retain_output(&mut self, index: usize) -> RetainedOutputToken {
        assert!(index < N, "output index {} out of range for {} outputs", index, N);
        self.retained_outputs.push(index);
        RetainedOutputToken(self.retained_outputs.len() - 1)
    }

    /// Bind the gradient rule for `target`.
    pub fn define<F>(&mut self, target: Target, rule: F)
    where
        F: Fn(&mut BackwardContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.rules.push((target.index, Box::new(rule)));
    }

    /// Finish recording and return the outputs as arrays.
    ///
    /// Without any defined rule the outputs are constants.
    pub fn finalize(self) -> [Array; N] {
        if self.rules.is_empty() {
            return self.outputs.map(Array::constant);
        }

        let nodes: [Arc<ArrayNode>; N] = std::array::from_fn(|_| ArrayNode::new());
        let retained_outputs = self
            .retained_outputs
            .iter()
            .map(|&i| RetainedOutput {
                data: self.outputs[i].clone(),
                id: nodes[i].id,
                node: Arc::downgrade(&nodes[i]),
            })
            .collect();
        let op = Arc::new(OpNode {
            id: next_id(),
            name: self.name,
            inputs: self
                .inputs
                .iter()
                .map(|a| InputSlot {
                    node: a.node().cloned(),
                    shape: a.shape().clone(),
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .zip(&nodes)
                .map(|(t, node)| OutputSlot {
                    id: node.id,
                    shape: t.shape().clone(),
                    dtype: t.dtype(),
                    backend: t.backend().clone(),
                })
                .collect(),
            rules: self.rules,
            retained_inputs: self.retained_inputs,
            retained_outputs,
        });
        trace!(
            "recorded `{}` (op {}) with {} rule(s)",
            op.name,
            op.id,
            op.rules.len()
        );

        for node in &nodes {
            // Fresh nodes, so the cell is always empty.
            let _ = node.creator.set(op.clone());
        }
        let mut nodes = nodes.into_iter();
        self.outputs.map(|data| Array::from_node(data, nodes.next()))
    }
}

/// What a gradient rule sees while the backward pass runs.
pub struct BackwardContext<'a> {
    op: &'a Arc<OpNode>,
    output_grads: &'a [Option<Array>],
    input_grad: Option<Array>,
}

impl<'a> BackwardContext<'a> {
    pub(crate) fn new(op: &'a Arc<OpNode>, output_grads: &'a [Option<Array>]) -> Self {
        BackwardContext {
            op,
            output_grads,
            input_grad: None,
        }
    }

    /// Gradient of output `index`, if any consumer produced one.
    pub fn output_grad(&self, index: usize) -> Option<&Array> {
        self.output_grads.get(index).and_then(Option::as_ref)
    }

    /// Gradient of output `index`, with an absent gradient read as zeros of
    /// the output's shape and dtype.
    ///
    /// # Panics
    /// Panics if `index` is not an output of this operation.
    pub fn output_grad_or_zeros(&self, index: usize) -> Array {
        if let Some(grad) = self.output_grad(index) {
            return grad.clone();
        }
        let slot = &self.op.outputs[index];
        Array::constant(
            Tensor::zeros(slot.shape.clone(), slot.dtype).with_backend(slot.backend.clone()),
        )
    }

    /// The input value retained at forward time.
    pub fn retained_input(&self, token: &RetainedInputToken) -> Array {
        self.op.retained_inputs[token.0].clone()
    }

    /// The output value retained at forward time, still produced by this
    /// operation.
    ///
    /// If the output array has since been dropped, a node with the same
    /// identity is recreated so gradients of the rule still reach the
    /// operation's inputs.
    pub fn retained_output(&self, token: &RetainedOutputToken) -> Array {
        let retained = &self.op.retained_outputs[token.0];
        let node = retained
            .node
            .upgrade()
            .unwrap_or_else(|| ArrayNode::relinked(retained.id, self.op.clone()));
        Array::from_node(retained.data.clone(), Some(node))
    }

    pub fn set_input_grad(&mut self, grad: Array) {
        self.input_grad = Some(grad);
    }

    pub(crate) fn take_input_grad(&mut self) -> Option<Array> {
        self.input_grad.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::no_backprop;

    fn leaf(values: Vec<f64>) -> Array {
        let n = values.len();
        Array::requires_grad(Tensor::from_f64(values, Shape::from([n])))
    }

    fn double(x: &Array) -> [Array; 1] {
        let out = x.data().add(x.data()).unwrap();
        let mut bb = BackwardBuilder::new("double", &[x], [out]);
        if let Some(target) = bb.create_target(0) {
            bb.define(target, |_ctx| Ok(()));
        }
        bb.finalize()
    }

    #[test]
    fn test_constant_inputs_get_no_target() {
        let x = Array::constant(Tensor::from_f64(vec![1.0], Shape::from([1])));
        let bb = BackwardBuilder::new("noop", &[&x], [x.data().clone()]);
        assert!(bb.create_target(0).is_none());
        assert!(bb.create_target(1).is_none());
    }

    #[test]
    fn test_no_target_while_not_recording() {
        let x = leaf(vec![1.0]);
        let [y] = no_backprop(|| double(&x));
        assert!(!y.is_backprop_required());
    }

    #[test]
    fn test_finalize_links_outputs_to_op() {
        let x = leaf(vec![1.0, 2.0]);
        let [y] = double(&x);
        let op = y.node().unwrap().creator.get().unwrap();
        assert_eq!(op.name, "double");
        assert_eq!(op.outputs[0].id, y.node().unwrap().id);
        assert_eq!(op.inputs[0].node.as_ref().unwrap().id, x.node().unwrap().id);
        assert_eq!(y.to_f64_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn test_retained_values_and_zero_fill() {
        let x = leaf(vec![3.0]);
        let out = x.data().mul(x.data()).unwrap();
        let mut bb = BackwardBuilder::new("square", &[&x], [out]);
        let target = bb.create_target(0).unwrap();
        let x_tok = bb.retain_input(0);
        let y_tok = bb.retain_output(0);
        bb.define(target, |_ctx| Ok(()));
        let [y] = bb.finalize();

        let op = y.node().unwrap().creator.get().unwrap().clone();
        let grads: [Option<Array>; 1] = [None];
        {
            let ctx = BackwardContext::new(&op, &grads);
            assert_eq!(ctx.retained_input(&x_tok).to_f64_vec(), vec![3.0]);
            let y_back = ctx.retained_output(&y_tok);
            assert_eq!(y_back.to_f64_vec(), vec![9.0]);
            assert!(y_back.is_backprop_required());
            assert!(ctx.output_grad(0).is_none());
            let zeros = ctx.output_grad_or_zeros(0);
            assert_eq!(zeros.shape().dims(), &[1]);
            assert_eq!(zeros.dtype(), DType::F64);
            assert_eq!(zeros.to_f64_vec(), vec![0.0]);
        }

        let y_id = y.node().unwrap().id;
        drop(y);
        // The output array is gone; the value is relinked to the same op.
        let y_back = BackwardContext::new(&op, &grads).retained_output(&y_tok);
        assert_eq!(y_back.to_f64_vec(), vec![9.0]);
        let node = y_back.node().unwrap();
        assert_eq!(node.id, y_id);
        assert!(Arc::ptr_eq(node.creator.get().unwrap(), &op));
    }
}
