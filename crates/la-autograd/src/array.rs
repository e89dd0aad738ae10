use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use la_tensor::{ComputeBackend, DType, Shape, Tensor};

use crate::graph::OpNode;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Graph identity of an array that participates in backprop.
pub(crate) struct ArrayNode {
    pub(crate) id: usize,
    /// The recorded operation that produced this array; unset for leaves.
    pub(crate) creator: OnceLock<Arc<OpNode>>,
}

impl ArrayNode {
    pub(crate) fn new() -> Arc<ArrayNode> {
        Arc::new(ArrayNode {
            id: next_id(),
            creator: OnceLock::new(),
        })
    }

    /// A node standing in for output `id` of `op` after the original node
    /// was dropped.
    pub(crate) fn relinked(id: usize, op: Arc<OpNode>) -> Arc<ArrayNode> {
        Arc::new(ArrayNode {
            id,
            creator: OnceLock::from(op),
        })
    }
}

/// A tensor value together with its position in the gradient graph.
///
/// Arrays without a node are constants: no gradient flows into them and
/// operations on them register no rule for that input.
#[derive(Clone)]
pub struct Array {
    data: Tensor,
    node: Option<Arc<ArrayNode>>,
}

impl Array {
    /// An array that never receives gradients.
    pub fn constant(data: Tensor) -> Array {
        Array { data, node: None }
    }

    /// A leaf array whose gradient is reported by `backward`.
    pub fn requires_grad(data: Tensor) -> Array {
        Array {
            data,
            node: Some(ArrayNode::new()),
        }
    }

    pub(crate) fn from_node(data: Tensor, node: Option<Arc<ArrayNode>>) -> Array {
        Array { data, node }
    }

    pub(crate) fn node(&self) -> Option<&Arc<ArrayNode>> {
        self.node.as_ref()
    }

    pub(crate) fn into_node(self) -> Option<Arc<ArrayNode>> {
        self.node
    }

    /// Whether gradients can flow into this array.
    pub fn is_backprop_required(&self) -> bool {
        self.node.is_some()
    }

    /// Same value, cut from the graph.
    pub fn detach(&self) -> Array {
        Array::constant(self.data.clone())
    }

    /// The underlying tensor value.
    pub fn data(&self) -> &Tensor {
        &self.data
    }

    /// Shape of the value.
    pub fn shape(&self) -> &Shape {
        self.data.shape()
    }

    /// Storage dtype of the value.
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Number of dimensions of the value.
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Number of elements of the value.
    pub fn numel(&self) -> usize {
        self.data.numel()
    }

    /// Backend the value's kernels run on.
    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        self.data.backend()
    }

    /// Copy the elements out in row-major order, widened to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.data.to_f64_vec()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("shape", self.shape())
            .field("dtype", &self.dtype())
            .field("node", &self.node.as_ref().map(|n| n.id))
            .finish()
    }
}
