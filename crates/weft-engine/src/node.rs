use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use uuid::Uuid;

use weft_core::{ExecutionContext, Outputs, Result};

/// Shared handle to a step or graph.
pub type NodeRef = Arc<dyn Node>;

/// The outcome of resolving a node, shareable between all of its consumers.
pub type SharedOutputs = Shared<BoxFuture<'static, Result<Arc<Outputs>>>>;

/// Anything that can be evaluated to named outputs: a step or a graph.
///
/// Graphs implement this trait too, so a graph can be a member of another
/// graph and is indistinguishable from a step to its consumers.
pub trait Node: Send + Sync + 'static {
    /// Identity used to deduplicate concurrent requests within a run.
    fn node_id(&self) -> Uuid;

    /// The static identity of this node, used for logging and errors.
    fn context(&self) -> &ExecutionContext;

    /// Whether all declared outputs of this node are plots.
    fn has_only_plot_outputs(&self) -> bool;

    /// Wire input ports to their sources. Later wirings of the same port
    /// replace earlier ones. Fails once evaluation has started.
    fn add_inputs(&self, inputs: HashMap<String, InputSource>) -> Result<()>;

    /// The nodes this node needs results from before it can compute.
    fn dependencies(&self) -> Vec<Dependency>;

    /// Nodes owned by this node. Empty for steps.
    fn members(&self) -> Vec<NodeRef> {
        Vec::new()
    }

    /// Start (or join) the memoized computation of this node.
    ///
    /// This does not check for cycles; use [`crate::evaluate`] for the
    /// checked entry point.
    fn resolve(self: Arc<Self>) -> BoxFuture<'static, Result<Arc<Outputs>>>;
}

/// A non-owning reference to an output port of another node.
#[derive(Clone)]
pub struct InputSource {
    node: Weak<dyn Node>,
    output: String,
}

impl InputSource {
    pub fn new<N: Node>(node: &Arc<N>, output: impl Into<String>) -> Self {
        let node: NodeRef = node.clone();
        Self::from_ref(&node, output)
    }

    pub fn from_ref(node: &NodeRef, output: impl Into<String>) -> Self {
        Self {
            node: Arc::downgrade(node),
            output: output.into(),
        }
    }

    /// The source node, if it is still alive.
    pub fn node(&self) -> Option<NodeRef> {
        self.node.upgrade()
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

impl std::fmt::Debug for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let operator = self
            .node()
            .map(|n| n.context().operator_hierarchical_id.clone())
            .unwrap_or_else(|| "<dropped>".to_string());
        f.debug_struct("InputSource")
            .field("operator", &operator)
            .field("output", &self.output)
            .finish()
    }
}

/// One edge of the dependency graph: `port` of the consumer reads `output`
/// of `source`.
#[derive(Clone)]
pub struct Dependency {
    pub port: String,
    pub source: NodeRef,
    pub output: String,
}

/// Once-only memo of a node's computation.
///
/// The first request stores a shared future; every later request joins it.
/// Because the future lives in the node rather than in the requesting task,
/// aborting a requester never causes the computation to start again.
#[derive(Default)]
pub(crate) struct Memo {
    cell: OnceLock<SharedOutputs>,
}

impl Memo {
    pub(crate) fn is_started(&self) -> bool {
        self.cell.get().is_some()
    }

    pub(crate) fn get_or_start<F>(&self, start: F) -> SharedOutputs
    where
        F: FnOnce() -> BoxFuture<'static, Result<Arc<Outputs>>>,
    {
        self.cell.get_or_init(|| start().shared()).clone()
    }
}
