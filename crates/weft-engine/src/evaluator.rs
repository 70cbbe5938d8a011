//! Resolution of node results.
//!
//! Evaluation is lazy: requesting a node resolves exactly the nodes it
//! transitively depends on. Before anything runs, the dependency graph
//! reachable from the requested node is walked once to reject cycles, so
//! concurrently started branches can never wait on each other forever.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use weft_core::context::{current_run, within_run};
use weft_core::{Outputs, Result, RunScope, RuntimeExecutionError};

use crate::node::{Dependency, NodeRef};

#[derive(Clone, Copy)]
enum Mark {
    OnChain,
    Done,
}

/// Reject dependency cycles reachable from `root`.
///
/// Iterative depth-first walk; the error is attributed to the consumer whose
/// input closes the cycle.
pub fn check_for_cycles(root: &NodeRef) -> Result<()> {
    check_for_cycles_all(std::slice::from_ref(root))
}

/// Like [`check_for_cycles`] for several roots, visiting shared nodes once.
pub fn check_for_cycles_all(roots: &[NodeRef]) -> Result<()> {
    let mut marks: HashMap<Uuid, Mark> = HashMap::new();
    for root in roots {
        if marks.contains_key(&root.node_id()) {
            continue;
        }
        walk_for_cycles(root, &mut marks)?;
    }
    Ok(())
}

fn walk_for_cycles(root: &NodeRef, marks: &mut HashMap<Uuid, Mark>) -> Result<()> {
    let mut stack: Vec<(NodeRef, std::vec::IntoIter<Dependency>)> = Vec::new();

    marks.insert(root.node_id(), Mark::OnChain);
    stack.push((root.clone(), root.dependencies().into_iter()));

    while let Some((node, pending)) = stack.last_mut() {
        let Some(dep) = pending.next() else {
            marks.insert(node.node_id(), Mark::Done);
            stack.pop();
            continue;
        };

        let source_id = dep.source.node_id();
        match marks.get(&source_id).copied() {
            Some(Mark::OnChain) => {
                let msg = format!(
                    "Circular dependency detected with input '{}' pointing to output '{}' of operator {}",
                    dep.port,
                    dep.output,
                    dep.source.context().operator_hierarchical_id
                );
                warn!(operator_id = %node.context().operator_hierarchical_id, "{}", msg);
                return Err(RuntimeExecutionError::circular_dependency(msg)
                    .with_context(&node.context().snapshot()));
            }
            Some(Mark::Done) => {}
            None => {
                marks.insert(source_id, Mark::OnChain);
                let next = dep.source.dependencies().into_iter();
                stack.push((dep.source, next));
            }
        }
    }
    Ok(())
}

/// Evaluate `node`: check for cycles, then resolve its memoized result.
pub async fn evaluate(node: &NodeRef) -> Result<Arc<Outputs>> {
    check_for_cycles(node)?;
    node.clone().resolve().await
}

/// Bind `scope` (if any) as the current run around `fut`.
pub(crate) fn bind_run<F>(scope: Option<RunScope>, fut: F) -> BoxFuture<'static, F::Output>
where
    F: Future + Send + 'static,
{
    match scope {
        Some(scope) => within_run(scope, fut).boxed(),
        None => fut.boxed(),
    }
}

/// Resolve all distinct `nodes` concurrently.
///
/// Each node is resolved in its own task. The first failure is returned and
/// the remaining tasks are aborted; their memoized computations stay intact.
pub(crate) async fn resolve_all(nodes: Vec<NodeRef>) -> Result<HashMap<Uuid, Arc<Outputs>>> {
    let mut distinct: HashMap<Uuid, NodeRef> = HashMap::new();
    for node in nodes {
        distinct.entry(node.node_id()).or_insert(node);
    }

    let mut results = HashMap::with_capacity(distinct.len());
    let scope = current_run();
    let mut tasks = JoinSet::new();
    for (id, node) in distinct {
        let fut = bind_run(scope.clone(), node.resolve());
        tasks.spawn(async move { (id, fut.await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, Ok(outputs))) => {
                results.insert(id, outputs);
            }
            Ok((_, Err(err))) => return Err(err),
            Err(join_err) => {
                return Err(RuntimeExecutionError::unexpected_component(
                    "A dependency task failed unexpectedly.",
                )
                .with_cause(join_err))
            }
        }
    }
    Ok(results)
}
