use std::collections::HashSet;

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use weft_core::context::within_run;
use weft_core::{ExecutionConfig, Outputs, Result, RunScope, TransformationType};

use crate::evaluator::evaluate;
use crate::node::NodeRef;

/// Evaluate `root` as one top-level run.
///
/// Binds `job_id` and `config` for everything evaluated on behalf of this run
/// and attaches the job id to any error that does not carry one yet.
pub async fn run(root: &NodeRef, job_id: Uuid, config: ExecutionConfig) -> Result<Outputs> {
    let span = info_span!("run", job_id = %job_id);
    let scope = RunScope::new(job_id, config);
    let root_context = root.context().clone().with_job_id(job_id);

    let outcome = within_run(scope, async {
        info!(operator_id = %root.context().operator_hierarchical_id, "Starting run");
        evaluate(root).await
    })
    .instrument(span)
    .await;

    match outcome {
        Ok(outputs) => Ok(outputs.as_ref().clone()),
        Err(err) => {
            warn!(job_id = %job_id, error = %err, "Run failed");
            Err(err.enrich(&root_context))
        }
    }
}

/// All steps below `root` (members of nested graphs and their constant
/// providers included), in depth-first order.
pub fn all_steps(root: &NodeRef) -> Vec<NodeRef> {
    let mut steps = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root.clone()];

    while let Some(node) = stack.pop() {
        if !seen.insert(node.node_id()) {
            continue;
        }
        match node.context().transformation_type {
            TransformationType::Component => steps.push(node),
            TransformationType::Workflow => {
                let mut members = node.members();
                members.reverse();
                stack.extend(members);
            }
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use weft_core::context::{current_config, current_job_id};
    use weft_core::{from_fn, DataType, ErrorKind, NamedValue};

    use crate::graph::{ConstantOptions, Graph};
    use crate::step::Step;
    use weft_test_utils::{failing_component, sum_component};

    #[tokio::test]
    async fn test_run_binds_job_id_and_config() {
        let probe = Arc::new(Step::new(from_fn(Vec::<String>::new(), |_| {
            Ok(json!({
                "job_id": current_job_id().map(|id| id.to_string()),
                "plots": current_config().run_pure_plot_operators,
            }))
        })));
        let graph = Graph::builder()
            .member("probe", probe)
            .output("job_id", "probe", "job_id")
            .output("plots", "probe", "plots")
            .build()
            .unwrap();

        let job_id = Uuid::new_v4();
        let config = ExecutionConfig {
            run_pure_plot_operators: true,
            ..ExecutionConfig::default()
        };
        let root: NodeRef = graph;
        let out = run(&root, job_id, config).await.unwrap();
        assert_eq!(out["job_id"], json!(job_id.to_string()));
        assert_eq!(out["plots"], json!(true));
    }

    #[tokio::test]
    async fn test_run_error_carries_job_id() {
        let failing = Arc::new(Step::new(failing_component("nope", "E")).with_operator("\\F\\", "F"));
        let root: NodeRef = Graph::builder()
            .member("F", failing)
            .output("r", "F", "r")
            .build()
            .unwrap();

        let job_id = Uuid::new_v4();
        let err = run(&root, job_id, ExecutionConfig::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Component);
        let context = err.context().unwrap();
        assert_eq!(context.operator_hierarchical_id, "\\F\\");
        assert_eq!(context.job_id, Some(job_id));
    }

    #[tokio::test]
    async fn test_concurrent_runs_keep_their_job_ids() {
        let make = || -> NodeRef {
            let probe = Arc::new(Step::new(from_fn(Vec::<String>::new(), |_| {
                Ok(json!({"job_id": current_job_id().map(|id| id.to_string())}))
            })));
            Graph::builder()
                .member("probe", probe)
                .output("job_id", "probe", "job_id")
                .build()
                .unwrap()
        };
        let (first, second) = (make(), make());
        let (id1, id2) = (Uuid::new_v4(), Uuid::new_v4());

        let (a, b) = tokio::join!(
            run(&first, id1, ExecutionConfig::default()),
            run(&second, id2, ExecutionConfig::default())
        );
        assert_eq!(a.unwrap()["job_id"], json!(id1.to_string()));
        assert_eq!(b.unwrap()["job_id"], json!(id2.to_string()));
    }

    #[test]
    fn test_all_steps_includes_nested_and_providers() {
        let inner = Graph::builder()
            .with_operator("\\o\\i\\", "i")
            .member("S", Arc::new(Step::new(sum_component())))
            .input("first", [("S", "c")])
            .input("second", [("S", "d")])
            .output("sum", "S", "sum")
            .build()
            .unwrap();
        inner
            .add_constant_providing_node(
                &[
                    NamedValue::new("first", json!(1), DataType::Float),
                    NamedValue::new("second", json!(2), DataType::Float),
                ],
                ConstantOptions::new("c"),
            )
            .unwrap();
        let outer: NodeRef = Graph::builder()
            .member("inner", inner)
            .member("T", Arc::new(Step::new(sum_component())))
            .build()
            .unwrap();

        let steps = all_steps(&outer);
        assert_eq!(steps.len(), 3);
        assert!(steps
            .iter()
            .any(|s| s.context().operator_hierarchical_id == "\\o\\i\\constant_provider_c\\"));
    }
}
