use serde_json::{json, Value};

use weft::{
    execute, ComponentRegistry, ComponentRevision, DataType, ExecutionStatus, ProcessStage,
    WorkflowExecutionInput,
};
use weft_test_utils::{capture_logs, panicking_component, sum_component};

fn registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry.register(
        ComponentRevision::new("add", "1.0.0", sum_component())
            .with_name("Add")
            .with_output("sum", DataType::Float),
    );
    registry.register(ComponentRevision::new("boom", "1.0.0", panicking_component("boom")));
    registry
}

fn nested_request(outer_inputs: Value, input_data: Value) -> WorkflowExecutionInput {
    serde_json::from_value(json!({
        "workflow": {
            "id": "outer",
            "name": "Outer",
            "tr_id": "tr-outer",
            "tr_name": "Outer",
            "tr_tag": "1.0.0",
            "sub_nodes": [{
                "kind": "workflow",
                "id": "inner",
                "name": "Inner",
                "tr_id": "tr-inner",
                "tr_name": "Inner",
                "tr_tag": "1.0.0",
                "sub_nodes": [{"kind": "component", "id": "s", "name": "Sum", "component_id": "add"}],
                "inputs": [
                    {"name": "a", "id_of_sub_node": "s", "name_in_subnode": "c", "type": "FLOAT"},
                    {"name": "b", "id_of_sub_node": "s", "name_in_subnode": "d", "type": "FLOAT",
                     "default": true, "default_value": 10.0}
                ],
                "outputs": [{"name": "total", "id_of_sub_node": "s", "name_in_subnode": "sum", "type": "FLOAT"}]
            }],
            "inputs": outer_inputs,
            "outputs": [{"name": "result", "id_of_sub_node": "inner", "name_in_subnode": "total", "type": "FLOAT"}]
        },
        "configuration": {"return_individual_node_results": true},
        "input_data": input_data
    }))
    .unwrap()
}

#[tokio::test]
async fn test_nested_workflow_uses_default_value() {
    let input = nested_request(
        json!([{"name": "x", "id_of_sub_node": "inner", "name_in_subnode": "a", "type": "FLOAT"}]),
        json!({"x": 1.5}),
    );

    let result = execute(input, &registry()).await;
    assert_eq!(result.result, ExecutionStatus::Ok, "{:?}", result.error);
    assert_eq!(result.output_results_by_output_name["result"], json!(11.5));

    let node_results = result.node_results.unwrap();
    assert_eq!(node_results["\\outer\\inner\\s\\"], json!({"sum": 11.5}));
}

#[tokio::test]
async fn test_outer_constant_overrides_inner_default() {
    let input = nested_request(
        json!([
            {"name": "x", "id_of_sub_node": "inner", "name_in_subnode": "a", "type": "FLOAT"},
            {"id_of_sub_node": "inner", "name_in_subnode": "b", "type": "FLOAT",
             "constant": true, "constant_value": "0.5"}
        ]),
        json!({"x": 1.5}),
    );

    let result = execute(input, &registry()).await;
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.output_results_by_output_name["result"], json!(2.0));
}

#[tokio::test]
async fn test_unknown_input_data_is_rejected() {
    let input = nested_request(
        json!([{"name": "x", "id_of_sub_node": "inner", "name_in_subnode": "a", "type": "FLOAT"}]),
        json!({"x": 1.5, "z": 3}),
    );

    let result = execute(input, &registry()).await;
    let error = result.error.unwrap();
    assert_eq!(error.process_stage, ProcessStage::ParsingLoadedData);
    assert_eq!(error.kind, "WorkflowInputDataValidationError");
}

#[tokio::test]
async fn test_panicking_component_is_reported() {
    let (logs, _guard) = capture_logs();
    let input: WorkflowExecutionInput = serde_json::from_value(json!({
        "workflow": {
            "id": "wf",
            "name": "wf",
            "tr_id": "tr",
            "tr_name": "Crashing",
            "tr_tag": "1.0.0",
            "sub_nodes": [{"kind": "component", "id": "b", "name": "Boom", "component_id": "boom"}],
            "outputs": [{"name": "out", "id_of_sub_node": "b", "name_in_subnode": "x", "type": "ANY"}]
        }
    }))
    .unwrap();
    let job_id = input.job_id;

    let result = execute(input, &registry()).await;
    let error = result.error.unwrap();
    assert_eq!(error.kind, "UnexpectedComponentException");
    assert_eq!(error.process_stage, ProcessStage::ExecutingComponentCode);
    assert_eq!(error.context.unwrap().operator_hierarchical_id, "\\wf\\b\\");
    assert!(logs.contents().contains(&job_id.to_string()));
}
