use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use weft::{
    evaluate, run, ConstantOptions, DataType, ErrorKind, ExecutionConfig, Graph, InputSource,
    NamedValue, NodeRef, Step,
};
use weft_test_utils::{
    counting_component, provide_two_values, sleeping_component, sum_component, CallCounter,
};

fn sum_of(p: &Arc<Step>, first: &str, second: &str) -> Arc<Step> {
    let s = Arc::new(Step::new(sum_component()).with_operator("\\S\\", "S"));
    s.add_inputs_from([("c", InputSource::new(p, first)), ("d", InputSource::new(p, second))])
        .unwrap();
    s
}

#[tokio::test]
async fn test_wired_steps_produce_sum() {
    let p = Arc::new(Step::new(provide_two_values()));
    let s = sum_of(&p, "a", "b");

    let out = s.result().await.unwrap();
    assert!((out["sum"].as_f64().unwrap() - 3.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_wrong_output_port() {
    let p = Arc::new(Step::new(provide_two_values()));
    let s = sum_of(&p, "a", "wrong");

    let err = s.result().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingOutput);
    assert!(err.message().contains("wrong"));
}

#[tokio::test]
async fn test_unwired_input() {
    let p = Arc::new(Step::new(provide_two_values()));
    let s = Arc::new(Step::new(sum_component()));
    s.add_inputs_from([("c", InputSource::new(&p, "a"))]).unwrap();

    let err = s.result().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingInputSource);
}

#[tokio::test]
async fn test_graph_with_constants() {
    let s = Arc::new(Step::new(sum_component()));
    let graph = Graph::builder()
        .with_operator("\\wf\\", "wf")
        .member("S", s)
        .input("first", [("S", "c")])
        .input("second", [("S", "d")])
        .output("sum_result", "S", "sum")
        .build()
        .unwrap();
    graph
        .add_constant_providing_node(
            &[
                NamedValue::new("first", json!(1.9), DataType::Float),
                NamedValue::new("second", json!(0.1), DataType::Float),
            ],
            ConstantOptions::new("test"),
        )
        .unwrap();

    let root: NodeRef = graph;
    let out = run(&root, Uuid::new_v4(), ExecutionConfig::default()).await.unwrap();
    assert_eq!(out.len(), 1);
    assert!((out["sum_result"].as_f64().unwrap() - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_two_step_cycle_is_detected() {
    let calls = CallCounter::new();
    let a = Arc::new(Step::new(counting_component(&calls, ["x"], json!({"y": 1}))).with_operator("\\A\\", "A"));
    let b = Arc::new(Step::new(counting_component(&calls, ["x"], json!({"y": 1}))).with_operator("\\B\\", "B"));
    a.add_inputs_from([("x", InputSource::new(&b, "y"))]).unwrap();
    b.add_inputs_from([("x", InputSource::new(&a, "y"))]).unwrap();

    let root: NodeRef = a.clone();
    let err = evaluate(&root).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircularDependency);
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn test_independent_branches_run_concurrently() {
    let calls = CallCounter::new();
    let delay = Duration::from_millis(200);
    let left = Arc::new(Step::new(sleeping_component(&calls, delay, json!({"v": 1}))));
    let right = Arc::new(Step::new(sleeping_component(&calls, delay, json!({"v": 2}))));
    let graph = Graph::builder()
        .member("L", left)
        .member("R", right)
        .output("left", "L", "v")
        .output("right", "R", "v")
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let out = graph.result().await.unwrap();
    assert!(started.elapsed() < delay * 2);
    assert_eq!(out["left"], json!(1));
    assert_eq!(out["right"], json!(2));
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn test_shared_step_runs_once_across_graphs() {
    let calls = CallCounter::new();
    let shared = Arc::new(Step::new(counting_component(
        &calls,
        Vec::<String>::new(),
        json!({"a": 1.0, "b": 2.0}),
    )));
    let first = sum_of(&shared, "a", "b");
    let second = sum_of(&shared, "b", "a");
    let graph = Graph::builder()
        .member("first", first)
        .member("second", second)
        .output("x", "first", "sum")
        .output("y", "second", "sum")
        .build()
        .unwrap();

    let out = graph.result().await.unwrap();
    assert_eq!(out["x"], out["y"]);
    assert_eq!(calls.count(), 1);
}
