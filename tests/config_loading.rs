use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use weft::{run, ExecutionConfig, Graph, NodeRef, Step};
use weft_test_utils::{counting_component, CallCounter};

fn load(toml_content: &str) -> ExecutionConfig {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");
    ExecutionConfig::load(tmp.path()).expect("load config")
}

fn plot_graph(calls: &CallCounter) -> NodeRef {
    let plot = Arc::new(
        Step::new(counting_component(calls, Vec::<String>::new(), json!({"fig": {"data": []}})))
            .with_operator("\\wf\\plot\\", "Plot")
            .with_only_plot_outputs(true),
    );
    Graph::builder()
        .with_operator("\\wf\\", "wf")
        .member("plot", plot)
        .output("figure", "plot", "fig")
        .build()
        .expect("valid graph")
}

#[test]
fn test_load_full_config_from_file() {
    let config = load(
        r#"
run_pure_plot_operators = true
return_individual_node_results = true
adapter_timeout_secs = 15

[adapter_settings]
blob_store = "s3://bucket/prefix"
"#,
    );

    assert!(config.run_pure_plot_operators);
    assert!(config.return_individual_node_results);
    assert_eq!(config.adapter_timeout_secs, Some(15));
    assert_eq!(config.adapter_settings["blob_store"], "s3://bucket/prefix");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("WEFT_TEST_BLOB_STORE", "file:///tmp/weft");

    let config = load(
        r#"
[adapter_settings]
blob_store = "${WEFT_TEST_BLOB_STORE}"
"#,
    );
    assert_eq!(config.adapter_settings["blob_store"], "file:///tmp/weft");

    std::env::remove_var("WEFT_TEST_BLOB_STORE");
}

#[tokio::test]
async fn test_loaded_config_skips_plot_operators() {
    let calls = CallCounter::new();
    let graph = plot_graph(&calls);

    let outputs = run(&graph, Uuid::new_v4(), load("")).await.unwrap();
    assert_eq!(outputs["figure"], json!({}));
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn test_loaded_config_runs_plot_operators() {
    let calls = CallCounter::new();
    let graph = plot_graph(&calls);

    let outputs = run(&graph, Uuid::new_v4(), load("run_pure_plot_operators = true"))
        .await
        .unwrap();
    assert_eq!(outputs["figure"], json!({"data": []}));
    assert_eq!(calls.count(), 1);
}
