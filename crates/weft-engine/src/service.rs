//! Executing a workflow description end to end.
//!
//! [`execute`] never fails: every error is reported in the returned
//! [`WorkflowExecutionResult`] together with the stage it happened in.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use weft_core::context::{current_config, within_run};
use weft_core::types::validate_output;
use weft_core::{
    ErrorCode, ExecutionConfig, ExecutionContext, NamedValue, Outputs, Result, RunScope,
    RuntimeExecutionError,
};

use crate::compose::{parse_workflow, ComponentRegistry, ParsingError};
use crate::description::WorkflowNode;
use crate::evaluator::{check_for_cycles_all, evaluate, resolve_all};
use crate::graph::ConstantOptions;
use crate::node::{Node, NodeRef};
use crate::run::all_steps;

/// A request to execute a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionInput {
    pub workflow: WorkflowNode,
    #[serde(default = "Uuid::new_v4")]
    pub job_id: Uuid,
    #[serde(default)]
    pub configuration: ExecutionConfig,
    /// Already loaded values for the dynamic workflow inputs, by input name.
    #[serde(default)]
    pub input_data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStage {
    ParsingWorkflow,
    ParsingLoadedData,
    ExecutingComponentCode,
    ValidatingOutputs,
}

impl ProcessStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParsingWorkflow => "PARSING_WORKFLOW",
            Self::ParsingLoadedData => "PARSING_LOADED_DATA",
            Self::ExecutingComponentCode => "EXECUTING_COMPONENT_CODE",
            Self::ValidatingOutputs => "VALIDATING_OUTPUTS",
        }
    }
}

/// Wall-clock timing of one part of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuredStep {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl MeasuredStep {
    pub fn begin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Utc::now(),
            end: None,
            duration_ms: None,
        }
    }

    pub fn stop(&mut self) {
        let end = Utc::now();
        self.end = Some(end);
        self.duration_ms = Some((end - self.start).num_milliseconds());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Failure,
}

/// Serializable summary of a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub process_stage: ProcessStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_information: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub job_id: Uuid,
}

impl ErrorReport {
    pub fn from_runtime(err: &RuntimeExecutionError, process_stage: ProcessStage, job_id: Uuid) -> Self {
        Self {
            kind: err.kind().as_str().to_string(),
            message: err.message().to_string(),
            process_stage,
            error_code: err.error_code().cloned(),
            extra_information: err.extra_information().cloned(),
            context: err.context().cloned(),
            cause: err.cause().map(|c| c.to_string()),
            job_id,
        }
    }

    pub fn from_parsing(err: &ParsingError, process_stage: ProcessStage, job_id: Uuid) -> Self {
        match err {
            ParsingError::Runtime(inner) => Self::from_runtime(inner, process_stage, job_id),
            other => Self {
                kind: other.kind_name().to_string(),
                message: other.to_string(),
                process_stage,
                error_code: None,
                extra_information: None,
                context: None,
                cause: None,
                job_id,
            },
        }
    }
}

/// Outcome of [`execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub result: ExecutionStatus,
    #[serde(default)]
    pub output_results_by_output_name: HashMap<String, Value>,
    /// Outputs of every step by hierarchical operator id, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_results: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(default)]
    pub measured_steps: Vec<MeasuredStep>,
    pub job_id: Uuid,
}

impl WorkflowExecutionResult {
    fn failure(error: ErrorReport, measured_steps: Vec<MeasuredStep>) -> Self {
        Self {
            result: ExecutionStatus::Failure,
            output_results_by_output_name: HashMap::new(),
            node_results: None,
            job_id: error.job_id,
            error: Some(error),
            measured_steps,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == ExecutionStatus::Ok
    }
}

/// Parse, feed, run and validate the workflow in `input`.
pub async fn execute(input: WorkflowExecutionInput, registry: &ComponentRegistry) -> WorkflowExecutionResult {
    let job_id = input.job_id;
    let scope = RunScope::new(job_id, input.configuration.clone());
    within_run(scope, execute_in_run(input, registry))
        .instrument(info_span!("execute", job_id = %job_id))
        .await
}

async fn execute_in_run(input: WorkflowExecutionInput, registry: &ComponentRegistry) -> WorkflowExecutionResult {
    let job_id = input.job_id;
    let mut timings = Timings::default();
    info!(workflow = %input.workflow.tr_name, "Starting workflow execution");

    let stage = ProcessStage::ParsingWorkflow;
    timings.begin(stage);
    let graph = match parse_workflow(&input.workflow, registry) {
        Ok(graph) => graph,
        Err(err) => {
            info!(error = %err, "Workflow parsing failed");
            return timings.failure(ErrorReport::from_parsing(&err, stage, job_id));
        }
    };

    let stage = ProcessStage::ParsingLoadedData;
    timings.begin(stage);
    if let Err(err) = provide_input_data(&graph, &input) {
        info!(error = %err, "Input data could not be provided");
        return timings.failure(ErrorReport::from_runtime(&err, stage, job_id));
    }

    let stage = ProcessStage::ExecutingComponentCode;
    timings.begin(stage);
    let root: NodeRef = graph.clone();
    let (outputs, node_results) = match run_all(&root).await {
        Ok(done) => done,
        Err(err) => {
            info!(error = %err, "Workflow execution failed");
            return timings.failure(ErrorReport::from_runtime(&err, stage, job_id));
        }
    };

    let stage = ProcessStage::ValidatingOutputs;
    timings.begin(stage);
    let mut validated = HashMap::with_capacity(outputs.len());
    for declared in &input.workflow.outputs {
        let value = outputs.get(&declared.name).cloned().unwrap_or(Value::Null);
        match validate_output(&declared.name, declared.data_type, &value) {
            Ok(value) => {
                validated.insert(declared.name.clone(), value);
            }
            Err(err) => {
                let err = err.with_context(&root.context().snapshot());
                info!(error = %err, "Workflow output validation failed");
                return timings.failure(ErrorReport::from_runtime(&err, stage, job_id));
            }
        }
    }

    info!(outputs = validated.len(), "Workflow execution finished");
    WorkflowExecutionResult {
        result: ExecutionStatus::Ok,
        output_results_by_output_name: validated,
        node_results,
        error: None,
        measured_steps: timings.finish(),
        job_id,
    }
}

/// Stage timings of one execution plus the overall `RUNTIME_SERVICE` total.
struct Timings {
    total: MeasuredStep,
    current: Option<MeasuredStep>,
    done: Vec<MeasuredStep>,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            total: MeasuredStep::begin("RUNTIME_SERVICE"),
            current: None,
            done: Vec::new(),
        }
    }
}

impl Timings {
    /// Stop the running stage, if any, and start measuring `stage`.
    fn begin(&mut self, stage: ProcessStage) {
        self.stop_current();
        self.current = Some(MeasuredStep::begin(stage.as_str()));
    }

    fn stop_current(&mut self) {
        if let Some(mut step) = self.current.take() {
            step.stop();
            self.done.push(step);
        }
    }

    fn finish(mut self) -> Vec<MeasuredStep> {
        self.stop_current();
        self.total.stop();
        self.done.push(self.total);
        self.done
    }

    fn failure(self, error: ErrorReport) -> WorkflowExecutionResult {
        WorkflowExecutionResult::failure(error, self.finish())
    }
}

/// Wire the loaded input data to the dynamic inputs of `graph`.
fn provide_input_data(graph: &Arc<crate::graph::Graph>, input: &WorkflowExecutionInput) -> Result<()> {
    let declared: HashMap<&str, _> = input
        .workflow
        .inputs
        .iter()
        .filter_map(|inp| inp.name.as_deref().map(|name| (name, inp.data_type)))
        .collect();

    let mut values = Vec::with_capacity(input.input_data.len());
    for (name, value) in &input.input_data {
        let Some(data_type) = declared.get(name.as_str()) else {
            return Err(RuntimeExecutionError::workflow_input_data_validation(format!(
                "Data was provided for '{}' which is not an input of the workflow",
                name
            ))
            .with_context(&graph.context().snapshot()));
        };
        values.push(NamedValue::new(name.clone(), value.clone(), *data_type));
    }
    graph.add_constant_providing_node(&values, ConstantOptions::new("dynamic_data"))
}

/// Evaluate `root`, then make sure every step ran once, including steps that
/// feed no workflow output.
async fn run_all(root: &NodeRef) -> Result<(Arc<Outputs>, Option<BTreeMap<String, Value>>)> {
    let outputs = evaluate(root).await?;

    let config = current_config();
    let skipped = |node: &NodeRef| node.has_only_plot_outputs() && !config.run_pure_plot_operators;
    let steps = all_steps(root);
    let runnable: Vec<NodeRef> = steps.iter().filter(|s| !skipped(*s)).cloned().collect();
    check_for_cycles_all(&runnable)?;
    let results = resolve_all(runnable).await?;

    let node_results = if config.return_individual_node_results {
        let collected = steps
            .iter()
            .map(|step| {
                let value = results
                    .get(&step.node_id())
                    .map(|outputs| Value::Object(outputs.as_ref().clone().into_iter().collect()))
                    .unwrap_or_else(|| Value::Object(Default::default()));
                (step.context().operator_hierarchical_id.clone(), value)
            })
            .collect();
        Some(collected)
    } else {
        None
    };

    Ok((outputs, node_results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::DataType;
    use weft_test_utils::{counting_component, failing_component, sum_component, CallCounter};

    use crate::compose::ComponentRevision;

    fn registry(sink_calls: &CallCounter) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(ComponentRevision::new("add", "1", sum_component()).with_output("sum", DataType::Float));
        registry.register(ComponentRevision::new("sink", "1", counting_component(sink_calls, ["v"], json!(null))));
        registry.register(ComponentRevision::new("fail", "1", failing_component("bad input", ErrorCode::Number(17))));
        registry
    }

    fn workflow(extra: Value) -> WorkflowNode {
        let mut base = json!({
            "id": "wf",
            "name": "wf",
            "tr_id": "tr",
            "tr_name": "Test workflow",
            "tr_tag": "1.0.0",
            "sub_nodes": [
                {"kind": "component", "id": "s", "name": "S", "component_id": "add"},
                {"kind": "component", "id": "k", "name": "K", "component_id": "sink"}
            ],
            "connections": [
                {"source_id": "s", "source_output": "sum", "target_id": "k", "target_input": "v"}
            ],
            "inputs": [
                {"name": "x", "id_of_sub_node": "s", "name_in_subnode": "c", "type": "FLOAT"},
                {"name": "y", "id_of_sub_node": "s", "name_in_subnode": "d", "type": "FLOAT"}
            ],
            "outputs": [{"name": "r", "id_of_sub_node": "s", "name_in_subnode": "sum", "type": "FLOAT"}]
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    fn request(workflow: WorkflowNode, data: Value) -> WorkflowExecutionInput {
        WorkflowExecutionInput {
            workflow,
            job_id: Uuid::new_v4(),
            configuration: ExecutionConfig::default(),
            input_data: serde_json::from_value(data).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_successful_execution_runs_sinks() {
        let sink_calls = CallCounter::new();
        let mut input = request(workflow(json!({})), json!({"x": 1.5, "y": "2.5"}));
        input.configuration.return_individual_node_results = true;

        let result = execute(input, &registry(&sink_calls)).await;
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(result.output_results_by_output_name["r"], json!(4.0));
        assert_eq!(sink_calls.count(), 1);

        let node_results = result.node_results.unwrap();
        assert_eq!(node_results["\\wf\\s\\"], json!({"sum": 4.0}));
        assert!(result.measured_steps.iter().any(|s| s.name == "EXECUTING_COMPONENT_CODE"));
    }

    #[tokio::test]
    async fn test_every_stage_is_measured() {
        let sink_calls = CallCounter::new();
        let result = execute(
            request(workflow(json!({})), json!({"x": 1.5, "y": 2.5})),
            &registry(&sink_calls),
        )
        .await;
        let names: Vec<&str> = result.measured_steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "PARSING_WORKFLOW",
                "PARSING_LOADED_DATA",
                "EXECUTING_COMPONENT_CODE",
                "VALIDATING_OUTPUTS",
                "RUNTIME_SERVICE"
            ]
        );
        assert!(result.measured_steps.iter().all(|s| s.end.is_some() && s.duration_ms.is_some()));
    }

    #[tokio::test]
    async fn test_failed_run_keeps_timings() {
        let sink_calls = CallCounter::new();
        let result = execute(
            request(workflow(json!({})), json!({"x": "one", "y": 2})),
            &registry(&sink_calls),
        )
        .await;
        assert!(!result.is_ok());
        let names: Vec<&str> = result.measured_steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["PARSING_WORKFLOW", "PARSING_LOADED_DATA", "RUNTIME_SERVICE"]);
    }

    #[tokio::test]
    async fn test_parsing_failure_is_reported() {
        let sink_calls = CallCounter::new();
        let wf = workflow(json!({
            "sub_nodes": [{"kind": "component", "id": "s", "component_id": "unknown"}]
        }));
        let result = execute(request(wf, json!({})), &registry(&sink_calls)).await;
        let error = result.error.unwrap();
        assert_eq!(error.process_stage, ProcessStage::ParsingWorkflow);
        assert_eq!(error.kind, "ComponentRevisionDoesNotExist");
    }

    #[tokio::test]
    async fn test_bad_input_data_is_reported() {
        let sink_calls = CallCounter::new();
        let result = execute(
            request(workflow(json!({})), json!({"x": "one", "y": 2})),
            &registry(&sink_calls),
        )
        .await;
        let error = result.error.unwrap();
        assert_eq!(error.process_stage, ProcessStage::ParsingLoadedData);
        assert_eq!(error.kind, "WorkflowInputDataValidationError");
    }

    #[tokio::test]
    async fn test_missing_input_data() {
        let sink_calls = CallCounter::new();
        let result = execute(request(workflow(json!({})), json!({"x": 1})), &registry(&sink_calls)).await;
        let error = result.error.unwrap();
        assert_eq!(error.process_stage, ProcessStage::ExecutingComponentCode);
        assert_eq!(error.kind, "MissingInputSource");
        assert_eq!(sink_calls.count(), 0);
    }

    #[tokio::test]
    async fn test_component_failure_carries_code_and_job_id() {
        let sink_calls = CallCounter::new();
        let wf = workflow(json!({
            "sub_nodes": [{"kind": "component", "id": "f", "name": "F", "component_id": "fail"}],
            "connections": [],
            "inputs": [],
            "outputs": [{"name": "r", "id_of_sub_node": "f", "name_in_subnode": "r", "type": "FLOAT"}]
        }));
        let input = request(wf, json!({}));
        let job_id = input.job_id;

        let result = execute(input, &registry(&sink_calls)).await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, "ComponentException");
        assert_eq!(error.error_code, Some(ErrorCode::Number(17)));
        let context = error.context.unwrap();
        assert_eq!(context.operator_hierarchical_id, "\\wf\\f\\");
        assert_eq!(context.job_id, Some(job_id));
        assert_eq!(error.job_id, job_id);
    }

    #[tokio::test]
    async fn test_unparsable_constant_reports_job_id() {
        let sink_calls = CallCounter::new();
        let wf = workflow(json!({
            "inputs": [
                {"name": "x", "id_of_sub_node": "s", "name_in_subnode": "c", "type": "FLOAT"},
                {"id_of_sub_node": "s", "name_in_subnode": "d", "type": "FLOAT",
                 "constant": true, "constant_value": "not a number"}
            ]
        }));
        let input = request(wf, json!({"x": 1.0}));
        let job_id = input.job_id;

        let result = execute(input, &registry(&sink_calls)).await;
        let error = result.error.unwrap();
        assert_eq!(error.process_stage, ProcessStage::ParsingWorkflow);
        assert_eq!(error.kind, "WorkflowInputDataValidationError");
        let context = error.context.unwrap();
        assert_eq!(context.operator_hierarchical_id, "\\wf\\");
        assert_eq!(context.job_id, Some(job_id));
    }

    #[tokio::test]
    async fn test_output_type_is_validated() {
        let sink_calls = CallCounter::new();
        let wf = workflow(json!({
            "outputs": [{"name": "r", "id_of_sub_node": "s", "name_in_subnode": "sum", "type": "BOOLEAN"}]
        }));
        let result = execute(request(wf, json!({"x": 1.5, "y": 2.0})), &registry(&sink_calls)).await;
        let error = result.error.unwrap();
        assert_eq!(error.process_stage, ProcessStage::ValidatingOutputs);
        assert_eq!(error.kind, "WorkflowOutputValidationError");
    }

    #[test]
    fn test_result_serializes() {
        let result = WorkflowExecutionResult {
            result: ExecutionStatus::Ok,
            output_results_by_output_name: HashMap::from([("r".to_string(), json!(1))]),
            node_results: None,
            error: None,
            measured_steps: vec![],
            job_id: Uuid::nil(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["result"], "ok");
        assert!(value.get("error").is_none());
    }
}
