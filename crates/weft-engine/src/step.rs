use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use weft_core::context::{current_run, within_operator};
use weft_core::{
    Component, ComponentError, ExecutionContext, Inputs, Outputs, Result, RuntimeExecutionError,
    TransformationType,
};

use crate::evaluator::{bind_run, evaluate, resolve_all};
use crate::node::{Dependency, InputSource, Memo, Node, NodeRef};

/// A panic caught while running component code.
#[derive(Debug, Error)]
#[error("component panicked: {0}")]
struct ComponentPanic(String);

/// A single computation: a component plus the wiring of its inputs.
///
/// A step runs its component at most once. All consumers share the memoized
/// outcome, including failures.
pub struct Step {
    id: Uuid,
    component: Arc<dyn Component>,
    context: ExecutionContext,
    only_plot_outputs: bool,
    inputs: RwLock<HashMap<String, InputSource>>,
    memo: Memo,
}

struct Binding {
    port: String,
    source: NodeRef,
    output: String,
}

impl Step {
    pub fn new(component: Arc<dyn Component>) -> Self {
        Self {
            id: Uuid::new_v4(),
            component,
            context: ExecutionContext::new(TransformationType::Component),
            only_plot_outputs: false,
            inputs: RwLock::new(HashMap::new()),
            memo: Memo::default(),
        }
    }

    pub fn with_transformation(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        self.context = self.context.with_transformation(id, name, tag);
        self
    }

    pub fn with_operator(mut self, hierarchical_id: impl Into<String>, hierarchical_name: impl Into<String>) -> Self {
        self.context = self.context.with_operator(hierarchical_id, hierarchical_name);
        self
    }

    pub fn with_only_plot_outputs(mut self, only_plot_outputs: bool) -> Self {
        self.only_plot_outputs = only_plot_outputs;
        self
    }

    /// Convenience wrapper around [`Node::add_inputs`].
    pub fn add_inputs_from<I, K>(&self, inputs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, InputSource)>,
        K: Into<String>,
    {
        self.add_inputs(inputs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Evaluate this step and everything it depends on.
    pub async fn result(self: &Arc<Self>) -> Result<Arc<Outputs>> {
        let node: NodeRef = self.clone();
        evaluate(&node).await
    }

    fn wired_inputs(&self) -> HashMap<String, InputSource> {
        self.inputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn compute(self: Arc<Self>) -> Result<Arc<Outputs>> {
        let context = self.context.snapshot();
        let span = context.span();
        async move {
            info!("Starting computation");
            let bindings = self.bind_sources(&context)?;
            let values = gather_inputs(bindings, &context).await?;
            let outputs = self.run_component(values, &context).await?;
            Ok::<_, RuntimeExecutionError>(Arc::new(outputs))
        }
        .instrument(span)
        .await
    }

    /// Live sources of all wired inputs, failing if a required one is missing.
    fn bind_sources(&self, context: &ExecutionContext) -> Result<Vec<Binding>> {
        let wired = self.wired_inputs();
        let bindings: Vec<Binding> = wired
            .into_iter()
            .filter_map(|(port, source)| {
                source.node().map(|node| Binding {
                    port,
                    source: node,
                    output: source.output().to_string(),
                })
            })
            .collect();

        let provided: BTreeSet<&str> = bindings.iter().map(|b| b.port.as_str()).collect();
        let required: BTreeSet<&str> = self
            .component
            .required_inputs()
            .iter()
            .map(String::as_str)
            .collect();

        if !required.is_subset(&provided) {
            warn!("Computation node execution failed due to missing input source");
            return Err(RuntimeExecutionError::missing_input_source(format!(
                "Inputs of computation node are missing. Provided inputs are: {:?}. Required params are: {:?}.",
                provided, required
            ))
            .with_context(context));
        }
        Ok(bindings)
    }

    async fn run_component(&self, values: Inputs, context: &ExecutionContext) -> Result<Outputs> {
        let call = within_operator(context.clone(), async move { self.component.call(values).await });
        let outcome = AssertUnwindSafe(call).catch_unwind().await;

        let returned = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => return Err(map_component_error(err, context)),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                warn!(reason = %reason, "Unexpected error from user code.");
                return Err(
                    RuntimeExecutionError::unexpected_component("Unexpected error from user code.")
                        .with_cause(ComponentPanic(reason))
                        .with_context(context),
                );
            }
        };

        match returned {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Outputs::new()),
            other => {
                warn!(returned = %other, "Component did not return an output dict.");
                Err(RuntimeExecutionError::invalid_component_result(
                    "Component did not return an output dict.",
                )
                .with_context(context))
            }
        }
    }
}

fn map_component_error(err: ComponentError, context: &ExecutionContext) -> RuntimeExecutionError {
    match err {
        ComponentError::Raised {
            message,
            error_code,
            extra_information,
        } => {
            warn!(error_code = %error_code, "User raised a component exception");
            RuntimeExecutionError::component(message, error_code, extra_information).with_context(context)
        }
        ComponentError::InputValidation {
            message,
            error_code,
            extra_information,
        } => {
            warn!(error_code = %error_code, "Component rejected its inputs");
            RuntimeExecutionError::component_input_validation(message, error_code, extra_information)
                .with_context(context)
        }
        ComponentError::Runtime(inner) => inner.enrich(context),
        ComponentError::Other(source) => {
            warn!(error = %source, "Unexpected error from user code.");
            RuntimeExecutionError::unexpected_component("Unexpected error from user code.")
                .with_boxed_cause(source.into())
                .with_context(context)
        }
    }
}

/// Resolve the sources of `bindings` and pick the wired output ports.
async fn gather_inputs(bindings: Vec<Binding>, context: &ExecutionContext) -> Result<Inputs> {
    let results = resolve_all(bindings.iter().map(|b| b.source.clone()).collect()).await?;

    let mut values = Inputs::with_capacity(bindings.len());
    for binding in bindings {
        let value = results
            .get(&binding.source.node_id())
            .and_then(|outputs| outputs.get(&binding.output));
        match value {
            Some(value) => {
                values.insert(binding.port, value.clone());
            }
            None => {
                warn!(
                    port = %binding.port,
                    source = %binding.source.context().operator_hierarchical_id,
                    "Execution failed due to missing output of a node"
                );
                return Err(RuntimeExecutionError::missing_output(format!(
                    "Could not obtain output '{}' of operator {} for input '{}'",
                    binding.output,
                    binding.source.context().operator_hierarchical_id,
                    binding.port
                ))
                .with_context(context));
            }
        }
    }
    Ok(values)
}

impl Node for Step {
    fn node_id(&self) -> Uuid {
        self.id
    }

    fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn has_only_plot_outputs(&self) -> bool {
        self.only_plot_outputs
    }

    fn add_inputs(&self, inputs: HashMap<String, InputSource>) -> Result<()> {
        if self.memo.is_started() {
            return Err(RuntimeExecutionError::dag_processing(format!(
                "Inputs of operator {} cannot be changed after its evaluation started",
                self.context.operator_hierarchical_id
            ))
            .with_context(&self.context));
        }
        self.inputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(inputs);
        Ok(())
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.wired_inputs()
            .into_iter()
            .filter_map(|(port, source)| {
                source.node().map(|node| Dependency {
                    port,
                    output: source.output().to_string(),
                    source: node,
                })
            })
            .collect()
    }

    fn resolve(self: Arc<Self>) -> BoxFuture<'static, Result<Arc<Outputs>>> {
        self.memo
            .get_or_start(|| bind_run(current_run(), Arc::clone(&self).compute()))
            .boxed()
    }
}
