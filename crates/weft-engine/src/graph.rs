use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use weft_core::context::{current_config, current_run};
use weft_core::types::parse_named_values;
use weft_core::{
    ExecutionContext, NamedValue, Outputs, Result, RuntimeExecutionError, TransformationType,
    HIERARCHY_SEPARATOR,
};

use crate::constant::constant_step;
use crate::evaluator::{bind_run, evaluate, resolve_all};
use crate::node::{Dependency, InputSource, Memo, Node, NodeRef};

/// A member input port fed by a graph input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDestination {
    pub member: String,
    pub port: String,
}

/// The member output port exposed as a graph output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSource {
    pub member: String,
    pub port: String,
}

/// Options for [`Graph::add_constant_providing_node`].
#[derive(Debug, Clone, Default)]
pub struct ConstantOptions {
    /// Accept `null` for every value.
    pub optional: bool,
    /// Distinguishes the generated provider in operator ids and logs.
    pub id_suffix: String,
}

impl ConstantOptions {
    pub fn new(id_suffix: impl Into<String>) -> Self {
        Self {
            optional: false,
            id_suffix: id_suffix.into(),
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// A workflow: member nodes plus the mapping of its own inputs and outputs
/// onto member ports.
///
/// Graph inputs are forwarded to the member ports they map to as soon as
/// they are wired, so members read their sources directly. Evaluating a graph
/// resolves exactly the members its outputs are mapped from.
pub struct Graph {
    id: Uuid,
    context: ExecutionContext,
    only_plot_outputs: bool,
    members: BTreeMap<String, NodeRef>,
    providers: Mutex<Vec<NodeRef>>,
    input_mappings: BTreeMap<String, Vec<InputDestination>>,
    output_mappings: BTreeMap<String, OutputSource>,
    inputs: RwLock<HashMap<String, InputSource>>,
    memo: Memo,
}

/// Builder for [`Graph`]; validates member references on [`build`](Self::build).
pub struct GraphBuilder {
    context: ExecutionContext,
    only_plot_outputs: bool,
    members: Vec<(String, NodeRef)>,
    input_mappings: BTreeMap<String, Vec<InputDestination>>,
    output_mappings: BTreeMap<String, OutputSource>,
}

impl GraphBuilder {
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

    pub fn member(mut self, id: impl Into<String>, node: NodeRef) -> Self {
        self.members.push((id.into(), node));
        self
    }

    /// Map graph input `name` to member ports. May be called repeatedly for
    /// the same name; an empty destination list declares an unused input.
    pub fn input<I, M, P>(mut self, name: impl Into<String>, destinations: I) -> Self
    where
        I: IntoIterator<Item = (M, P)>,
        M: Into<String>,
        P: Into<String>,
    {
        self.input_mappings
            .entry(name.into())
            .or_default()
            .extend(destinations.into_iter().map(|(member, port)| InputDestination {
                member: member.into(),
                port: port.into(),
            }));
        self
    }

    pub fn output(mut self, name: impl Into<String>, member: impl Into<String>, port: impl Into<String>) -> Self {
        self.output_mappings.insert(
            name.into(),
            OutputSource {
                member: member.into(),
                port: port.into(),
            },
        );
        self
    }

    pub fn build(self) -> Result<Arc<Graph>> {
        let mut members = BTreeMap::new();
        for (id, node) in self.members {
            if members.insert(id.clone(), node).is_some() {
                return Err(RuntimeExecutionError::dag_processing(format!(
                    "Duplicate member id '{}' in workflow {}",
                    id, self.context.operator_hierarchical_id
                ))
                .with_context(&self.context));
            }
        }

        for (name, destinations) in &self.input_mappings {
            if let Some(dest) = destinations.iter().find(|d| !members.contains_key(&d.member)) {
                return Err(RuntimeExecutionError::missing_input_source(format!(
                    "Workflow input '{}' is mapped to input '{}' of unknown member '{}'",
                    name, dest.port, dest.member
                ))
                .with_context(&self.context));
            }
        }

        for (name, source) in &self.output_mappings {
            if !members.contains_key(&source.member) {
                return Err(RuntimeExecutionError::missing_output(format!(
                    "Workflow output '{}' is mapped from output '{}' of unknown member '{}'",
                    name, source.port, source.member
                ))
                .with_context(&self.context));
            }
        }

        Ok(Arc::new(Graph {
            id: Uuid::new_v4(),
            context: self.context,
            only_plot_outputs: self.only_plot_outputs,
            members,
            providers: Mutex::new(Vec::new()),
            input_mappings: self.input_mappings,
            output_mappings: self.output_mappings,
            inputs: RwLock::new(HashMap::new()),
            memo: Memo::default(),
        }))
    }
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder {
            context: ExecutionContext::new(TransformationType::Workflow),
            only_plot_outputs: false,
            members: Vec::new(),
            input_mappings: BTreeMap::new(),
            output_mappings: BTreeMap::new(),
        }
    }

    pub fn member(&self, id: &str) -> Option<&NodeRef> {
        self.members.get(id)
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.input_mappings.keys().map(String::as_str)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.output_mappings.keys().map(String::as_str)
    }

    /// Convenience wrapper around [`Node::add_inputs`].
    pub fn add_inputs_from<I, K>(&self, inputs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, InputSource)>,
        K: Into<String>,
    {
        self.add_inputs(inputs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Provide fixed values for graph inputs.
    ///
    /// The values are parsed according to their declared types and served by
    /// a new provider step owned by this graph. Each value is wired to the
    /// graph input of the same name, replacing any earlier wiring.
    pub fn add_constant_providing_node(&self, values: &[NamedValue], options: ConstantOptions) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let parsed = parse_named_values(values, options.optional).map_err(|e| e.enrich(&self.context))?;
        let names: Vec<String> = parsed.keys().cloned().collect();

        let provider_id = format!(
            "{}constant_provider_{}{}",
            self.context.operator_hierarchical_id, options.id_suffix, HIERARCHY_SEPARATOR
        );
        let provider_name = format!(
            "{}constant_provider_{}{}",
            self.context.operator_hierarchical_name, options.id_suffix, HIERARCHY_SEPARATOR
        );
        let provider = constant_step(parsed, provider_id, provider_name);

        self.add_inputs(
            names
                .into_iter()
                .map(|name| {
                    let source = InputSource::new(&provider, name.clone());
                    (name, source)
                })
                .collect(),
        )?;

        info!(
            operator_id = %self.context.operator_hierarchical_id,
            id_suffix = %options.id_suffix,
            count = values.len(),
            "Added constant providing node"
        );
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(provider);
        Ok(())
    }

    /// Evaluate this graph and everything it depends on.
    pub async fn result(self: &Arc<Self>) -> Result<Arc<Outputs>> {
        let node: NodeRef = self.clone();
        evaluate(&node).await
    }

    fn member_or_err(&self, id: &str) -> Result<&NodeRef> {
        self.members.get(id).ok_or_else(|| {
            RuntimeExecutionError::dag_processing(format!("Unknown member '{}'", id)).with_context(&self.context)
        })
    }

    /// Every mapped graph input must have a live source.
    fn check_inputs(&self, context: &ExecutionContext) -> Result<()> {
        let inputs = self.inputs.read().unwrap_or_else(PoisonError::into_inner);
        for (name, destinations) in &self.input_mappings {
            let Some(dest) = destinations.first() else {
                continue;
            };
            if inputs.get(name).and_then(InputSource::node).is_some() {
                continue;
            }
            let mut wired: Vec<&str> = inputs.keys().map(String::as_str).collect();
            wired.sort_unstable();
            let member_id = self
                .members
                .get(&dest.member)
                .map(|m| m.context().operator_hierarchical_id.clone())
                .unwrap_or_else(|| dest.member.clone());
            warn!(input = %name, "Workflow input has no source");
            return Err(RuntimeExecutionError::missing_input_source(format!(
                "The input mapping with workflow input '{}' to subnode input '{}' of subnode '{}' does not match the inputs of the workflow '{}'.",
                name,
                dest.port,
                member_id,
                wired.join("', '")
            ))
            .with_context(context));
        }
        Ok(())
    }

    async fn compute(self: Arc<Self>) -> Result<Arc<Outputs>> {
        let context = self.context.snapshot();
        let span = context.span();
        async move {
            self.check_inputs(&context)?;
            info!("Starting computation");

            let config = current_config();
            let skipped = |member: &NodeRef| member.has_only_plot_outputs() && !config.run_pure_plot_operators;

            let mut needed = Vec::new();
            for source in self.output_mappings.values() {
                let member = self.member_or_err(&source.member)?;
                if !skipped(member) {
                    needed.push(member.clone());
                }
            }
            let results = resolve_all(needed).await?;

            let mut outputs = Outputs::with_capacity(self.output_mappings.len());
            for (name, source) in &self.output_mappings {
                let member = self.member_or_err(&source.member)?;
                if skipped(member) {
                    outputs.insert(name.clone(), json!({}));
                    continue;
                }
                let value: Option<&Value> = results
                    .get(&member.node_id())
                    .and_then(|member_outputs| member_outputs.get(&source.port));
                match value {
                    Some(value) => {
                        outputs.insert(name.clone(), value.clone());
                    }
                    None => {
                        let msg = format!(
                            "Declared output '{}' not contained in returned dictionary.",
                            source.port
                        );
                        warn!(member = %member.context().operator_hierarchical_id, "{}", msg);
                        return Err(RuntimeExecutionError::missing_output(msg)
                            .with_context(&member.context().snapshot()));
                    }
                }
            }
            Ok::<_, RuntimeExecutionError>(Arc::new(outputs))
        }
        .instrument(span)
        .await
    }
}

impl Node for Graph {
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
                "Inputs of workflow {} cannot be changed after its evaluation started",
                self.context.operator_hierarchical_id
            ))
            .with_context(&self.context));
        }
        if let Some(unknown) = inputs.keys().find(|name| !self.input_mappings.contains_key(*name)) {
            warn!(input = %unknown, "Unknown workflow input");
            return Err(RuntimeExecutionError::missing_input_source(format!(
                "Workflow {} has no input named '{}'",
                self.context.operator_hierarchical_id, unknown
            ))
            .with_context(&self.context));
        }

        for (name, source) in &inputs {
            for dest in self.input_mappings.get(name).into_iter().flatten() {
                let member = self.member_or_err(&dest.member)?;
                member.add_inputs(HashMap::from([(dest.port.clone(), source.clone())]))?;
            }
        }
        self.inputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(inputs);
        Ok(())
    }

    fn dependencies(&self) -> Vec<Dependency> {
        let mut seen = HashSet::new();
        let mut deps = Vec::new();
        for (name, source) in &self.output_mappings {
            if let Some(member) = self.members.get(&source.member) {
                if seen.insert((source.member.as_str(), source.port.as_str())) {
                    deps.push(Dependency {
                        port: name.clone(),
                        source: member.clone(),
                        output: source.port.clone(),
                    });
                }
            }
        }
        deps
    }

    fn members(&self) -> Vec<NodeRef> {
        let mut all: Vec<NodeRef> = self.members.values().cloned().collect();
        all.extend(
            self.providers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned(),
        );
        all
    }

    fn resolve(self: Arc<Self>) -> BoxFuture<'static, Result<Arc<Outputs>>> {
        self.memo
            .get_or_start(|| bind_run(current_run(), Arc::clone(&self).compute()))
            .boxed()
    }
}
