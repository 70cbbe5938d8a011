//! Building executable graphs from workflow descriptions.
//!
//! Operator ids and names are hierarchical: each level appends its own id
//! (or name) and [`HIERARCHY_SEPARATOR`], so `\outer\inner\step\` identifies
//! a step nested two workflows deep.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use weft_core::context::UNKNOWN;
use weft_core::{Component, DataType, NamedValue, RuntimeExecutionError, HIERARCHY_SEPARATOR};

use crate::description::{ComponentNode, Connection, SubNode, WorkflowInput, WorkflowNode};
use crate::graph::{ConstantOptions, Graph};
use crate::node::{InputSource, Node, NodeRef};
use crate::step::Step;

#[derive(Debug, Error)]
pub enum ParsingError {
    #[error("The component revision {component_id} referenced in operator \"{operator}\" is not present in the provided components")]
    ComponentDoesNotExist { component_id: String, operator: String },

    #[error("Sub node {sub_node} referenced by {referenced_by} does not exist in workflow {workflow}")]
    NodeDoesNotExist {
        sub_node: String,
        referenced_by: String,
        workflow: String,
    },

    #[error("Invalid connection: {0}")]
    ConnectionInvalid(String),

    #[error("Invalid workflow node: {0}")]
    InvalidWorkflowNode(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeExecutionError),
}

impl ParsingError {
    /// Stable name of the error variant, used in execution reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ComponentDoesNotExist { .. } => "ComponentRevisionDoesNotExist",
            Self::NodeDoesNotExist { .. } => "NodeDoesNotExist",
            Self::ConnectionInvalid(_) => "ConnectionInvalid",
            Self::InvalidWorkflowNode(_) => "InvalidWorkflowNode",
            Self::Runtime(err) => err.kind().as_str(),
        }
    }
}

/// A declared output of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentOutput {
    pub name: String,
    pub data_type: DataType,
}

/// A registered component together with its metadata.
#[derive(Clone)]
pub struct ComponentRevision {
    pub id: String,
    pub name: Option<String>,
    pub tag: String,
    pub outputs: Vec<ComponentOutput>,
    pub component: Arc<dyn Component>,
}

impl ComponentRevision {
    pub fn new(id: impl Into<String>, tag: impl Into<String>, component: Arc<dyn Component>) -> Self {
        Self {
            id: id.into(),
            name: None,
            tag: tag.into(),
            outputs: Vec::new(),
            component,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.outputs.push(ComponentOutput {
            name: name.into(),
            data_type,
        });
        self
    }

    pub fn has_only_plot_outputs(&self) -> bool {
        only_plot_outputs(self.outputs.iter().map(|o| o.data_type))
    }
}

/// Components available to the composer, keyed by component id.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    revisions: HashMap<String, ComponentRevision>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a revision, replacing any previous one with the same id.
    pub fn register(&mut self, revision: ComponentRevision) {
        self.revisions.insert(revision.id.clone(), revision);
    }

    pub fn get(&self, id: &str) -> Option<&ComponentRevision> {
        self.revisions.get(id)
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

/// True for a non-empty list of outputs that are all plots.
pub fn only_plot_outputs(types: impl IntoIterator<Item = DataType>) -> bool {
    let mut any = false;
    for data_type in types {
        if data_type != DataType::PlotlyJson {
            return false;
        }
        any = true;
    }
    any
}

/// Name under which a constant workflow input is wired.
pub fn generated_constant_input_name(input: &WorkflowInput) -> String {
    format!(
        "generated_constant_input_{}_{}",
        input.id_of_sub_node, input.name_in_subnode
    )
}

/// Build the executable graph for `node`.
pub fn parse_workflow(node: &WorkflowNode, registry: &ComponentRegistry) -> Result<Arc<Graph>, ParsingError> {
    parse_workflow_node(node, registry, HIERARCHY_SEPARATOR, HIERARCHY_SEPARATOR)
}

fn parse_component_node(
    node: &ComponentNode,
    registry: &ComponentRegistry,
    name_prefix: &str,
    id_prefix: &str,
) -> Result<NodeRef, ParsingError> {
    let node_name = node.name.as_deref().unwrap_or(UNKNOWN);
    let Some(revision) = registry.get(&node.component_id) else {
        warn!(component_id = %node.component_id, operator = %node_name, "Component revision not found");
        return Err(ParsingError::ComponentDoesNotExist {
            component_id: node.component_id.clone(),
            operator: node_name.to_string(),
        });
    };

    let hierarchical_name = if name_prefix.is_empty() {
        node_name.to_string()
    } else {
        format!("{name_prefix}{node_name}{HIERARCHY_SEPARATOR}")
    };

    let step = Step::new(revision.component.clone())
        .with_transformation(
            revision.id.clone(),
            revision.name.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            revision.tag.clone(),
        )
        .with_operator(format!("{id_prefix}{}{HIERARCHY_SEPARATOR}", node.id), hierarchical_name)
        .with_only_plot_outputs(revision.has_only_plot_outputs());
    Ok(Arc::new(step))
}

fn apply_connections(
    sub_nodes: &BTreeMap<String, NodeRef>,
    connections: &[Connection],
) -> Result<(), ParsingError> {
    for conn in connections {
        let source = sub_nodes.get(&conn.source_id).ok_or_else(|| {
            let msg = format!(
                "Referenced source node {} of a connection could not be found",
                conn.source_id
            );
            warn!("{}", msg);
            ParsingError::ConnectionInvalid(msg)
        })?;
        let target = sub_nodes.get(&conn.target_id).ok_or_else(|| {
            let msg = format!(
                "Referenced target node {} of a connection could not be found",
                conn.target_id
            );
            warn!("{}", msg);
            ParsingError::ConnectionInvalid(msg)
        })?;

        target.add_inputs(HashMap::from([(
            conn.target_input.clone(),
            InputSource::from_ref(source, conn.source_output.clone()),
        )]))?;
    }
    Ok(())
}

fn validate_input(input: &WorkflowInput) -> Result<(), ParsingError> {
    match (&input.name, input.constant) {
        (None, false) => Err(ParsingError::InvalidWorkflowNode(format!(
            "Input {} of sub node {} needs either a name or constant data",
            input.name_in_subnode, input.id_of_sub_node
        ))),
        (Some(name), true) => Err(ParsingError::InvalidWorkflowNode(format!(
            "Input '{}' is named and constant at the same time",
            name
        ))),
        _ => Ok(()),
    }
}

fn parse_workflow_node(
    node: &WorkflowNode,
    registry: &ComponentRegistry,
    name_prefix: &str,
    id_prefix: &str,
) -> Result<Arc<Graph>, ParsingError> {
    let node_name = node.name.as_deref().unwrap_or(UNKNOWN);
    let hierarchical_id = format!("{id_prefix}{}{HIERARCHY_SEPARATOR}", node.id);
    let hierarchical_name = format!("{name_prefix}{node_name}{HIERARCHY_SEPARATOR}");
    debug!(operator_id = %hierarchical_id, "Parsing workflow node");

    let mut sub_nodes: BTreeMap<String, NodeRef> = BTreeMap::new();
    for sub in &node.sub_nodes {
        let parsed: NodeRef = match sub {
            SubNode::Workflow(inner) => {
                parse_workflow_node(inner, registry, &hierarchical_name, &hierarchical_id)?
            }
            SubNode::Component(component) => {
                parse_component_node(component, registry, &hierarchical_name, &hierarchical_id)?
            }
        };
        if sub_nodes.insert(sub.id().to_string(), parsed).is_some() {
            return Err(ParsingError::InvalidWorkflowNode(format!(
                "Sub node id {} occurs more than once in workflow {}",
                sub.id(),
                hierarchical_id
            )));
        }
    }

    apply_connections(&sub_nodes, &node.connections)?;

    let node_exists = |sub_node: &str, referenced_by: &str| {
        if sub_nodes.contains_key(sub_node) {
            Ok(())
        } else {
            Err(ParsingError::NodeDoesNotExist {
                sub_node: sub_node.to_string(),
                referenced_by: referenced_by.to_string(),
                workflow: hierarchical_id.clone(),
            })
        }
    };

    let mut builder = Graph::builder()
        .with_transformation(node.tr_id.clone(), node.tr_name.clone(), node.tr_tag.clone())
        .with_operator(hierarchical_id.clone(), hierarchical_name.clone())
        .with_only_plot_outputs(only_plot_outputs(node.outputs.iter().map(|o| o.data_type)));

    let mut defaults: Vec<NamedValue> = Vec::new();
    let mut constants: Vec<NamedValue> = Vec::new();
    for input in &node.inputs {
        validate_input(input)?;
        let input_name = match &input.name {
            Some(name) => name.clone(),
            None => generated_constant_input_name(input),
        };
        node_exists(&input.id_of_sub_node, &format!("input '{input_name}'"))?;
        builder = builder.input(
            input_name.clone(),
            [(input.id_of_sub_node.clone(), input.name_in_subnode.clone())],
        );

        if input.constant {
            constants.push(NamedValue::new(
                input_name,
                input.constant_value.clone().unwrap_or_default(),
                input.data_type,
            ));
        } else if input.default && !defaults.iter().any(|d| d.name == input_name) {
            defaults.push(NamedValue::new(
                input_name,
                input.default_value.clone().unwrap_or_default(),
                input.data_type,
            ));
        }
    }

    for output in &node.outputs {
        node_exists(&output.id_of_sub_node, &format!("output '{}'", output.name))?;
        builder = builder.output(
            output.name.clone(),
            output.id_of_sub_node.clone(),
            output.name_in_subnode.clone(),
        );
    }

    for (id, sub_node) in sub_nodes {
        builder = builder.member(id, sub_node);
    }
    let graph = builder.build()?;

    graph
        .add_constant_providing_node(&defaults, ConstantOptions::new("workflow_default_values").optional(true))
        .map_err(|e| {
            RuntimeExecutionError::workflow_input_data_validation(
                "Some default values could not be parsed into the respective workflow input datatypes.",
            )
            .with_context(&graph.context().snapshot())
            .with_cause(e)
        })?;

    graph
        .add_constant_providing_node(&constants, ConstantOptions::new("workflow_constant_values"))
        .map_err(|e| {
            RuntimeExecutionError::workflow_input_data_validation(
                "Some constant values could not be parsed into the respective workflow input datatypes.",
            )
            .with_context(&graph.context().snapshot())
            .with_cause(e)
        })?;

    Ok(graph)
}
