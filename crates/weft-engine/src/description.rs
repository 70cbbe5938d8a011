//! Serializable description of a workflow tree, as handed to
//! [`parse_workflow`](crate::compose::parse_workflow).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::DataType;

/// A workflow and everything nested in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Id of this node within its parent workflow.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Transformation revision this workflow was built from.
    pub tr_id: String,
    pub tr_name: String,
    pub tr_tag: String,
    #[serde(default)]
    pub sub_nodes: Vec<SubNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    #[serde(default)]
    pub outputs: Vec<WorkflowOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubNode {
    Component(ComponentNode),
    Workflow(WorkflowNode),
}

impl SubNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Component(node) => &node.id,
            Self::Workflow(node) => &node.id,
        }
    }
}

/// An operator running a registered component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Key of the component in the registry.
    pub component_id: String,
}

/// Feeds `target_input` of sub node `target_id` from `source_output` of sub
/// node `source_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source_id: String,
    pub source_output: String,
    pub target_id: String,
    pub target_input: String,
}

/// A sub node input exposed by the workflow.
///
/// Dynamic inputs have a name and are supplied from outside. Constant inputs
/// carry their value and must not have a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInput {
    #[serde(default)]
    pub name: Option<String>,
    pub id_of_sub_node: String,
    pub name_in_subnode: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub constant: bool,
    #[serde(default)]
    pub constant_value: Option<Value>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
}

/// A sub node output exposed by the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub name: String,
    pub id_of_sub_node: String,
    pub name_in_subnode: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}
