pub mod compose;
pub mod constant;
pub mod description;
pub mod evaluator;
pub mod graph;
pub mod node;
pub mod run;
pub mod service;
pub mod step;

pub use compose::{parse_workflow, ComponentRegistry, ComponentRevision, ParsingError};
pub use constant::{constant_step, ConstantComponent};
pub use description::{ComponentNode, Connection, SubNode, WorkflowInput, WorkflowNode, WorkflowOutput};
pub use evaluator::{check_for_cycles, check_for_cycles_all, evaluate};
pub use graph::{ConstantOptions, Graph, GraphBuilder};
pub use node::{Dependency, InputSource, Node, NodeRef};
pub use run::{all_steps, run};
pub use service::{
    execute, ErrorReport, ExecutionStatus, MeasuredStep, ProcessStage, WorkflowExecutionInput,
    WorkflowExecutionResult,
};
pub use step::Step;
