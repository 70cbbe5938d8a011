//! Ambient execution context.
//!
//! Two task-local slots describe what is currently running: the run scope
//! (job id and configuration, bound once per top-level run) and the operator
//! context (bound by a step around its component invocation). Both are
//! task-local, so concurrently running evaluations never see each other's
//! values. Spawned tasks do not inherit task-locals; the engine re-binds the
//! run scope in every task it spawns.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ExecutionConfig;

/// Separator between the levels of hierarchical operator ids and names.
pub const HIERARCHY_SEPARATOR: &str = "\\";

/// Placeholder for identity fields that were not provided.
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationType {
    Component,
    Workflow,
}

/// Identity of the operator that is (or was) executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub transformation_id: String,
    pub transformation_name: String,
    pub transformation_tag: String,
    pub transformation_type: TransformationType,
    pub operator_hierarchical_id: String,
    pub operator_hierarchical_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl ExecutionContext {
    pub fn new(transformation_type: TransformationType) -> Self {
        Self {
            transformation_id: UNKNOWN.to_string(),
            transformation_name: UNKNOWN.to_string(),
            transformation_tag: UNKNOWN.to_string(),
            transformation_type,
            operator_hierarchical_id: UNKNOWN.to_string(),
            operator_hierarchical_name: UNKNOWN.to_string(),
            job_id: None,
        }
    }

    pub fn with_transformation(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        self.transformation_id = id.into();
        self.transformation_name = name.into();
        self.transformation_tag = tag.into();
        self
    }

    pub fn with_operator(mut self, hierarchical_id: impl Into<String>, hierarchical_name: impl Into<String>) -> Self {
        self.operator_hierarchical_id = hierarchical_id.into();
        self.operator_hierarchical_name = hierarchical_name.into();
        self
    }

    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// This context with the job id of the current run, if any.
    pub fn snapshot(&self) -> Self {
        let mut snapshot = self.clone();
        if snapshot.job_id.is_none() {
            snapshot.job_id = current_job_id();
        }
        snapshot
    }

    /// A tracing span carrying this identity, used to correlate log lines.
    pub fn span(&self) -> tracing::Span {
        let job_id = self
            .job_id
            .or_else(current_job_id)
            .map(|id| id.to_string())
            .unwrap_or_default();
        match self.transformation_type {
            TransformationType::Component => tracing::info_span!(
                "step",
                transformation_id = %self.transformation_id,
                transformation_name = %self.transformation_name,
                operator_id = %self.operator_hierarchical_id,
                operator_name = %self.operator_hierarchical_name,
                job_id = %job_id,
            ),
            TransformationType::Workflow => tracing::info_span!(
                "workflow",
                transformation_id = %self.transformation_id,
                transformation_name = %self.transformation_name,
                operator_id = %self.operator_hierarchical_id,
                operator_name = %self.operator_hierarchical_name,
                job_id = %job_id,
            ),
        }
    }
}

/// State bound once per top-level run.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub job_id: Uuid,
    pub config: Arc<ExecutionConfig>,
}

impl RunScope {
    pub fn new(job_id: Uuid, config: ExecutionConfig) -> Self {
        Self {
            job_id,
            config: Arc::new(config),
        }
    }
}

tokio::task_local! {
    static CURRENT_RUN: RunScope;
    static CURRENT_OPERATOR: ExecutionContext;
}

/// Run `fut` with `scope` bound as the current run.
pub fn within_run<F: Future>(scope: RunScope, fut: F) -> impl Future<Output = F::Output> {
    CURRENT_RUN.scope(scope, fut)
}

/// Run `fut` with `context` bound as the currently executing operator.
///
/// The previous binding is visible again once `fut` completes.
pub fn within_operator<F: Future>(context: ExecutionContext, fut: F) -> impl Future<Output = F::Output> {
    CURRENT_OPERATOR.scope(context, fut)
}

pub fn current_run() -> Option<RunScope> {
    CURRENT_RUN.try_with(|scope| scope.clone()).ok()
}

pub fn current_job_id() -> Option<Uuid> {
    CURRENT_RUN.try_with(|scope| scope.job_id).ok()
}

/// Configuration of the current run, or the defaults outside of a run.
pub fn current_config() -> Arc<ExecutionConfig> {
    CURRENT_RUN
        .try_with(|scope| scope.config.clone())
        .unwrap_or_default()
}

/// The operator currently executing, with the job id of its run.
pub fn current_context() -> Option<ExecutionContext> {
    CURRENT_OPERATOR.try_with(|ctx| ctx.snapshot()).ok()
}
