use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ExecutionContext;

/// The kind of a [`RuntimeExecutionError`].
///
/// Kinds form families: [`ErrorKind::CircularDependency`] is a DAG processing
/// error, [`ErrorKind::ComponentInputValidation`] is a component error. Use
/// the `is_*` helpers on the error to match a whole family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DagProcessing,
    CircularDependency,
    MissingOutput,
    MissingInputSource,
    Component,
    ComponentInputValidation,
    UnexpectedComponent,
    InvalidComponentResult,
    WorkflowOutputValidation,
    WorkflowInputDataValidation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DagProcessing => "DAGProcessingError",
            Self::CircularDependency => "CircularDependency",
            Self::MissingOutput => "MissingOutputException",
            Self::MissingInputSource => "MissingInputSource",
            Self::Component => "ComponentException",
            Self::ComponentInputValidation => "ComponentInputValidationException",
            Self::UnexpectedComponent => "UnexpectedComponentException",
            Self::InvalidComponentResult => "InvalidComponentResult",
            Self::WorkflowOutputValidation => "WorkflowOutputValidationError",
            Self::WorkflowInputDataValidation => "WorkflowInputDataValidationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application error code raised by component code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ErrorCode {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Root error of workflow execution.
///
/// Every failure that crosses a step boundary is one of these. The attached
/// [`ExecutionContext`] identifies the operator that failed first; it is set
/// where the error is raised and never replaced by outer operators.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct RuntimeExecutionError {
    kind: ErrorKind,
    message: String,
    error_code: Option<ErrorCode>,
    extra_information: Option<serde_json::Value>,
    context: Option<ExecutionContext>,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RuntimeExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error_code: None,
            extra_information: None,
            context: None,
            cause: None,
        }
    }

    pub fn dag_processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DagProcessing, message)
    }

    pub fn circular_dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircularDependency, message)
    }

    pub fn missing_output(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingOutput, message)
    }

    pub fn missing_input_source(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingInputSource, message)
    }

    pub fn unexpected_component(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedComponent, message)
    }

    pub fn invalid_component_result(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidComponentResult, message)
    }

    pub fn workflow_output_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkflowOutputValidation, message)
    }

    pub fn workflow_input_data_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkflowInputDataValidation, message)
    }

    /// A domain error intentionally raised by component code.
    pub fn component(
        message: impl Into<String>,
        error_code: ErrorCode,
        extra_information: Option<serde_json::Value>,
    ) -> Self {
        let mut err = Self::new(ErrorKind::Component, message);
        err.error_code = Some(error_code);
        err.extra_information = extra_information;
        err
    }

    pub fn component_input_validation(
        message: impl Into<String>,
        error_code: ErrorCode,
        extra_information: Option<serde_json::Value>,
    ) -> Self {
        let mut err = Self::new(ErrorKind::ComponentInputValidation, message);
        err.error_code = Some(error_code);
        err.extra_information = extra_information;
        err
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_boxed_cause(mut self, cause: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        self.cause = Some(Arc::from(cause));
        self
    }

    /// Attach the context of the operator raising this error.
    pub fn with_context(mut self, context: &ExecutionContext) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Fill in context information that is still missing.
    ///
    /// An operator identity that is already attached is kept; only a missing
    /// job id is completed from `context`.
    pub fn enrich(mut self, context: &ExecutionContext) -> Self {
        match self.context.as_mut() {
            None => self.context = Some(context.clone()),
            Some(existing) if existing.job_id.is_none() => existing.job_id = context.job_id,
            Some(_) => {}
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_code(&self) -> Option<&ErrorCode> {
        self.error_code.as_ref()
    }

    pub fn extra_information(&self) -> Option<&serde_json::Value> {
        self.extra_information.as_ref()
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.context.as_ref()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_dag_processing_error(&self) -> bool {
        matches!(self.kind, ErrorKind::DagProcessing | ErrorKind::CircularDependency)
    }

    pub fn is_component_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Component | ErrorKind::ComponentInputValidation
        )
    }

    pub fn is_missing_output_data(&self) -> bool {
        self.kind == ErrorKind::MissingOutput
    }
}

/// What a component returns when it cannot produce its outputs.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// A deliberate domain error with an application error code.
    #[error("{message}")]
    Raised {
        message: String,
        error_code: ErrorCode,
        extra_information: Option<serde_json::Value>,
    },

    /// The component rejected its inputs.
    #[error("Component input validation failed: {message}")]
    InputValidation {
        message: String,
        error_code: ErrorCode,
        extra_information: Option<serde_json::Value>,
    },

    /// An engine error, e.g. from a nested evaluation run by the component.
    #[error(transparent)]
    Runtime(#[from] RuntimeExecutionError),

    /// Anything else. Reported as an unexpected component failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ComponentError {
    pub fn raised(message: impl Into<String>, error_code: impl Into<ErrorCode>) -> Self {
        Self::Raised {
            message: message.into(),
            error_code: error_code.into(),
            extra_information: None,
        }
    }

    pub fn input_validation(message: impl Into<String>, error_code: impl Into<ErrorCode>) -> Self {
        Self::InputValidation {
            message: message.into(),
            error_code: error_code.into(),
            extra_information: None,
        }
    }

    pub fn with_extra_information(mut self, extra: serde_json::Value) -> Self {
        match &mut self {
            Self::Raised {
                extra_information, ..
            }
            | Self::InputValidation {
                extra_information, ..
            } => *extra_information = Some(extra),
            Self::Runtime(_) | Self::Other(_) => {}
        }
        self
    }
}

/// Failure to load an [`ExecutionConfig`](crate::config::ExecutionConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RuntimeExecutionError>;
