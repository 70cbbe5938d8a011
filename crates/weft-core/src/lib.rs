pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use component::{from_async_fn, from_fn, Component, Inputs, Outputs};
pub use config::ExecutionConfig;
pub use context::{ExecutionContext, RunScope, TransformationType, HIERARCHY_SEPARATOR};
pub use error::{ComponentError, ErrorCode, ErrorKind, Result, RuntimeExecutionError};
pub use types::{DataType, NamedValue};
