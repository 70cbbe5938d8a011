use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ComponentError;

/// Named input values handed to a component.
pub type Inputs = HashMap<String, Value>;

/// Named output values produced by a step or workflow.
pub type Outputs = HashMap<String, Value>;

/// The opaque callable wrapped by a step.
///
/// A component receives its resolved inputs by name and returns a JSON object
/// mapping output names to values. Returning `null` means "no outputs"; any
/// other non-object value is rejected by the engine.
pub trait Component: Send + Sync + 'static {
    /// Inputs that must be wired before the component may run. Further
    /// optional inputs are passed along when wired.
    fn required_inputs(&self) -> &[String];

    /// Invoke the component.
    fn call(&self, inputs: Inputs) -> BoxFuture<'_, Result<Value, ComponentError>>;
}

/// A component backed by a synchronous closure.
pub struct FnComponent<F> {
    required: Vec<String>,
    func: F,
}

impl<F> FnComponent<F>
where
    F: Fn(Inputs) -> Result<Value, ComponentError> + Send + Sync + 'static,
{
    pub fn new<I, S>(required: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            func,
        }
    }
}

impl<F> Component for FnComponent<F>
where
    F: Fn(Inputs) -> Result<Value, ComponentError> + Send + Sync + 'static,
{
    fn required_inputs(&self) -> &[String] {
        &self.required
    }

    fn call(&self, inputs: Inputs) -> BoxFuture<'_, Result<Value, ComponentError>> {
        Box::pin(async move { (self.func)(inputs) })
    }
}

/// A component backed by an async closure.
pub struct AsyncFnComponent<F> {
    required: Vec<String>,
    func: F,
}

impl<F, Fut> AsyncFnComponent<F>
where
    F: Fn(Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ComponentError>> + Send + 'static,
{
    pub fn new<I, S>(required: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            func,
        }
    }
}

impl<F, Fut> Component for AsyncFnComponent<F>
where
    F: Fn(Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ComponentError>> + Send + 'static,
{
    fn required_inputs(&self) -> &[String] {
        &self.required
    }

    fn call(&self, inputs: Inputs) -> BoxFuture<'_, Result<Value, ComponentError>> {
        Box::pin((self.func)(inputs))
    }
}

/// Wrap a synchronous closure as a shareable component.
pub fn from_fn<I, S, F>(required: I, func: F) -> Arc<dyn Component>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(Inputs) -> Result<Value, ComponentError> + Send + Sync + 'static,
{
    Arc::new(FnComponent::new(required, func))
}

/// Wrap an async closure as a shareable component.
pub fn from_async_fn<I, S, F, Fut>(required: I, func: F) -> Arc<dyn Component>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ComponentError>> + Send + 'static,
{
    Arc::new(AsyncFnComponent::new(required, func))
}

/// Fetch a required input as `f64`, failing with an input validation error.
pub fn input_f64(inputs: &Inputs, name: &str) -> Result<f64, ComponentError> {
    inputs
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| ComponentError::input_validation(format!("input '{}' must be a number", name), "INVALID_INPUT"))
}
