use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::{Component, ComponentError, Inputs, Outputs};

use crate::step::Step;

/// A component without inputs returning values fixed at construction.
pub struct ConstantComponent {
    values: Value,
}

impl ConstantComponent {
    pub fn new(values: Outputs) -> Self {
        Self {
            values: Value::Object(values.into_iter().collect()),
        }
    }
}

impl Component for ConstantComponent {
    fn required_inputs(&self) -> &[String] {
        &[]
    }

    fn call(&self, _inputs: Inputs) -> BoxFuture<'_, Result<Value, ComponentError>> {
        let values = self.values.clone();
        Box::pin(async move { Ok(values) })
    }
}

/// A step providing `values` under their names.
pub fn constant_step(
    values: Outputs,
    hierarchical_id: impl Into<String>,
    hierarchical_name: impl Into<String>,
) -> Arc<Step> {
    Arc::new(
        Step::new(Arc::new(ConstantComponent::new(values)))
            .with_operator(hierarchical_id, hierarchical_name),
    )
}
