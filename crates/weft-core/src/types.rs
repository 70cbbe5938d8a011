use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::Outputs;
use crate::error::{Result, RuntimeExecutionError};

/// Data types available for workflow and component inputs/outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "INT")]
    Integer,
    #[serde(rename = "FLOAT")]
    Float,
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "DATAFRAME")]
    DataFrame,
    #[serde(rename = "SERIES")]
    Series,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "ANY")]
    Any,
    #[serde(rename = "PLOTLYJSON")]
    PlotlyJson,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "INT",
            Self::Float => "FLOAT",
            Self::String => "STRING",
            Self::DataFrame => "DATAFRAME",
            Self::Series => "SERIES",
            Self::Boolean => "BOOLEAN",
            Self::Any => "ANY",
            Self::PlotlyJson => "PLOTLYJSON",
        }
    }

    /// Coerce `value` into this type.
    ///
    /// Numbers and booleans are accepted from their string forms, integral
    /// floats within the `i64` range are accepted as integers, and tabular
    /// types accept either JSON structures or strings containing them. `null`
    /// is only accepted by `ANY`; otherwise optionality is decided by the
    /// caller.
    pub fn parse_value(&self, value: &Value) -> std::result::Result<Value, String> {
        match (self, value) {
            (Self::Any, v) => Ok(v.clone()),
            (_, Value::Null) => Err("none is not an allowed value".to_string()),

            (Self::Integer, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i))
                } else {
                    match n.as_f64() {
                        // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
                        Some(f)
                            if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
                        {
                            Ok(Value::from(f as i64))
                        }
                        _ => Err(format!("{} is not a valid integer", n)),
                    }
                }
            }
            (Self::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{}' is not a valid integer", s)),

            (Self::Float, Value::Number(n)) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("{} is not a valid float", n)),
            (Self::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("'{}' is not a valid float", s)),

            (Self::String, Value::String(s)) => Ok(Value::String(s.clone())),
            (Self::String, Value::Number(n)) => Ok(Value::String(n.to_string())),

            (Self::Boolean, Value::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("{} is not a valid boolean", n)),
            },
            (Self::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a valid boolean", s)),
            },

            (Self::Series | Self::DataFrame, Value::Object(_) | Value::Array(_)) => {
                Ok(value.clone())
            }
            (Self::Series | Self::DataFrame, Value::String(s)) => {
                match serde_json::from_str::<Value>(s) {
                    Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Ok(parsed),
                    _ => Err(format!("could not parse provided input as {}", self)),
                }
            }

            (Self::PlotlyJson, Value::Object(_)) => Ok(value.clone()),

            (ty, other) => Err(format!("{} is not a valid {}", other, ty)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named value together with its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: Value, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            value,
            data_type,
        }
    }
}

/// Parse `values` into a name→value mapping according to their types.
///
/// With `optional`, `null` is accepted for every value. All failures are
/// collected into one `WorkflowInputDataValidation` error.
pub fn parse_named_values(values: &[NamedValue], optional: bool) -> Result<Outputs> {
    let mut parsed = Outputs::with_capacity(values.len());
    let mut failures = Vec::new();

    for named in values {
        if optional && named.value.is_null() {
            parsed.insert(named.name.clone(), Value::Null);
            continue;
        }
        match named.data_type.parse_value(&named.value) {
            Ok(v) => {
                parsed.insert(named.name.clone(), v);
            }
            Err(reason) => failures.push(format!("{} ({}): {}", named.name, named.data_type, reason)),
        }
    }

    if failures.is_empty() {
        Ok(parsed)
    } else {
        Err(RuntimeExecutionError::workflow_input_data_validation(format!(
            "The provided data could not be parsed into the respective types: {}",
            failures.join("; ")
        )))
    }
}

/// Check a produced workflow output against its declared type.
pub fn validate_output(name: &str, data_type: DataType, value: &Value) -> Result<Value> {
    data_type.parse_value(value).map_err(|reason| {
        RuntimeExecutionError::workflow_output_validation(format!(
            "Output '{}' could not be validated as {}: {}",
            name, data_type, reason
        ))
    })
}
