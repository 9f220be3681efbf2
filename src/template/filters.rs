//! Custom filters for the manifest templates
//!
//! - `to_json`: Render a value as a JSON flow collection (valid YAML)
//! - `required`: Fail if a value is undefined, none, or empty

use minijinja::{Error, ErrorKind, Value};

/// Serialize a value as compact JSON
///
/// Usage: `{{ node_selector | to_json }}`
pub fn to_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot serialize value to JSON: {}", e),
        )
    })
}

/// Required filter - fails if the value is missing or empty
///
/// Usage: `{{ bootstrap_kubeconfig | required }}`
pub fn required(value: Value) -> Result<Value, Error> {
    let empty = value.as_str().is_some_and(str::is_empty);
    if value.is_undefined() || value.is_none() || empty {
        Err(Error::new(
            ErrorKind::UndefinedError,
            "required value is missing or empty",
        ))
    } else {
        Ok(value)
    }
}
