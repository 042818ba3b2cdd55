//! Environment variable rendering
//!
//! Container config is an unordered map of scalars. It is rendered into
//! name-sorted `EnvVar`s so repeated ensures produce identical pod specs.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::EnvVar;
use serde_json::Value;

use crate::specs::{bool_token_value, strip_single_quotes};

/// Render one config value as an environment string.
///
/// Single-quoted strings lose their quotes and are otherwise kept verbatim.
/// Unquoted boolean-like tokens become `"true"`/`"false"`.
pub fn env_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let unquoted = strip_single_quotes(s);
            if unquoted.len() != s.len() {
                unquoted.to_string()
            } else {
                match bool_token_value(s) {
                    Some(b) => b.to_string(),
                    None => s.clone(),
                }
            }
        }
        other => other.to_string(),
    }
}

/// Render a container's config as environment variables sorted by name
pub fn container_env(config: &HashMap<String, Value>) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = config
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(env_value(value)),
            value_from: None,
        })
        .collect();
    env.sort_by(|a, b| a.name.cmp(&b.name));
    env
}
