//! Spec text decoding
//!
//! Application specs arrive as YAML or JSON. Both are decoded into a
//! `serde_json::Value` so that every schema pass can deserialize from the
//! same buffer with `serde_json::from_value`.
//!
//! YAML is built from parser events rather than the loaded document tree so
//! that scalar style is visible: only plain scalars are resolved to null,
//! booleans or numbers. Quoted and block scalars are always strings.
//! Plain boolean tokens follow the YAML 1.1 set (`y`, `yes`, `on`, ...)
//! that spec authors write.

use serde_json::{Map, Number, Value};
use yaml_rust2::parser::{Event, EventReceiver, Parser};
use yaml_rust2::scanner::TScalarStyle;

use crate::specs::bool_token_value;
use crate::Error;

/// Decode spec text, treating input that starts with `{` as JSON.
///
/// Only the first YAML document is used. Empty input decodes to `Value::Null`.
pub fn parse_document(input: &str) -> Result<Value, Error> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| Error::serialization(format!("invalid JSON spec: {e}")));
    }
    parse_yaml(input)
}

/// Parse the first document of a YAML string into a `serde_json::Value`
pub fn parse_yaml(input: &str) -> Result<Value, Error> {
    let mut builder = ValueBuilder::default();
    Parser::new(input.chars())
        .load(&mut builder, false)
        .map_err(|e| Error::serialization(format!("invalid YAML spec: {e}")))?;
    builder.finish()
}

/// Resolve a plain (unquoted) scalar
fn plain_scalar(text: &str) -> Value {
    match text {
        "" | "~" | "null" | "Null" | "NULL" => return Value::Null,
        _ => {}
    }
    if let Some(b) = bool_token_value(text) {
        return Value::Bool(b);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    let numeric = text.chars().any(|c| c.is_ascii_digit())
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if numeric {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

enum Frame {
    Sequence(Vec<Value>),
    Mapping {
        entries: Map<String, Value>,
        key: Option<String>,
    },
}

#[derive(Default)]
struct ValueBuilder {
    stack: Vec<Frame>,
    root: Option<Value>,
    error: Option<Error>,
}

impl ValueBuilder {
    fn fail(&mut self, message: &str) {
        if self.error.is_none() {
            self.error = Some(Error::serialization(message.to_string()));
        }
    }

    fn expecting_key(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Mapping { key: None, .. }))
    }

    fn push_value(&mut self, value: Value) {
        match self.stack.last_mut() {
            None => {
                if self.root.is_none() {
                    self.root = Some(value);
                }
            }
            Some(Frame::Sequence(items)) => items.push(value),
            Some(Frame::Mapping { entries, key }) => match key.take() {
                Some(k) => {
                    entries.insert(k, value);
                }
                None => self.fail("unsupported YAML key type"),
            },
        }
    }

    fn finish(self) -> Result<Value, Error> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.root.unwrap_or(Value::Null)),
        }
    }
}

impl EventReceiver for ValueBuilder {
    fn on_event(&mut self, ev: Event) {
        if self.error.is_some() {
            return;
        }
        match ev {
            Event::Scalar(text, style, ..) => {
                if self.expecting_key() {
                    if let Some(Frame::Mapping { key, .. }) = self.stack.last_mut() {
                        *key = Some(text);
                    }
                    return;
                }
                let value = match style {
                    TScalarStyle::Plain => plain_scalar(&text),
                    _ => Value::String(text),
                };
                self.push_value(value);
            }
            Event::SequenceStart(..) => {
                if self.expecting_key() {
                    return self.fail("unsupported YAML key type");
                }
                self.stack.push(Frame::Sequence(Vec::new()));
            }
            Event::MappingStart(..) => {
                if self.expecting_key() {
                    return self.fail("unsupported YAML key type");
                }
                self.stack.push(Frame::Mapping {
                    entries: Map::new(),
                    key: None,
                });
            }
            Event::SequenceEnd | Event::MappingEnd => {
                let value = match self.stack.pop() {
                    Some(Frame::Sequence(items)) => Value::Array(items),
                    Some(Frame::Mapping { entries, .. }) => Value::Object(entries),
                    None => return self.fail("unbalanced YAML collection"),
                };
                self.push_value(value);
            }
            Event::Alias(_) => self.fail("YAML aliases not supported"),
            _ => {}
        }
    }
}
