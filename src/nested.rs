//! Rebuilds structured records from flat spreadsheet rows.
//!
//! Column headers are dotted property paths (`project_core.project_shortname`) of at most
//! three segments. A cell is a list when it contains the `||` delimiter or a quote
//! character, or when its key is configured as list-valued.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::BrokerError;

pub const LIST_DELIMITER: &str = "||";
pub const MAX_KEY_DEPTH: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct NestedObjectBuilder {
    list_keys: HashSet<String>,
}

impl NestedObjectBuilder {
    pub fn new<I, S>(list_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            list_keys: list_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_list_value(&self, key: &str, raw: &str) -> bool {
        raw.contains(LIST_DELIMITER) || raw.contains('"') || self.list_keys.contains(key)
    }

    /// Wraps one cell value in the objects named by its dotted key.
    pub fn nest(&self, key: &str, value: Value) -> Result<Map<String, Value>, BrokerError> {
        let parts = key.split('.').collect::<Vec<_>>();
        if parts.len() > MAX_KEY_DEPTH {
            return Err(BrokerError::Validation(format!(
                "keys nested greater than {MAX_KEY_DEPTH} levels are not supported, found: {key}"
            )));
        }
        if parts.iter().any(|part| part.trim().is_empty()) {
            return Err(BrokerError::Validation(format!(
                "malformed property key: {key:?}"
            )));
        }

        let Some((head, tail)) = parts.split_first() else {
            return Err(BrokerError::Validation("empty property key".to_string()));
        };
        let mut nested = self.cell_value(key, value);
        for part in tail.iter().rev() {
            let mut wrapper = Map::new();
            wrapper.insert(part.trim().to_string(), nested);
            nested = Value::Object(wrapper);
        }
        let mut root = Map::new();
        root.insert(head.trim().to_string(), nested);
        Ok(root)
    }

    /// Merges a single key/value pair into an existing partial object.
    pub fn insert(
        &self,
        object: Map<String, Value>,
        key: &str,
        value: Value,
    ) -> Result<Map<String, Value>, BrokerError> {
        let nested = self.nest(key, value)?;
        Ok(merge(object, nested))
    }

    /// Builds one record from the (header, cell) pairs of a row; absent cells are skipped.
    pub fn build_row<'a, I>(&self, cells: I) -> Result<Map<String, Value>, BrokerError>
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let mut object = Map::new();
        for (key, cell) in cells {
            let Some(cell) = cell else {
                continue;
            };
            object = self.insert(object, key, Value::String(cell.to_string()))?;
        }
        Ok(object)
    }

    fn cell_value(&self, key: &str, value: Value) -> Value {
        let raw = match &value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => return value,
        };
        if self.is_list_value(key, &raw) {
            Value::Array(
                raw.split(LIST_DELIMITER)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )
        } else {
            value
        }
    }
}

/// Deep union of two partial objects. Colliding mappings are merged recursively; any
/// other collision collects both values into a list.
pub fn merge(left: Map<String, Value>, right: Map<String, Value>) -> Map<String, Value> {
    let mut merged = left;
    for (key, incoming) in right {
        let combined = match merged.remove(&key) {
            None => incoming,
            Some(Value::Object(existing)) => match incoming {
                Value::Object(incoming) => Value::Object(merge(existing, incoming)),
                other => Value::Array(vec![Value::Object(existing), other]),
            },
            Some(Value::Array(mut existing)) => {
                match incoming {
                    Value::Array(items) => existing.extend(items),
                    other => existing.push(other),
                }
                Value::Array(existing)
            }
            Some(existing) => Value::Array(vec![existing, incoming]),
        };
        merged.insert(key, combined);
    }
    merged
}

/// Deep merge where the patch wins on conflicting scalar fields.
pub fn overlay(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, incoming) in patch {
        match (base.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                overlay(existing, incoming)
            }
            (_, incoming) => {
                base.insert(key, incoming);
            }
        }
    }
}
