use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;

/// Shape a recovered response must have: an object holding one array field (or that array on
/// its own), every element of which deserializes into the record type.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub array_field: String,
    pub require_non_empty: bool,
    /// JSON schema handed to the oracle alongside the prompt.
    pub json_schema: Value,
}

impl ResponseSchema {
    pub fn new(array_field: impl Into<String>, json_schema: Value) -> Self {
        Self {
            array_field: array_field.into(),
            require_non_empty: false,
            json_schema,
        }
    }

    pub fn non_empty(mut self) -> Self {
        self.require_non_empty = true;
        self
    }
}

/// A candidate that passed validation.
#[derive(Debug, Clone)]
pub struct Validated<T> {
    pub items: Vec<T>,
    /// The candidate as an object; a bare array is wrapped under the schema's field name.
    pub root: Value,
}

/// The candidate failed validation and has to go through a repair round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairNeeded {
    pub reason: String,
}

impl fmt::Display for RepairNeeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for RepairNeeded {}

fn repair(reason: impl Into<String>) -> RepairNeeded {
    RepairNeeded {
        reason: reason.into(),
    }
}

pub fn validate<T: DeserializeOwned>(
    candidate: &str,
    schema: &ResponseSchema,
) -> Result<Validated<T>, RepairNeeded> {
    let value: Value = serde_json::from_str(candidate)
        .map_err(|err| repair(format!("candidate is not valid JSON: {err}")))?;

    let (array, root) = match &value {
        Value::Object(map) => match map.get(&schema.array_field) {
            Some(Value::Array(items)) => (items.clone(), value.clone()),
            Some(_) => {
                return Err(repair(format!(
                    "field `{}` is not an array",
                    schema.array_field
                )))
            }
            None => {
                return Err(repair(format!(
                    "object has no `{}` field",
                    schema.array_field
                )))
            }
        },
        Value::Array(items) => {
            let mut root = Map::new();
            root.insert(schema.array_field.clone(), Value::Array(items.clone()));
            (items.clone(), Value::Object(root))
        }
        _ => return Err(repair("candidate is neither an object nor an array")),
    };

    if schema.require_non_empty && array.is_empty() {
        return Err(repair(format!("`{}` is empty", schema.array_field)));
    }

    let items = array
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            serde_json::from_value::<T>(item)
                .map_err(|err| repair(format!("`{}[{idx}]`: {err}", schema.array_field)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Validated { items, root })
}
