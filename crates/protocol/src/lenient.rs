//! Tolerant field readers for oracle-produced records.
//!
//! The oracle is asked for a schema but does not always honor it: fields come back as `null`,
//! numbers arrive quoted, and booleans occasionally arrive as strings. These helpers accept those
//! shapes so a single sloppy field does not force a repair round-trip.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// `null` (or a missing field, together with `#[serde(default)]`) reads as `T::default()`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean: {other}"))),
        },
        other => Err(de::Error::custom(format!("invalid boolean: {other}"))),
    }
}

pub fn lenient_opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    lenient_bool(value).map(Some).map_err(de::Error::custom)
}

pub fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>()
                .map(Some)
                .map_err(|err| de::Error::custom(format!("invalid number {s:?}: {err}")))
        }
        other => Err(de::Error::custom(format!("invalid number: {other}"))),
    }
}

pub fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    value_to_i64(Value::deserialize(deserializer)?).map_err(de::Error::custom)
}

/// Page lists: `null` reads as empty, entries may be integers, integral floats or numeric
/// strings. Entries that are `null` are dropped.
pub fn lenient_pages<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    for value in raw.unwrap_or_default() {
        if let Some(page) = value_to_i64(value).map_err(de::Error::custom)? {
            out.push(page);
        }
    }
    Ok(out)
}

pub fn lenient_opt_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    match value_to_i64(Value::deserialize(deserializer)?).map_err(de::Error::custom)? {
        None => Ok(None),
        Some(v) => i32::try_from(v)
            .map(Some)
            .map_err(|_| de::Error::custom(format!("integer out of range: {v}"))),
    }
}

fn value_to_i64(value: Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Ok(Some(v));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.is_finite() => Ok(Some(f as i64)),
                _ => Err(format!("expected an integer, got {n}")),
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<i64>()
                .map(Some)
                .map_err(|err| format!("invalid integer {s:?}: {err}"))
        }
        other => Err(format!("expected an integer, got {other}")),
    }
}

/// Deserialize a list whose individual items are themselves read leniently; `null` reads as an
/// empty list.
pub fn null_as_empty_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value(v).map_err(de::Error::custom))
        .collect()
}
