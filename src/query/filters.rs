//! Built-in filters for the extraction query language
//!
//! String-shaped filters (`trim`, `lowercase`, `split`, `date`, ...) map over arrays, so
//! `"[li] | trim"` trims every element. Aggregating filters (`count`, `slice`, `join`, ...)
//! work on the value as a whole.

use super::parser::{FilterArg, FilterCall};
use super::QueryError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A filter implementation: `(value, args) -> value`
///
/// Returning `Err(message)` reports a malformed invocation.
pub type FilterFn = Arc<dyn Fn(Value, &[FilterArg]) -> Result<Value, String> + Send + Sync>;

/// Named filters available to queries
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    /// Creates a registry with no filters at all
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Creates a registry holding every built-in filter
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("count", count);
        registry.register("slice", slice);
        registry.register("first", |v, _| Ok(pick(v, |items| items.first())));
        registry.register("last", |v, _| Ok(pick(v, |items| items.last())));
        registry.register("trim", |v, _| Ok(map_strings(v, |s| s.trim().into())));
        registry.register("lowercase", |v, _| Ok(map_strings(v, |s| s.to_lowercase().into())));
        registry.register("uppercase", |v, _| Ok(map_strings(v, |s| s.to_uppercase().into())));
        registry.register("split", split);
        registry.register("join", join);
        registry.register("replace", replace);
        registry.register("int", |v, _| Ok(map_scalars(v, to_int)));
        registry.register("float", |v, _| Ok(map_scalars(v, to_float)));
        registry.register("gt", |v, args| compare(v, args, |o| o == Ordering::Greater));
        registry.register("gte", |v, args| compare(v, args, |o| o != Ordering::Less));
        registry.register("lt", |v, args| compare(v, args, |o| o == Ordering::Less));
        registry.register("lte", |v, args| compare(v, args, |o| o != Ordering::Greater));
        registry.register("eq", |v, args| equals(v, args, true));
        registry.register("ne", |v, args| equals(v, args, false));
        registry.register("empty", |v, _| Ok(Value::Bool(is_empty(&v))));
        registry.register("not_empty", |v, _| Ok(Value::Bool(!is_empty(&v))));
        registry.register("date", date);
        registry
    }

    /// Registers (or replaces) a filter under `name`
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &[FilterArg]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Applies one filter call
    pub fn apply(&self, call: &FilterCall, value: Value) -> Result<Value, QueryError> {
        let filter = self
            .filters
            .get(&call.name)
            .ok_or_else(|| QueryError::UnknownFilter(call.name.clone()))?;

        filter(value, &call.args).map_err(|message| QueryError::MalformedFilter {
            filter: call.name.clone(),
            message,
        })
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

fn count(value: Value, _: &[FilterArg]) -> Result<Value, String> {
    let n = match &value {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 1,
    };
    Ok(Value::from(n))
}

/// Resolves a possibly negative index against `len`, clamped to `0..=len`
fn clamp_index(index: i64, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs() as usize)
    } else {
        (index as usize).min(len)
    }
}

fn slice(value: Value, args: &[FilterArg]) -> Result<Value, String> {
    let start = args
        .first()
        .and_then(FilterArg::as_i64)
        .ok_or("slice requires an integer start index")?;
    let end = match args.get(1) {
        Some(arg) => Some(arg.as_i64().ok_or("slice end must be an integer")?),
        None => None,
    };

    let bounds = |len: usize| {
        let from = clamp_index(start, len);
        let to = end.map(|e| clamp_index(e, len)).unwrap_or(len);
        (from, to.max(from))
    };

    match value {
        Value::Array(items) => {
            let (from, to) = bounds(items.len());
            Ok(Value::Array(items[from..to].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = bounds(chars.len());
            Ok(Value::String(chars[from..to].iter().collect()))
        }
        Value::Null => Ok(Value::Null),
        other => Err(format!("cannot slice {}", other)),
    }
}

fn pick<F>(value: Value, f: F) -> Value
where
    F: Fn(&[Value]) -> Option<&Value>,
{
    match value {
        Value::Array(items) => f(items.as_slice()).cloned().unwrap_or(Value::Null),
        other => other,
    }
}

/// Applies `f` to every string, descending into arrays
fn map_strings<F>(value: Value, f: F) -> Value
where
    F: Fn(&str) -> Value + Copy,
{
    match value {
        Value::String(s) => f(&s),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_strings(v, f)).collect()),
        other => other,
    }
}

/// Applies `f` to every non-array value, descending into arrays
fn map_scalars<F>(value: Value, f: F) -> Value
where
    F: Fn(&Value) -> Value + Copy,
{
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(|v| map_scalars(v, f)).collect()),
        other => f(&other),
    }
}

fn arg_string(args: &[FilterArg], index: usize, default: &str) -> String {
    args.get(index)
        .map(|a| a.to_string())
        .unwrap_or_else(|| default.to_string())
}

fn split(value: Value, args: &[FilterArg]) -> Result<Value, String> {
    let separator = arg_string(args, 0, ",");
    if separator.is_empty() {
        return Err("split separator cannot be empty".to_string());
    }
    let separator = separator.as_str();
    Ok(map_strings(value, |s| {
        Value::Array(s.split(separator).map(|p| Value::String(p.to_string())).collect())
    }))
}

fn join(value: Value, args: &[FilterArg]) -> Result<Value, String> {
    let separator = arg_string(args, 0, ",");
    match value {
        Value::Array(items) => Ok(Value::String(
            items
                .iter()
                .map(text_of)
                .collect::<Vec<_>>()
                .join(&separator),
        )),
        other => Ok(other),
    }
}

fn replace(value: Value, args: &[FilterArg]) -> Result<Value, String> {
    let from = args
        .first()
        .map(|a| a.to_string())
        .ok_or("replace requires the text to replace")?;
    let to = arg_string(args, 1, "");
    let (from, to) = (from.as_str(), to.as_str());
    Ok(map_strings(value, |s| Value::String(s.replace(from, to))))
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_int(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_i64() => value.clone(),
        _ => as_number(value)
            .filter(|f| f.is_finite())
            .map(|f| Value::from(f.trunc() as i64))
            .unwrap_or(Value::Null),
    }
}

fn to_float(value: &Value) -> Value {
    as_number(value)
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn compare<F>(value: Value, args: &[FilterArg], accept: F) -> Result<Value, String>
where
    F: Fn(Ordering) -> bool + Copy,
{
    let bound = args
        .first()
        .and_then(FilterArg::as_f64)
        .ok_or("comparison requires a numeric argument")?;

    Ok(map_scalars(value, |v| {
        let result = as_number(v)
            .and_then(|n| n.partial_cmp(&bound))
            .map(accept)
            .unwrap_or(false);
        Value::Bool(result)
    }))
}

fn equals(value: Value, args: &[FilterArg], expected: bool) -> Result<Value, String> {
    let other = args.first().ok_or("equality requires an argument")?.clone();

    Ok(map_scalars(value, |v| {
        let same = match (as_number(v), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => text_of(v) == other.to_string(),
        };
        Value::Bool(same == expected)
    }))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn date(value: Value, args: &[FilterArg]) -> Result<Value, String> {
    // Formats may contain commas, which the argument splitter has already cut apart
    let format = if args.is_empty() {
        None
    } else {
        Some(
            args.iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(","),
        )
    };
    let format = format.as_deref();

    Ok(map_strings(value, |s| {
        parse_date(s.trim(), format)
            .map(Value::String)
            .unwrap_or(Value::Null)
    }))
}

/// Parses a date and renders it as RFC 3339 (UTC assumed when no offset is present)
fn parse_date(s: &str, format: Option<&str>) -> Option<String> {
    if let Some(fmt) = format {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.to_rfc3339());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().to_rfc3339());
        }
        return NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().to_rfc3339());
    }

    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|dt| dt.to_rfc3339())
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc().to_rfc3339())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().to_rfc3339())
        })
}
