//! Step output references
//!
//! String arguments may embed `{{stepN.field}}`. A string that is exactly
//! one reference takes the referenced value as-is (arrays stay arrays);
//! otherwise each reference is interpolated as text. `field` may be a
//! dotted path through objects and array indices.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use pca_core::{Arguments, OrchestrationError, Step, StepResult};

lazy_static! {
    static ref REFERENCE: Regex =
        Regex::new(r"\{\{\s*step(\d+)\.([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}").unwrap();
}

/// Every `(step_id, path)` a step's arguments refer to
pub fn references(step: &Step) -> Vec<(u32, String)> {
    let mut found = Vec::new();
    for value in step.arguments.values() {
        collect(value, &mut found);
    }
    found
}

fn collect(value: &Value, found: &mut Vec<(u32, String)>) {
    match value {
        Value::String(s) => {
            for caps in REFERENCE.captures_iter(s) {
                if let Ok(id) = caps[1].parse() {
                    found.push((id, caps[2].to_string()));
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

/// Arguments of `step` with every reference replaced by the output of an
/// earlier successful step in `results`
pub fn resolve_arguments(
    step: &Step,
    results: &[StepResult],
) -> Result<Arguments, OrchestrationError> {
    step.arguments
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve_value(step.step_id, value, results)?)))
        .collect()
}

fn resolve_value(
    step_id: u32,
    value: &Value,
    results: &[StepResult],
) -> Result<Value, OrchestrationError> {
    match value {
        Value::String(s) => resolve_string(step_id, s, results),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(step_id, v, results))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value(step_id, v, results)?)))
            .collect::<Result<serde_json::Map<_, _>, OrchestrationError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    step_id: u32,
    text: &str,
    results: &[StepResult],
) -> Result<Value, OrchestrationError> {
    if !REFERENCE.is_match(text) {
        return Ok(Value::String(text.to_string()));
    }

    // Whole-string reference keeps the referenced value's type
    if let Some(m) = REFERENCE.find(text.trim()) {
        if m.start() == 0 && m.end() == text.trim().len() {
            return lookup(step_id, m.as_str(), results).cloned();
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in REFERENCE.find_iter(text) {
        out.push_str(&text[last..m.start()]);
        match lookup(step_id, m.as_str(), results)? {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

fn lookup<'a>(
    step_id: u32,
    reference: &str,
    results: &'a [StepResult],
) -> Result<&'a Value, OrchestrationError> {
    let unresolved = || OrchestrationError::UnresolvedReference {
        step_id,
        reference: reference.trim_matches(|c| c == '{' || c == '}').trim().to_string(),
    };

    let caps = REFERENCE.captures(reference).ok_or_else(unresolved)?;
    let source: u32 = caps[1].parse().map_err(|_| unresolved())?;

    let result = results
        .iter()
        .find(|r| r.step_id == source)
        .filter(|r| r.status.is_success())
        .ok_or_else(unresolved)?;

    let mut current = result.output.as_ref().ok_or_else(unresolved)?;
    for segment in caps[2].split('.') {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(unresolved)?;
    }
    Ok(current)
}
