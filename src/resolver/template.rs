#![allow(dead_code)]

//! Step reference resolution
//!
//! Resolves `{{stepN.result}}`, `{{stepN.result.path}}` and `{{params.name}}`
//! tokens against the results of previously executed steps and the request
//! parameters. A string that consists of exactly one token resolves to the
//! referenced JSON value itself; tokens embedded in surrounding text are
//! interpolated as strings.

use super::errors::ResolveError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Results of completed steps, keyed by step number
pub type StepValues = BTreeMap<u32, Value>;

/// Resolver for step result and parameter references
pub struct StepResultResolver {
    token_re: Regex,
    whole_re: Regex,
}

impl Default for StepResultResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StepResultResolver {
    pub fn new() -> Self {
        Self {
            token_re: Regex::new(r"\{\{(?:step(\d+)\.result(?:\.([^}]*))?|params\.([\w.]+))\}\}")
                .unwrap(),
            whole_re: Regex::new(
                r"^\{\{(?:step(\d+)\.result(?:\.([^}]*))?|params\.([\w.]+))\}\}$",
            )
            .unwrap(),
        }
    }

    /// Resolve all references in a string.
    ///
    /// A string that is exactly one token yields the referenced value with its
    /// JSON type preserved. Anything else is treated as text with tokens
    /// interpolated in place; token-free strings pass through unchanged.
    pub fn resolve_text(
        &self,
        input: &str,
        steps: &StepValues,
        params: &Map<String, Value>,
    ) -> Result<Value, ResolveError> {
        if let Some(caps) = self.whole_re.captures(input) {
            return self.resolve_token(&caps, steps, params);
        }

        let mut out = String::new();
        let mut last = 0;
        for caps in self.token_re.captures_iter(input) {
            let m = caps.get(0).unwrap();
            out.push_str(&input[last..m.start()]);
            let value = self.resolve_token(&caps, steps, params)?;
            out.push_str(&render_inline(&value));
            last = m.end();
        }

        if last == 0 {
            return Ok(Value::String(input.to_string()));
        }

        out.push_str(&input[last..]);
        Ok(Value::String(out))
    }

    /// Collect the step numbers referenced anywhere in a string
    pub fn step_references(&self, input: &str) -> BTreeSet<u32> {
        self.token_re
            .captures_iter(input)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().parse().ok())
            .collect()
    }

    fn resolve_token(
        &self,
        caps: &regex::Captures<'_>,
        steps: &StepValues,
        params: &Map<String, Value>,
    ) -> Result<Value, ResolveError> {
        if let Some(step_match) = caps.get(1) {
            let step: u32 = step_match
                .as_str()
                .parse()
                .map_err(|_| ResolveError::malformed(0, step_match.as_str()))?;
            let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");

            let root = steps
                .get(&step)
                .ok_or_else(|| ResolveError::unresolved(step, path))?;
            return walk_path(root, step, path);
        }

        let name = caps
            .get(3)
            .map(|m| m.as_str())
            .unwrap_or_default();
        resolve_param(name, params)
    }
}

/// Walk a dotted path into a parameter value
fn resolve_param(name: &str, params: &Map<String, Value>) -> Result<Value, ResolveError> {
    let mut segments = name.split('.');
    let first = segments.next().unwrap_or_default();
    let mut current = params
        .get(first)
        .ok_or_else(|| ResolveError::param(name))?;

    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        current = current
            .get(segment)
            .ok_or_else(|| ResolveError::param(name))?;
    }

    Ok(current.clone())
}

/// Walk a dotted path into a step result value.
///
/// Segments are split on `.`; `name[2]` means field access then index, and a
/// bare numeric segment indexes a list. An empty path means the whole value.
fn walk_path(root: &Value, step: u32, path: &str) -> Result<Value, ResolveError> {
    let mut current = root;

    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = walk_segment(current, step, path, segment)?;
    }

    Ok(current.clone())
}

fn walk_segment<'a>(
    value: &'a Value,
    step: u32,
    path: &str,
    segment: &str,
) -> Result<&'a Value, ResolveError> {
    // Bare numeric segment indexes a list
    if let Ok(index) = segment.parse::<usize>() {
        return value
            .get(index)
            .ok_or_else(|| ResolveError::unresolved(step, path));
    }

    let (name, rest) = match segment.find('[') {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => (segment, ""),
    };

    let mut current = value
        .get(name)
        .ok_or_else(|| ResolveError::unresolved(step, path))?;

    let mut brackets = rest;
    while !brackets.is_empty() {
        let close = brackets
            .find(']')
            .ok_or_else(|| ResolveError::malformed(step, segment))?;
        let index: usize = brackets[1..close]
            .parse()
            .map_err(|_| ResolveError::malformed(step, segment))?;
        current = current
            .get(index)
            .ok_or_else(|| ResolveError::unresolved(step, path))?;
        brackets = &brackets[close + 1..];
    }

    Ok(current)
}

/// Render a value for interpolation inside surrounding text
fn render_inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
