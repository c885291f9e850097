#![allow(dead_code)]

//! Variable binding for workflow steps
//!
//! Applies the step resolver recursively through a step's params and payload
//! before the step's tool is invoked. Binding fails fast on the first
//! unresolved reference so a step never runs with a partially substituted
//! input.

use super::errors::ResolveError;
use super::template::{StepResultResolver, StepValues};
use crate::workflow::WorkflowStep;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A step with every reference substituted, ready to invoke
#[derive(Debug, Clone)]
pub struct BoundStep {
    pub step_number: u32,
    pub target: String,
    pub action: String,
    pub intent: Option<String>,
    pub params: Map<String, Value>,
    pub payload: Option<Value>,
}

/// Binds step templates against prior results and request parameters
pub struct VariableBinder {
    resolver: StepResultResolver,
}

impl Default for VariableBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableBinder {
    pub fn new() -> Self {
        Self {
            resolver: StepResultResolver::new(),
        }
    }

    /// Produce a fully bound step.
    ///
    /// Request-level params are merged into the step's params (the step's own
    /// entries win), then every string in params, payload, target, action and
    /// intent is resolved. `{{params.x}}` tokens address the request-level
    /// params.
    pub fn bind_step(
        &self,
        step: &WorkflowStep,
        results: &StepValues,
        request_params: &Map<String, Value>,
    ) -> Result<BoundStep, ResolveError> {
        let mut merged = request_params.clone();
        for (key, value) in &step.params {
            merged.insert(key.clone(), value.clone());
        }

        let mut params = Map::new();
        for (key, value) in &merged {
            params.insert(
                key.clone(),
                self.resolve_value(value, results, request_params)?,
            );
        }

        let payload = match &step.payload {
            Some(value) => Some(self.resolve_value(value, results, request_params)?),
            None => None,
        };

        Ok(BoundStep {
            step_number: step.step_number,
            target: self.resolve_as_string(&step.target, results, request_params)?,
            action: self.resolve_as_string(&step.action, results, request_params)?,
            intent: step
                .intent
                .as_deref()
                .map(|s| self.resolve_as_string(s, results, request_params))
                .transpose()?,
            params,
            payload,
        })
    }

    /// Step numbers referenced anywhere in the step's strings
    pub fn referenced_steps(&self, step: &WorkflowStep) -> BTreeSet<u32> {
        let mut refs = BTreeSet::new();
        refs.extend(self.resolver.step_references(&step.target));
        refs.extend(self.resolver.step_references(&step.action));
        if let Some(intent) = &step.intent {
            refs.extend(self.resolver.step_references(intent));
        }
        for value in step.params.values() {
            self.collect_refs(value, &mut refs);
        }
        if let Some(payload) = &step.payload {
            self.collect_refs(payload, &mut refs);
        }
        refs
    }

    fn resolve_value(
        &self,
        value: &Value,
        results: &StepValues,
        request_params: &Map<String, Value>,
    ) -> Result<Value, ResolveError> {
        match value {
            Value::String(s) => self.resolver.resolve_text(s, results, request_params),
            Value::Array(items) => {
                let resolved = items
                    .iter()
                    .map(|item| self.resolve_value(item, results, request_params))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (key, item) in map {
                    resolved.insert(
                        key.clone(),
                        self.resolve_value(item, results, request_params)?,
                    );
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_as_string(
        &self,
        input: &str,
        results: &StepValues,
        request_params: &Map<String, Value>,
    ) -> Result<String, ResolveError> {
        match self.resolver.resolve_text(input, results, request_params)? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    fn collect_refs(&self, value: &Value, refs: &mut BTreeSet<u32>) {
        match value {
            Value::String(s) => refs.extend(self.resolver.step_references(s)),
            Value::Array(items) => {
                for item in items {
                    self.collect_refs(item, refs);
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    self.collect_refs(item, refs);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(params: Value, payload: Option<Value>) -> WorkflowStep {
        WorkflowStep {
            step_number: 2,
            target: "api-gateway".into(),
            action: "fetch".into(),
            intent: Some("summarize".into()),
            params: params.as_object().cloned().unwrap_or_default(),
            payload,
            is_async: false,
        }
    }

    #[test]
    fn test_bind_substitutes_nested_params() {
        let binder = VariableBinder::new();
        let mut results = StepValues::new();
        results.insert(1, json!({"id": 7}));

        let step = step(
            json!({"query": "item {{step1.result.id}}", "limit": 10}),
            None,
        );
        let bound = binder.bind_step(&step, &results, &Map::new()).unwrap();

        assert_eq!(bound.params["query"], json!("item 7"));
        assert_eq!(bound.params["limit"], json!(10));
    }

    #[test]
    fn test_bind_resolves_payload_whole_value() {
        let binder = VariableBinder::new();
        let mut results = StepValues::new();
        results.insert(1, json!({"rows": [1, 2, 3]}));

        let step = step(json!({}), Some(json!({"data": "{{step1.result.rows}}"})));
        let bound = binder.bind_step(&step, &results, &Map::new()).unwrap();

        assert_eq!(bound.payload, Some(json!({"data": [1, 2, 3]})));
    }

    #[test]
    fn test_request_params_merge_step_wins() {
        let binder = VariableBinder::new();
        let mut request_params = Map::new();
        request_params.insert("region".into(), json!("eu"));
        request_params.insert("limit".into(), json!(5));

        let step = step(json!({"limit": 20}), None);
        let bound = binder
            .bind_step(&step, &StepValues::new(), &request_params)
            .unwrap();

        assert_eq!(bound.params["region"], json!("eu"));
        assert_eq!(bound.params["limit"], json!(20));
    }

    #[test]
    fn test_bind_fails_fast_on_unresolved() {
        let binder = VariableBinder::new();
        let step = step(json!({"query": "{{step1.result.missing}}"}), None);

        let err = binder
            .bind_step(&step, &StepValues::new(), &Map::new())
            .unwrap_err();
        assert_eq!(err, ResolveError::unresolved(1, "missing"));
    }

    #[test]
    fn test_referenced_steps_scans_everything() {
        let binder = VariableBinder::new();
        let step = WorkflowStep {
            step_number: 4,
            target: "{{step1.result.target}}".into(),
            action: "run".into(),
            intent: None,
            params: json!({"a": "{{step2.result}}"})
                .as_object()
                .cloned()
                .unwrap(),
            payload: Some(json!(["{{step3.result.x}}"])),
            is_async: false,
        };

        let refs: Vec<u32> = binder.referenced_steps(&step).into_iter().collect();
        assert_eq!(refs, vec![1, 2, 3]);
    }
}
