//! Step reference resolution and variable binding
//!
//! The resolver implements the `{{stepN.result.path}}` / `{{params.name}}`
//! reference grammar; the binder applies it recursively to whole steps.

mod binder;
mod errors;
mod template;

#[allow(unused_imports)]
pub use binder::{BoundStep, VariableBinder};
#[allow(unused_imports)]
pub use errors::ResolveError;
#[allow(unused_imports)]
pub use template::{StepResultResolver, StepValues};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStep;
    use serde_json::{Map, json};

    #[test]
    fn test_two_step_chain_binds_end_to_end() {
        let binder = VariableBinder::new();
        let mut results = StepValues::new();
        results.insert(
            1,
            json!({"choices": [{"message": {"content": "42 degrees"}}]}),
        );

        let step = WorkflowStep {
            step_number: 2,
            target: "notifier".into(),
            action: "send".into(),
            intent: None,
            params: json!({
                "message": "Forecast: {{step1.result.choices[0].message.content}}"
            })
            .as_object()
            .cloned()
            .unwrap(),
            payload: None,
            is_async: false,
        };

        let bound = binder.bind_step(&step, &results, &Map::new()).unwrap();
        assert_eq!(bound.params["message"], json!("Forecast: 42 degrees"));
    }
}
