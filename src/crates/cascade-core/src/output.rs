//! Final output aliasing
//!
//! The top-level `output` map is applied to the terminal state with one
//! refinement over a plain value setter: an alias that was already set by a
//! **conditional** route is preserved. Concretely, if some condition anywhere
//! in the configuration declares the same alias as an output key, and the
//! alias currently holds that condition's `value` (case-insensitive), the
//! route is taken to have fired and the existing value wins over recomputing
//! from `source`. In every other case the alias is updated to the current
//! value of `source` - even over a stale value an earlier step wrote, which
//! is the classic failure mode ("final output silently keeps an upstream
//! step's value").
//!
//! Canonical outputs never propagate null to the caller: a null/absent
//! effective source yields the negative-classification default `"NA"` for
//! `value` and the empty string for `explanation`.

use serde_json::Value;

use crate::config::PipelineConfig;
use crate::value_setter::apply_aliases;

/// Negative-classification default substituted for a null `value`
pub const NEGATIVE_VALUE: &str = "NA";

/// An alias some condition declares as an output key, with the value its
/// route stamps onto the state
#[derive(Debug, Clone)]
struct ConditionalAlias {
    alias: String,
    /// Lower-cased condition value
    value: String,
}

/// Compiled final-output mapping
///
/// Built once at compile time from the top-level `output` map and the full
/// step list (which feeds conflict detection against conditional routes);
/// applied to each prediction's terminal state.
#[derive(Debug, Clone, Default)]
pub struct FinalOutput {
    aliases: Vec<(String, String)>,
    conditional: Vec<ConditionalAlias>,
}

impl FinalOutput {
    pub fn new(config: &PipelineConfig) -> Self {
        let mut conditional = Vec::new();
        for step in &config.steps {
            for condition in &step.conditions {
                for alias in condition.output.keys() {
                    conditional.push(ConditionalAlias {
                        alias: alias.clone(),
                        value: condition.value.to_lowercase(),
                    });
                }
            }
        }

        let mut aliases: Vec<(String, String)> = config
            .output
            .iter()
            .map(|(alias, source)| (alias.clone(), source.clone()))
            .collect();
        aliases.sort();

        Self { aliases, conditional }
    }

    /// Whether the alias currently holds a value some conditional route set
    ///
    /// The check re-scans the condition's declared `value` against the
    /// alias's current content; the discriminant field itself may have been
    /// overwritten by a later step, so it cannot be consulted here.
    fn preserved_by_condition(&self, state: &Value, alias: &str) -> bool {
        let Some(current) = state.get(alias).and_then(|v| v.as_str()) else {
            return false;
        };
        let current = current.to_lowercase();
        self.conditional
            .iter()
            .any(|guard| guard.alias == alias && guard.value == current)
    }

    /// Apply the final output mapping to the terminal state in place
    pub fn apply(&self, state: &mut Value) {
        for (alias, source) in &self.aliases {
            if self.preserved_by_condition(state, alias) {
                continue;
            }
            let mut single = crate::config::AliasMap::new();
            single.insert(alias.clone(), source.clone());
            apply_aliases(state, &single);
        }

        // Canonical outputs never surface null to the caller
        if let Some(record) = state.as_object_mut() {
            let value = record.entry("value").or_insert(Value::Null);
            if value.is_null() {
                *value = Value::String(NEGATIVE_VALUE.to_string());
            }
            let explanation = record.entry("explanation").or_insert(Value::Null);
            if explanation.is_null() {
                *explanation = Value::String(String::new());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn final_output(config: serde_json::Value) -> FinalOutput {
        FinalOutput::new(&serde_json::from_value(config).unwrap())
    }

    #[test]
    fn test_conditional_output_survives_downstream_overwrite() {
        // The condition fired and its setter stamped value = "NA"; a later
        // step overwrote classification to "YES". The final mapping must not
        // clobber the conditional result.
        let output = final_output(json!({
            "steps": [
                {
                    "name": "classify",
                    "adapter": "classifier",
                    "conditions": [
                        {"value": "NA", "node": "END", "output": {"value": "NA"}}
                    ]
                }
            ],
            "output": {"value": "classification"}
        }));

        let mut state = json!({"classification": "YES", "value": "NA"});
        output.apply(&mut state);
        assert_eq!(state["value"], "NA");
    }

    #[test]
    fn test_stale_alias_is_updated_without_matching_condition() {
        let output = final_output(json!({
            "steps": [{"name": "classify", "adapter": "classifier"}],
            "output": {"value": "classification"}
        }));

        let mut state = json!({"classification": "No", "value": "Yes"});
        output.apply(&mut state);
        assert_eq!(state["value"], "No");
    }

    #[test]
    fn test_alias_holding_unrelated_value_is_updated() {
        // A condition declares the alias, but the alias holds something the
        // route never stamps - so no route fired and source wins.
        let output = final_output(json!({
            "steps": [
                {
                    "name": "classify",
                    "adapter": "classifier",
                    "conditions": [
                        {"value": "NA", "node": "END", "output": {"value": "NA"}}
                    ]
                }
            ],
            "output": {"value": "classification"}
        }));

        let mut state = json!({"classification": "No", "value": "Yes"});
        output.apply(&mut state);
        assert_eq!(state["value"], "No");
    }

    #[test]
    fn test_missing_source_assigns_literal() {
        let output = final_output(json!({
            "steps": [{"name": "classify", "adapter": "classifier"}],
            "output": {"source": "step_name"}
        }));

        let mut state = json!({"classification": "Yes"});
        output.apply(&mut state);
        assert_eq!(state["source"], "step_name");
    }

    #[test]
    fn test_null_canonical_outputs_get_defaults() {
        let output = final_output(json!({
            "steps": [{"name": "classify", "adapter": "classifier"}],
            "output": {"value": "classification"}
        }));

        let mut state = json!({"classification": null, "explanation": null});
        output.apply(&mut state);
        assert_eq!(state["value"], NEGATIVE_VALUE);
        assert_eq!(state["explanation"], "");
    }

    #[test]
    fn test_unset_alias_is_computed_from_source() {
        let output = final_output(json!({
            "steps": [
                {
                    "name": "classify",
                    "adapter": "classifier",
                    "conditions": [
                        {"value": "NA", "node": "END", "output": {"value": "NA"}}
                    ]
                }
            ],
            "output": {"value": "classification"}
        }));

        let mut state = json!({"classification": "Maybe", "value": null});
        output.apply(&mut state);
        assert_eq!(state["value"], "Maybe");
    }
}
