//! Declarative pipeline configuration model
//!
//! A pipeline is described as an ordered list of named steps, each producing
//! and consuming named fields of a shared state record, connected by edges and
//! value-guarded conditions. The structs here are plain `serde` types so a
//! caller can load them from JSON or YAML; [`PipelineConfig::validate`] checks
//! the structural rules before compilation.
//!
//! # Routing modes
//!
//! Exactly one of these applies to each step:
//!
//! - no `edge`, no `conditions` - fall through to the next declared step
//! - `edge` only - unconditional routing to `edge.node`
//! - `conditions` only - value-guarded routing, fall-through default
//! - `conditions` with `edge` - value-guarded routing, `edge` as fallback
//!
//! The terminal sentinel [`END`](crate::graph::END) is a valid target for
//! edges and conditions anywhere, including the last step.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{PipelineError, Result};
use crate::graph::END;

/// Alias map applied at a routing boundary: `alias -> source`
///
/// Each `source` is either the name of a state field to copy, or - when no
/// such field exists - a literal string value to assign.
pub type AliasMap = HashMap<String, String>;

/// Unconditional routing from a step to a named target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDeclaration {
    /// Target step name, or [`END`](crate::graph::END)
    pub node: String,
    /// Aliases applied on the way to the target
    #[serde(default)]
    pub output: AliasMap,
}

/// A value-guarded routing rule evaluated against a step's terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDeclaration {
    /// Value to match (case-insensitive) against the discriminant field
    pub value: String,
    /// Target step name, or [`END`](crate::graph::END)
    pub node: String,
    /// Aliases applied when this condition fires
    #[serde(default)]
    pub output: AliasMap,
    /// State field the condition is evaluated against
    ///
    /// Defaults to `classification` when omitted, so steps that reuse the
    /// same discriminant under different conditions can bind it explicitly.
    #[serde(default = "default_discriminant")]
    pub field: String,
}

pub(crate) fn default_discriminant() -> String {
    "classification".to_string()
}

/// One declared unit of work in the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDeclaration {
    /// Unique step name
    pub name: String,
    /// Adapter type identifier (resolved by the caller to a step adapter)
    pub adapter: String,
    /// Per-step parameters, passed through to the adapter untouched
    #[serde(default)]
    pub params: serde_json::Value,
    /// Aliases applied to the step's own output fields
    #[serde(default)]
    pub output: AliasMap,
    /// Unconditional edge (or fallback when `conditions` are present)
    #[serde(default)]
    pub edge: Option<EdgeDeclaration>,
    /// Ordered value-guarded routing rules
    #[serde(default)]
    pub conditions: Vec<ConditionDeclaration>,
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ordered step declarations
    pub steps: Vec<StepDeclaration>,
    /// Final output aliasing: `alias -> source`
    #[serde(default)]
    pub output: AliasMap,
    /// Optional persistence backend connection string
    ///
    /// The engine itself only decides persistent-vs-noop on presence; the
    /// concrete backend is supplied through the `CheckpointSaver` trait.
    #[serde(default)]
    pub checkpoint_url: Option<String>,
}

impl PipelineConfig {
    /// Check structural rules before compilation
    ///
    /// Target-existence checks for edges and conditions happen during graph
    /// compilation; this covers the purely declarative rules.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(PipelineError::configuration(
                "pipeline must declare at least one step",
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name == END {
                return Err(PipelineError::configuration(format!(
                    "'{}' is reserved and cannot be used as a step name",
                    END
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(PipelineError::configuration(format!(
                    "step '{}' is declared more than once",
                    step.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a step declaration by name
    pub fn step(&self, name: &str) -> Option<&StepDeclaration> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Every alias name introduced anywhere in the configuration
    ///
    /// Covers step `output`, `edge.output`, and `conditions[].output` maps;
    /// these all become optional fields of the merged state schema.
    pub fn declared_aliases(&self) -> Vec<String> {
        let mut aliases = Vec::new();
        let mut push_all = |map: &AliasMap| {
            for alias in map.keys() {
                if !aliases.contains(alias) {
                    aliases.push(alias.clone());
                }
            }
        };

        for step in &self.steps {
            push_all(&step.output);
            if let Some(edge) = &step.edge {
                push_all(&edge.output);
            }
            for condition in &step.conditions {
                push_all(&condition.output);
            }
        }
        push_all(&self.output);

        aliases
    }
}
