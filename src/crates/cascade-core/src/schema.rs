//! State schema merging
//!
//! Every step declares the fields it reads and writes. The merged schema is
//! the union of all declared fields plus every alias introduced by an
//! `output`, `edge.output`, or `conditions[].output` map, with each field made
//! optional (defaulting to null, or to an empty sequence for accumulator
//! fields like a chat history). The merged schema is a strict superset of
//! every step's own shape: a step never receives a record missing a field it
//! declared.
//!
//! Merging is deterministic and idempotent - the fields live in a `BTreeMap`,
//! so merging the same inputs twice yields a structurally identical schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Semantic type of a state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free-form text
    Text,
    /// Numeric value (confidence scores, counters)
    Number,
    /// Boolean flag
    Boolean,
    /// Ordered sequence
    List,
    /// Arbitrary JSON; compatible with every other kind
    Json,
}

impl FieldKind {
    /// Resolve the merged kind for two declarations of the same field
    ///
    /// `Json` is the wildcard: merging it with a specific kind keeps the
    /// specific one. Two differing specific kinds are incompatible.
    fn merge(self, other: FieldKind) -> Option<FieldKind> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (FieldKind::Json, specific) => Some(specific),
            (specific, FieldKind::Json) => Some(specific),
            _ => None,
        }
    }
}

/// One field of a step's declared state shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,
    /// Semantic type
    pub kind: FieldKind,
    /// Accumulator fields default to an empty sequence instead of null
    #[serde(default)]
    pub accumulate: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            accumulate: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Json)
    }

    /// An ordered accumulator sequence (e.g. `chat_history`)
    pub fn accumulator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::List,
            accumulate: true,
        }
    }
}

/// A merged field together with the steps that declared it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MergedField {
    kind: FieldKind,
    accumulate: bool,
    declared_by: Vec<String>,
}

/// The combined state schema of a whole pipeline
///
/// Built once at compile time from the step adapters' declared shapes and the
/// raw step declarations; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSchema {
    fields: BTreeMap<String, MergedField>,
}

/// Name reserved for callers that declare fields outside any step
const CONFIG_ORIGIN: &str = "<pipeline config>";

impl StateSchema {
    /// Merge per-step shapes and configuration aliases into one schema
    ///
    /// `shapes` pairs each step name with its declared state shape, in
    /// declaration order. Fails when two steps declare the same field with
    /// incompatible kinds, naming the field and both declaring steps.
    pub fn merge(shapes: &[(String, Vec<FieldSpec>)], config: &PipelineConfig) -> Result<Self> {
        let mut schema = Self {
            fields: BTreeMap::new(),
        };

        // Base record fields every pipeline carries
        schema.insert(CONFIG_ORIGIN, &FieldSpec::text("text"))?;
        schema.insert(CONFIG_ORIGIN, &FieldSpec::json("metadata"))?;
        schema.insert(CONFIG_ORIGIN, &FieldSpec::json("results"))?;

        for (step_name, shape) in shapes {
            for spec in shape {
                schema.insert(step_name, spec)?;
            }
        }

        // Aliases become optional fields too; their content mirrors whatever
        // source they copy, so they merge as the wildcard kind.
        for alias in config.declared_aliases() {
            schema.insert(CONFIG_ORIGIN, &FieldSpec::json(alias))?;
        }

        Ok(schema)
    }

    fn insert(&mut self, declared_by: &str, spec: &FieldSpec) -> Result<()> {
        match self.fields.get_mut(&spec.name) {
            None => {
                self.fields.insert(
                    spec.name.clone(),
                    MergedField {
                        kind: spec.kind,
                        accumulate: spec.accumulate,
                        declared_by: vec![declared_by.to_string()],
                    },
                );
            }
            Some(existing) => {
                let merged_kind = existing.kind.merge(spec.kind).ok_or_else(|| {
                    PipelineError::configuration(format!(
                        "field '{}' declared as {:?} by {} but as {:?} by '{}'",
                        spec.name,
                        existing.kind,
                        existing
                            .declared_by
                            .iter()
                            .map(|s| format!("'{}'", s))
                            .collect::<Vec<_>>()
                            .join(", "),
                        spec.kind,
                        declared_by
                    ))
                })?;
                if existing.accumulate != spec.accumulate
                    && existing.kind != FieldKind::Json
                    && spec.kind != FieldKind::Json
                {
                    return Err(PipelineError::configuration(format!(
                        "field '{}' is an accumulator for {} but not for '{}'",
                        spec.name,
                        existing.declared_by.join(", "),
                        declared_by
                    )));
                }
                existing.kind = merged_kind;
                existing.accumulate = existing.accumulate || spec.accumulate;
                if !existing.declared_by.iter().any(|s| s == declared_by) {
                    existing.declared_by.push(declared_by.to_string());
                }
            }
        }
        Ok(())
    }

    /// Whether the schema contains a field
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field names in sorted order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields in the merged schema
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build an initial state record
    ///
    /// Every schema field is defaulted (null, or an empty sequence for
    /// accumulators) before the caller-supplied overrides are applied.
    /// Override keys outside the schema are kept as well - extra batch data
    /// rides along in the record untouched.
    pub fn initial_state(&self, overrides: Map<String, Value>) -> Value {
        let mut record = Map::new();
        for (name, field) in &self.fields {
            let default = if field.accumulate {
                Value::Array(Vec::new())
            } else {
                Value::Null
            };
            record.insert(name.clone(), default);
        }
        for (key, value) in overrides {
            record.insert(key, value);
        }
        Value::Object(record)
    }
}
