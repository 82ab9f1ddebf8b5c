//! Step adapter interface and cost/usage aggregation
//!
//! Step implementations (classifiers, fuzzy extractors, generators) live
//! outside this crate. Each one plugs in through [`StepAdapter`]: it declares
//! the state fields it reads and writes, compiles into an async sub-workflow
//! over the merged schema, and exposes a token/cost usage accessor.
//!
//! Usage aggregation is deliberately lenient: one step's failing accessor is
//! logged and skipped, never zeroing out the rest of the pipeline's
//! accounting.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::NodeExecutor;
use crate::schema::{FieldSpec, StateSchema};

/// Token/cost usage of one step's model calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub successful_requests: u64,
    pub cached_tokens: u64,
}

impl Usage {
    /// Sum two usage records, saturating on overflow
    pub fn add(&self, other: &Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self
                .completion_tokens
                .saturating_add(other.completion_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
            successful_requests: self
                .successful_requests
                .saturating_add(other.successful_requests),
            cached_tokens: self.cached_tokens.saturating_add(other.cached_tokens),
        }
    }
}

/// One pipeline step, supplied by an external collaborator
///
/// The adapter's `compile` is called once, at pipeline compile time, with the
/// merged schema; the returned executor runs once per prediction. `usage` may
/// fail - a vendor client that never ran has nothing to report - and the
/// engine treats that as a per-step condition, not a pipeline failure.
pub trait StepAdapter: Send + Sync {
    /// Unique step name, matching the declaration
    fn name(&self) -> &str;

    /// Fields this step reads and writes
    fn state_shape(&self) -> Vec<FieldSpec>;

    /// Compile the step into its async sub-workflow `(state) -> state`
    fn compile(&self, schema: &StateSchema) -> Result<NodeExecutor>;

    /// Token/cost usage accumulated so far
    fn usage(&self) -> Result<Usage>;
}

/// Sum usage across all steps, skipping failing accessors
///
/// A failing accessor is logged with the step name and its contribution
/// skipped; the remaining steps still count.
pub fn aggregate_usage(adapters: &[Arc<dyn StepAdapter>]) -> Usage {
    let mut total = Usage::default();
    for adapter in adapters {
        match adapter.usage() {
            Ok(usage) => total = total.add(&usage),
            Err(e) => {
                tracing::warn!(step = adapter.name(), error = %e, "usage accessor failed; skipping step's contribution");
            }
        }
    }
    total
}

/// Scripted step adapter for tests and examples
///
/// Writes a fixed set of fields into the state and reports a fixed usage
/// record (or a scripted failure).
pub struct MockStepAdapter {
    name: String,
    outputs: serde_json::Map<String, serde_json::Value>,
    usage: std::result::Result<Usage, String>,
}

impl MockStepAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: serde_json::Map::new(),
            usage: Ok(Usage::default()),
        }
    }

    /// Script a field this step writes on every invocation
    pub fn with_output(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.insert(field.into(), value);
        self
    }

    /// Script the usage record the accessor reports
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Ok(usage);
        self
    }

    /// Script the usage accessor to fail
    pub fn with_failing_usage(mut self, message: impl Into<String>) -> Self {
        self.usage = Err(message.into());
        self
    }
}

impl StepAdapter for MockStepAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_shape(&self) -> Vec<FieldSpec> {
        self.outputs
            .keys()
            .map(|field| FieldSpec::json(field.clone()))
            .collect()
    }

    fn compile(&self, _schema: &StateSchema) -> Result<NodeExecutor> {
        let outputs = self.outputs.clone();
        Ok(Arc::new(move |mut state| {
            let outputs = outputs.clone();
            Box::pin(async move {
                if let Some(record) = state.as_object_mut() {
                    for (field, value) in outputs {
                        record.insert(field, value);
                    }
                }
                Ok(state)
            })
        }))
    }

    fn usage(&self) -> Result<Usage> {
        self.usage
            .clone()
            .map_err(|message| crate::error::PipelineError::Execution(message))
    }
}

impl std::fmt::Debug for MockStepAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStepAdapter")
            .field("name", &self.name)
            .field("outputs", &json!(self.outputs))
            .finish()
    }
}
