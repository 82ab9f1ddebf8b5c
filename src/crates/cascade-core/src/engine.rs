//! Execution engine
//!
//! [`PipelineEngine`] compiles a pipeline once - schema merge, step adapter
//! compilation, graph compilation, final-output mapping - and then serves
//! predictions against the immutable compiled graph. One prediction executes
//! on a single logical task; step sub-workflows run sequentially within it,
//! and multiple predictions run concurrently with no shared mutable state
//! between them except the checkpoint saver.
//!
//! The prediction state machine:
//!
//! ```text
//! Build Initial State ──→ Invoke Compiled Graph ──→ Map Terminal State to Result
//!        │                        │
//!        │                        ├──(Pause)──→ propagate PauseSignal unchanged
//!        └────────(error)─────────┴──(error)──→ map to error Result
//! ```
//!
//! Callers never receive a raw error from [`predict`](PipelineEngine::predict):
//! anything other than a pause is caught, logged with the thread id, and
//! translated into a prediction carrying the fixed error marker. The pause
//! signal is the one deliberate exception, and the engine's cleanup
//! obligation (the in-flight guard) runs on every exit path - normal return,
//! error, and pause alike.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use cascade_checkpoint::{
    sanitize, snapshot, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
    CheckpointSource,
};

use crate::compiler::compile_graph;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::graph::{Graph, NodeKind, END};
use crate::output::FinalOutput;
use crate::schema::StateSchema;
use crate::step::{aggregate_usage, StepAdapter};

/// Marker value of a prediction produced from a caught error
pub const ERROR_VALUE: &str = "ERROR";

/// A deliberate mid-pipeline suspension
///
/// Raised by a step whose work continues externally (an asynchronous batch
/// job); carries enough state to resume the thread once the external work
/// completes. Not a failure: never logged as one, always propagated to the
/// caller unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseSignal {
    /// Thread the suspension belongs to
    pub thread_id: String,
    /// Partial state at the moment of suspension
    pub state: Value,
    /// Identifier of the external job being awaited, if any
    pub external_job_id: Option<String>,
    /// Human-readable reason for the pause
    pub message: String,
}

impl PauseSignal {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            thread_id: String::new(),
            state: Value::Null,
            external_job_id: None,
            message: message.into(),
        }
    }

    pub fn with_external_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.external_job_id = Some(job_id.into());
        self
    }
}

/// Input to one prediction call
#[derive(Debug, Clone, Default)]
pub struct PredictionRequest {
    /// Text to run the pipeline over (required input)
    pub text: String,
    /// Caller-supplied metadata, arbitrary depth
    pub metadata: Value,
    /// Prior results keyed by upstream step name
    pub prior_results: HashMap<String, Value>,
    /// Thread identifier; generated when absent
    pub thread_id: Option<String>,
    /// Extra fields merged into the initial state
    pub batch_data: Option<Map<String, Value>>,
}

impl PredictionRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_prior_result(mut self, step: impl Into<String>, value: Value) -> Self {
        self.prior_results.insert(step.into(), value);
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_batch_data(mut self, batch_data: Map<String, Value>) -> Self {
        self.batch_data = Some(batch_data);
        self
    }
}

/// Per-step input/output snapshot recorded during one prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub node: String,
    pub input: Value,
    pub output: Value,
}

/// The structured result of a completed prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub value: Value,
    pub explanation: String,
    pub confidence: Option<f64>,
    /// Every terminal-state field not surfaced above, plus trace and usage
    pub metadata: Map<String, Value>,
}

/// Outcome of a prediction call: finished, or deliberately suspended
#[derive(Debug, Clone)]
pub enum PredictOutcome {
    Completed(Prediction),
    Paused(PauseSignal),
}

impl PredictOutcome {
    /// Unwrap a completed prediction, for callers that do not use pauses
    pub fn completed(self) -> Option<Prediction> {
        match self {
            PredictOutcome::Completed(prediction) => Some(prediction),
            PredictOutcome::Paused(_) => None,
        }
    }
}

/// Decrements the engine's in-flight gauge when dropped
///
/// This is the engine's scoped cleanup obligation: it runs on every exit
/// path out of a prediction, including pause and error.
struct InFlightGuard {
    gauge: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn new(gauge: Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self { gauge }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Compiled pipeline, ready to serve predictions
///
/// Compilation happens once in [`new`](Self::new); afterwards the engine is
/// immutable and safe to share across concurrent predictions.
pub struct PipelineEngine {
    config: PipelineConfig,
    adapters: Vec<Arc<dyn StepAdapter>>,
    schema: StateSchema,
    graph: Graph,
    final_output: FinalOutput,
    saver: Option<Arc<dyn CheckpointSaver>>,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("config", &self.config)
            .field("schema", &self.schema)
            .field("graph", &self.graph)
            .field("final_output", &self.final_output)
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    /// Compile a pipeline from its configuration and step adapters
    ///
    /// `adapters` must pair one-to-one, in order, with `config.steps`.
    /// All configuration errors surface here, before any model call is made.
    pub fn new(
        config: PipelineConfig,
        adapters: Vec<Arc<dyn StepAdapter>>,
        saver: Option<Arc<dyn CheckpointSaver>>,
    ) -> Result<Self> {
        config.validate()?;
        if adapters.len() != config.steps.len() {
            return Err(PipelineError::configuration(format!(
                "{} steps declared but {} adapters supplied",
                config.steps.len(),
                adapters.len()
            )));
        }
        for (step, adapter) in config.steps.iter().zip(&adapters) {
            if step.name != adapter.name() {
                return Err(PipelineError::configuration(format!(
                    "adapter order mismatch: expected '{}', got '{}'",
                    step.name,
                    adapter.name()
                )));
            }
        }

        let shapes: Vec<(String, Vec<_>)> = adapters
            .iter()
            .map(|adapter| (adapter.name().to_string(), adapter.state_shape()))
            .collect();
        let schema = StateSchema::merge(&shapes, &config)?;

        let mut executors = Vec::with_capacity(adapters.len());
        for adapter in &adapters {
            executors.push((adapter.name().to_string(), adapter.compile(&schema)?));
        }
        let graph = compile_graph(&config, executors)?;
        let final_output = FinalOutput::new(&config);

        Ok(Self {
            config,
            adapters,
            schema,
            graph,
            final_output,
            saver,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The merged state schema this pipeline runs over
    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// The pipeline configuration this engine was compiled from
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of predictions currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run one prediction to completion, pause, or error result
    #[tracing::instrument(skip(self, request), fields(steps = self.config.steps.len()))]
    pub async fn predict(&self, request: PredictionRequest) -> PredictOutcome {
        let _guard = InFlightGuard::new(Arc::clone(&self.in_flight));

        let thread_id = request
            .thread_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!(thread_id = %thread_id, "starting prediction");

        let state = self.build_initial_state(&request);
        if let Err(e) = self
            .write_checkpoint(&thread_id, &state, self.entry_node(), CheckpointSource::Input, -1)
            .await
        {
            return PredictOutcome::Completed(self.error_prediction(&thread_id, &e));
        }

        let start = self.entry_node().to_string();
        self.execute_from(thread_id, state, start, 0).await
    }

    /// Resume a paused thread from its latest checkpoint
    ///
    /// `resume_data` fields are merged over the checkpointed state before the
    /// graph re-enters at the node recorded in the checkpoint.
    #[tracing::instrument(skip(self, resume_data))]
    pub async fn resume(&self, thread_id: &str, resume_data: Map<String, Value>) -> PredictOutcome {
        let _guard = InFlightGuard::new(Arc::clone(&self.in_flight));
        tracing::info!(thread_id = %thread_id, "resuming prediction");

        let Some(saver) = &self.saver else {
            let e = PipelineError::Execution(
                "cannot resume: no checkpoint backend configured".to_string(),
            );
            return PredictOutcome::Completed(self.error_prediction(thread_id, &e));
        };

        let config = CheckpointConfig::new().with_thread_id(thread_id);
        let loaded = match saver.get_tuple(&config).await {
            Ok(Some(tuple)) => tuple,
            Ok(None) => {
                let e = PipelineError::Execution(format!(
                    "cannot resume: no checkpoint for thread '{}'",
                    thread_id
                ));
                return PredictOutcome::Completed(self.error_prediction(thread_id, &e));
            }
            Err(e) => {
                return PredictOutcome::Completed(
                    self.error_prediction(thread_id, &PipelineError::Checkpoint(e)),
                );
            }
        };

        let mut state = loaded.checkpoint.state;
        if let Some(record) = state.as_object_mut() {
            for (key, value) in resume_data {
                record.insert(key, sanitize(&value));
            }
        }
        let next = loaded
            .checkpoint
            .next
            .unwrap_or_else(|| self.entry_node().to_string());
        let step = loaded.metadata.step + 1;

        if let Err(e) = self
            .write_checkpoint(thread_id, &state, &next, CheckpointSource::Resume, step)
            .await
        {
            return PredictOutcome::Completed(self.error_prediction(thread_id, &e));
        }

        self.execute_from(thread_id.to_string(), state, next, step + 1).await
    }

    fn entry_node(&self) -> &str {
        // The compiled graph always has an entry: config.validate rejected
        // empty step lists before compilation.
        self.graph.entry.as_deref().unwrap_or(END)
    }

    /// Build the initial state record for one prediction
    ///
    /// Caller-supplied metadata and prior results pass through the defensive
    /// serializer *before* the record is constructed, so a later checkpoint
    /// write cannot fail on data the caller already handed over successfully.
    fn build_initial_state(&self, request: &PredictionRequest) -> Value {
        let mut overrides = Map::new();
        overrides.insert("text".to_string(), Value::String(request.text.clone()));
        overrides.insert("metadata".to_string(), sanitize(&request.metadata));

        let mut results = Map::new();
        for (step, value) in &request.prior_results {
            results.insert(step.clone(), sanitize(value));
        }
        overrides.insert("results".to_string(), Value::Object(results));

        if let Some(batch_data) = &request.batch_data {
            for (key, value) in batch_data {
                overrides.insert(key.clone(), sanitize(value));
            }
        }

        self.schema.initial_state(overrides)
    }

    /// Walk the compiled graph from `current` until END, pause, or error
    async fn run_graph(
        &self,
        thread_id: &str,
        mut state: Value,
        mut current: String,
        mut step: i64,
    ) -> Result<(Value, Vec<StepTrace>)> {
        let mut trace = Vec::new();

        while current != END {
            let node = self.graph.nodes.get(&current).ok_or_else(|| {
                PipelineError::Execution(format!("unknown node '{}'", current))
            })?;

            let input_snapshot = match node.kind {
                NodeKind::Step => Some(sanitize(&state)),
                NodeKind::ValueSetter => None,
            };

            state = match (node.executor)(state).await {
                Ok(state) => state,
                Err(PipelineError::Paused(mut signal)) => {
                    if signal.thread_id.is_empty() {
                        signal.thread_id = thread_id.to_string();
                    }
                    // Re-enter the paused node on resume
                    self.write_checkpoint(
                        thread_id,
                        &signal.state,
                        &current,
                        CheckpointSource::Loop,
                        step,
                    )
                    .await?;
                    tracing::info!(
                        thread_id = %thread_id,
                        node = %current,
                        "pipeline paused awaiting external completion"
                    );
                    return Err(PipelineError::Paused(signal));
                }
                Err(e) => {
                    return Err(PipelineError::node_execution(&current, e.to_string()));
                }
            };

            if let Some(input) = input_snapshot {
                trace.push(StepTrace {
                    node: current.clone(),
                    input,
                    output: sanitize(&state),
                });
            }

            let next = self.graph.resolve_next(&current, &state)?;
            self.write_checkpoint(thread_id, &state, &next, CheckpointSource::Loop, step)
                .await?;
            step += 1;
            current = next;
        }

        Ok((state, trace))
    }

    async fn execute_from(
        &self,
        thread_id: String,
        state: Value,
        start: String,
        start_step: i64,
    ) -> PredictOutcome {
        match self.run_graph(&thread_id, state, start, start_step).await {
            Ok((terminal, trace)) => {
                PredictOutcome::Completed(self.map_terminal_state(&thread_id, terminal, trace))
            }
            Err(PipelineError::Paused(signal)) => PredictOutcome::Paused(signal),
            Err(e) => PredictOutcome::Completed(self.error_prediction(&thread_id, &e)),
        }
    }

    /// Map the terminal state into the caller-facing prediction
    ///
    /// Canonical fields first, then every remaining terminal-state field not
    /// already surfaced - no step-produced data is silently dropped - then
    /// the trace and aggregated usage. The assembled metadata passes through
    /// the defensive serializer once more before it is returned.
    fn map_terminal_state(
        &self,
        thread_id: &str,
        mut state: Value,
        trace: Vec<StepTrace>,
    ) -> Prediction {
        self.final_output.apply(&mut state);

        let record = state.as_object().cloned().unwrap_or_default();
        let value = record.get("value").cloned().unwrap_or(Value::Null);
        let explanation = record
            .get("explanation")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let confidence = record.get("confidence").and_then(|v| v.as_f64());

        let mut metadata = Map::new();
        metadata.insert("thread_id".to_string(), json!(thread_id));
        for well_known in ["value", "classification", "explanation", "confidence"] {
            if let Some(found) = record.get(well_known) {
                metadata.insert(well_known.to_string(), found.clone());
            }
        }
        for (key, found) in &record {
            if !metadata.contains_key(key) {
                metadata.insert(key.clone(), found.clone());
            }
        }
        metadata.insert("trace".to_string(), snapshot(&trace));
        metadata.insert("usage".to_string(), json!(aggregate_usage(&self.adapters)));

        let metadata = match sanitize(&Value::Object(metadata)) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        tracing::info!(thread_id = %thread_id, "prediction completed");
        Prediction {
            value,
            explanation,
            confidence,
            metadata,
        }
    }

    /// Translate a caught error into the fixed error-marker prediction
    fn error_prediction(&self, thread_id: &str, error: &PipelineError) -> Prediction {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        tracing::error!(
            thread_id = %thread_id,
            error = %error,
            causes = ?causes,
            "prediction failed"
        );

        let mut metadata = Map::new();
        metadata.insert("thread_id".to_string(), json!(thread_id));
        metadata.insert("error".to_string(), json!(error.to_string()));
        if !causes.is_empty() {
            metadata.insert("error_causes".to_string(), json!(causes));
        }
        metadata.insert("usage".to_string(), json!(aggregate_usage(&self.adapters)));

        Prediction {
            value: Value::String(ERROR_VALUE.to_string()),
            explanation: error.to_string(),
            confidence: None,
            metadata,
        }
    }

    async fn write_checkpoint(
        &self,
        thread_id: &str,
        state: &Value,
        next: &str,
        source: CheckpointSource,
        step: i64,
    ) -> Result<()> {
        let Some(saver) = &self.saver else {
            return Ok(());
        };
        let config = CheckpointConfig::new().with_thread_id(thread_id);
        let next = if next == END { None } else { Some(next.to_string()) };
        let metadata =
            CheckpointMetadata::new(source, step).with_extra("node", json!(next.clone()));
        saver
            .put(&config, Checkpoint::new(sanitize(state), next), metadata)
            .await?;
        Ok(())
    }
}
