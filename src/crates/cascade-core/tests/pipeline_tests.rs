//! End-to-end pipeline tests: compile a declarative configuration, run
//! predictions through the engine, and assert on routing, aliasing,
//! checkpointing, pause/resume, and usage aggregation.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use cascade_checkpoint::{CheckpointConfig, CheckpointSaver, CheckpointSource, InMemoryCheckpointSaver};
use cascade_core::{
    FieldSpec, MockStepAdapter, NodeExecutor, PauseSignal, PipelineConfig, PipelineEngine,
    PipelineError, PredictOutcome, PredictionRequest, Result, StateSchema, StepAdapter, Usage,
    ERROR_VALUE,
};

/// Two-step screening pipeline: a stage detector that can short-circuit to
/// END on a negative classification, followed by an extractor.
fn screening_config() -> PipelineConfig {
    serde_json::from_value(json!({
        "steps": [
            {
                "name": "stage_detector",
                "adapter": "mock",
                "conditions": [
                    {
                        "value": "No",
                        "node": "END",
                        "output": {"value": "No", "explanation": "explanation"}
                    }
                ],
                "edge": {"node": "extractor", "output": {"stage": "classification"}}
            },
            {
                "name": "extractor",
                "adapter": "mock",
                "edge": {"node": "END", "output": {"final": "classification"}}
            }
        ],
        "output": {"value": "classification", "explanation": "explanation"}
    }))
    .unwrap()
}

fn screening_adapters(stage: &str) -> Vec<Arc<dyn StepAdapter>> {
    vec![
        Arc::new(
            MockStepAdapter::new("stage_detector")
                .with_output("classification", json!(stage))
                .with_output("explanation", json!("stage assessment")),
        ),
        Arc::new(
            MockStepAdapter::new("extractor")
                .with_output("classification", json!("Series A"))
                .with_output("explanation", json!("extracted from text")),
        ),
    ]
}

#[tokio::test]
async fn test_positive_path_runs_both_steps() {
    let engine = PipelineEngine::new(screening_config(), screening_adapters("Yes"), None).unwrap();

    let outcome = engine.predict(PredictionRequest::new("funding announcement")).await;
    let prediction = outcome.completed().unwrap();

    assert_eq!(prediction.value, "Series A");
    assert_eq!(prediction.explanation, "extracted from text");
    // Edge setters ran on both transitions
    assert_eq!(prediction.metadata["stage"], "Yes");
    assert_eq!(prediction.metadata["final"], "Series A");
}

#[tokio::test]
async fn test_negative_path_short_circuits_and_preserves_value() {
    let engine = PipelineEngine::new(screening_config(), screening_adapters("No"), None).unwrap();

    let outcome = engine.predict(PredictionRequest::new("unrelated text")).await;
    let prediction = outcome.completed().unwrap();

    // The conditional route stamped the value; the final mapping must not
    // overwrite it even though `classification` is the declared source.
    assert_eq!(prediction.value, "No");
    assert_eq!(prediction.explanation, "stage assessment");
    // The extractor never ran
    assert!(prediction.metadata.get("final").is_none() || prediction.metadata["final"].is_null());
    let trace = prediction.metadata["trace"].as_array().unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0]["node"], "stage_detector");
}

#[tokio::test]
async fn test_final_edge_alias_lands_in_metadata() {
    let config: PipelineConfig = serde_json::from_value(json!({
        "steps": [
            {
                "name": "classify",
                "adapter": "mock",
                "edge": {"node": "END", "output": {"final": "classification"}}
            }
        ],
        "output": {"value": "final"}
    }))
    .unwrap();
    let adapters: Vec<Arc<dyn StepAdapter>> = vec![Arc::new(
        MockStepAdapter::new("classify").with_output("classification", json!("Approved")),
    )];
    let engine = PipelineEngine::new(config, adapters, None).unwrap();

    let prediction = engine
        .predict(PredictionRequest::new("text"))
        .await
        .completed()
        .unwrap();

    assert_eq!(prediction.metadata["final"], "Approved");
    assert_eq!(prediction.value, "Approved");
}

#[tokio::test]
async fn test_null_canonical_outputs_get_defaults() {
    let config: PipelineConfig = serde_json::from_value(json!({
        "steps": [{"name": "classify", "adapter": "mock"}],
        "output": {"value": "classification"}
    }))
    .unwrap();
    let adapters: Vec<Arc<dyn StepAdapter>> = vec![Arc::new(
        MockStepAdapter::new("classify").with_output("classification", Value::Null),
    )];
    let engine = PipelineEngine::new(config, adapters, None).unwrap();

    let prediction = engine
        .predict(PredictionRequest::new("text"))
        .await
        .completed()
        .unwrap();

    assert_eq!(prediction.value, "NA");
    assert_eq!(prediction.explanation, "");
}

#[tokio::test]
async fn test_prior_results_and_batch_data_reach_the_state() {
    let config: PipelineConfig = serde_json::from_value(json!({
        "steps": [{"name": "classify", "adapter": "mock"}],
        "output": {"value": "classification"}
    }))
    .unwrap();
    let adapters: Vec<Arc<dyn StepAdapter>> = vec![Arc::new(
        MockStepAdapter::new("classify").with_output("classification", json!("Yes")),
    )];
    let engine = PipelineEngine::new(config, adapters, None).unwrap();

    let mut batch_data = Map::new();
    batch_data.insert("source_url".to_string(), json!("https://example.com/a"));
    let request = PredictionRequest::new("text")
        .with_metadata(json!({"origin": "feed"}))
        .with_prior_result("upstream", json!({"value": "Yes"}))
        .with_batch_data(batch_data);

    let prediction = engine.predict(request).await.completed().unwrap();

    assert_eq!(prediction.metadata["results"]["upstream"]["value"], "Yes");
    assert_eq!(prediction.metadata["source_url"], "https://example.com/a");
    assert_eq!(prediction.metadata["metadata"]["origin"], "feed");
}

#[tokio::test]
async fn test_checkpoints_record_every_transition() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let engine = PipelineEngine::new(
        screening_config(),
        screening_adapters("Yes"),
        Some(saver.clone()),
    )
    .unwrap();

    let request = PredictionRequest::new("funding announcement").with_thread_id("thread-1");
    engine.predict(request).await.completed().unwrap();

    let config = CheckpointConfig::new().with_thread_id("thread-1");
    let tuples = saver.list(&config, None).await.unwrap();
    // Input checkpoint plus one per executed node:
    // stage_detector, its edge setter, extractor, its edge setter.
    assert_eq!(tuples.len(), 5);

    // Newest first: the terminal checkpoint has no next node
    assert!(tuples[0].checkpoint.next.is_none());
    let oldest = tuples.last().unwrap();
    assert_eq!(oldest.metadata.source, CheckpointSource::Input);
    assert_eq!(oldest.metadata.step, -1);
    assert_eq!(oldest.checkpoint.next.as_deref(), Some("stage_detector"));
}

/// Adapter that suspends until a `batch_result` field appears in the state,
/// simulating a step backed by an external batch job.
struct BatchAdapter {
    name: String,
}

impl StepAdapter for BatchAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_shape(&self) -> Vec<FieldSpec> {
        vec![
            FieldSpec::json("classification"),
            FieldSpec::json("batch_result"),
        ]
    }

    fn compile(&self, _schema: &StateSchema) -> Result<NodeExecutor> {
        Ok(Arc::new(move |mut state: Value| {
            Box::pin(async move {
                let batch_result = state.get("batch_result").cloned().unwrap_or(Value::Null);
                if batch_result.is_null() {
                    let mut signal = PauseSignal::new("awaiting batch completion")
                        .with_external_job_id("batch-1234");
                    signal.state = state;
                    return Err(PipelineError::Paused(signal));
                }
                if let Some(record) = state.as_object_mut() {
                    record.insert("classification".to_string(), batch_result);
                }
                Ok(state)
            })
        }))
    }

    fn usage(&self) -> Result<Usage> {
        Ok(Usage::default())
    }
}

#[tokio::test]
async fn test_pause_surfaces_signal_and_resume_completes() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let config: PipelineConfig = serde_json::from_value(json!({
        "steps": [{"name": "batch_classify", "adapter": "batch"}],
        "output": {"value": "classification"}
    }))
    .unwrap();
    let adapters: Vec<Arc<dyn StepAdapter>> = vec![Arc::new(BatchAdapter {
        name: "batch_classify".to_string(),
    })];
    let engine = PipelineEngine::new(config, adapters, Some(saver.clone())).unwrap();

    let request = PredictionRequest::new("text").with_thread_id("batch-thread");
    let outcome = engine.predict(request).await;

    let signal = match outcome {
        PredictOutcome::Paused(signal) => signal,
        PredictOutcome::Completed(prediction) => {
            panic!("expected pause, got completion: {:?}", prediction)
        }
    };
    assert_eq!(signal.thread_id, "batch-thread");
    assert_eq!(signal.external_job_id.as_deref(), Some("batch-1234"));

    // The paused state was checkpointed at the suspended node
    let config = CheckpointConfig::new().with_thread_id("batch-thread");
    let latest = saver.get_tuple(&config).await.unwrap().unwrap();
    assert_eq!(latest.checkpoint.next.as_deref(), Some("batch_classify"));

    let mut resume_data = Map::new();
    resume_data.insert("batch_result".to_string(), json!("Yes"));
    let prediction = engine
        .resume("batch-thread", resume_data)
        .await
        .completed()
        .unwrap();

    assert_eq!(prediction.value, "Yes");

    // Resume left its own checkpoint marker in the history
    let tuples = saver.list(&config, None).await.unwrap();
    assert!(tuples
        .iter()
        .any(|t| t.metadata.source == CheckpointSource::Resume));
}

#[tokio::test]
async fn test_resume_without_checkpoint_is_error_prediction() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let config: PipelineConfig = serde_json::from_value(json!({
        "steps": [{"name": "classify", "adapter": "mock"}]
    }))
    .unwrap();
    let adapters: Vec<Arc<dyn StepAdapter>> = vec![Arc::new(
        MockStepAdapter::new("classify").with_output("classification", json!("Yes")),
    )];
    let engine = PipelineEngine::new(config, adapters, Some(saver)).unwrap();

    let prediction = engine
        .resume("never-seen", Map::new())
        .await
        .completed()
        .unwrap();

    assert_eq!(prediction.value, ERROR_VALUE);
    assert!(prediction.explanation.contains("never-seen"));
}

/// Adapter whose executor always fails, for error-mapping coverage.
struct FailingAdapter;

impl StepAdapter for FailingAdapter {
    fn name(&self) -> &str {
        "broken"
    }

    fn state_shape(&self) -> Vec<FieldSpec> {
        vec![FieldSpec::json("classification")]
    }

    fn compile(&self, _schema: &StateSchema) -> Result<NodeExecutor> {
        Ok(Arc::new(|_state: Value| {
            Box::pin(async move {
                Err(PipelineError::Execution(
                    "model endpoint unreachable".to_string(),
                ))
            })
        }))
    }

    fn usage(&self) -> Result<Usage> {
        Ok(Usage {
            prompt_tokens: 40,
            completion_tokens: 0,
            total_tokens: 40,
            successful_requests: 0,
            cached_tokens: 0,
        })
    }
}

#[tokio::test]
async fn test_step_failure_maps_to_error_prediction() {
    let config: PipelineConfig = serde_json::from_value(json!({
        "steps": [{"name": "broken", "adapter": "failing"}]
    }))
    .unwrap();
    let engine =
        PipelineEngine::new(config, vec![Arc::new(FailingAdapter) as Arc<dyn StepAdapter>], None)
            .unwrap();

    let prediction = engine
        .predict(PredictionRequest::new("text"))
        .await
        .completed()
        .unwrap();

    assert_eq!(prediction.value, ERROR_VALUE);
    assert!(prediction.explanation.contains("model endpoint unreachable"));
    assert!(prediction.explanation.contains("broken"));
    // Tokens spent before the failure still show up on the error prediction
    assert_eq!(prediction.metadata["usage"]["prompt_tokens"], 40);
}

#[tokio::test]
async fn test_usage_aggregates_across_steps() {
    let usage_a = Usage {
        prompt_tokens: 100,
        completion_tokens: 20,
        total_tokens: 120,
        successful_requests: 1,
        cached_tokens: 0,
    };
    let usage_b = Usage {
        prompt_tokens: 50,
        completion_tokens: 10,
        total_tokens: 60,
        successful_requests: 2,
        cached_tokens: 5,
    };
    let engine = PipelineEngine::new(
        screening_config(),
        vec![
            Arc::new(
                MockStepAdapter::new("stage_detector")
                    .with_output("classification", json!("Yes"))
                    .with_usage(usage_a),
            ),
            Arc::new(
                MockStepAdapter::new("extractor")
                    .with_output("classification", json!("Series A"))
                    .with_usage(usage_b),
            ),
        ],
        None,
    )
    .unwrap();

    let prediction = engine
        .predict(PredictionRequest::new("text"))
        .await
        .completed()
        .unwrap();

    let usage = &prediction.metadata["usage"];
    assert_eq!(usage["prompt_tokens"], 150);
    assert_eq!(usage["total_tokens"], 180);
    assert_eq!(usage["successful_requests"], 3);
    assert_eq!(usage["cached_tokens"], 5);
}

#[tokio::test]
async fn test_failing_usage_accessor_does_not_zero_the_total() {
    let engine = PipelineEngine::new(
        screening_config(),
        vec![
            Arc::new(
                MockStepAdapter::new("stage_detector")
                    .with_output("classification", json!("Yes"))
                    .with_usage(Usage {
                        prompt_tokens: 100,
                        completion_tokens: 20,
                        total_tokens: 120,
                        successful_requests: 1,
                        cached_tokens: 0,
                    }),
            ),
            Arc::new(
                MockStepAdapter::new("extractor")
                    .with_output("classification", json!("Series A"))
                    .with_failing_usage("usage backend offline"),
            ),
        ],
        None,
    )
    .unwrap();

    let prediction = engine
        .predict(PredictionRequest::new("text"))
        .await
        .completed()
        .unwrap();

    assert_eq!(prediction.metadata["usage"]["total_tokens"], 120);
}
