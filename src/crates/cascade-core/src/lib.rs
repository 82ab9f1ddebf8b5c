//! # Cascade Core
//!
//! Graph compiler and execution engine for declarative multi-step
//! classification and extraction pipelines.
//!
//! A pipeline is declared as an ordered list of steps with optional
//! conditional routing and output aliasing. Compilation merges the steps'
//! state shapes into a single [`StateSchema`](schema::StateSchema), lowers
//! the declaration into an executable [`Graph`](graph::Graph) of step and
//! value-setter nodes, and binds a [`FinalOutput`](output::FinalOutput)
//! mapping. The [`PipelineEngine`](engine::PipelineEngine) then serves
//! predictions against the compiled graph, checkpointing state after every
//! node transition.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use cascade_core::{MockStepAdapter, PipelineConfig, PipelineEngine, PredictionRequest, StepAdapter};
//!
//! # async fn run() -> cascade_core::Result<()> {
//! let config: PipelineConfig = serde_json::from_value(json!({
//!     "steps": [
//!         {"name": "classify", "adapter": "mock", "output": {"stage": "classification"}}
//!     ],
//!     "output": {"value": "classification"}
//! }))?;
//!
//! let adapters: Vec<Arc<dyn StepAdapter>> = vec![Arc::new(
//!     MockStepAdapter::new("classify").with_output("classification", json!("Yes")),
//! )];
//!
//! let engine = PipelineEngine::new(config, adapters, None)?;
//! let outcome = engine.predict(PredictionRequest::new("text to classify")).await;
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod output;
pub mod schema;
pub mod step;
pub mod value_setter;

pub use compiler::compile_graph;
pub use config::{AliasMap, ConditionDeclaration, EdgeDeclaration, PipelineConfig, StepDeclaration};
pub use engine::{
    PauseSignal, Prediction, PredictionRequest, PredictOutcome, PipelineEngine, StepTrace,
    ERROR_VALUE,
};
pub use error::{PipelineError, Result};
pub use graph::{Edge, Graph, NodeExecutor, NodeId, NodeKind, NodeSpec, RouterFn, END, START};
pub use output::{FinalOutput, NEGATIVE_VALUE};
pub use schema::{FieldKind, FieldSpec, StateSchema};
pub use step::{aggregate_usage, MockStepAdapter, StepAdapter, Usage};
pub use value_setter::{apply_aliases, make_value_setter};
