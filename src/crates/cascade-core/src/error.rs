//! Error types and error handling for pipeline operations
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! PipelineError
//! ├── Configuration      - Bad/missing step reference, schema type conflict
//! ├── NodeExecution      - A step's sub-workflow failed
//! ├── Execution          - General execution errors
//! ├── Paused             - Deliberate suspension (not a failure)
//! ├── Checkpoint         - Persistence errors
//! └── Serialization      - JSON errors
//! ```
//!
//! # Propagation Policy
//!
//! Configuration errors are fatal and surface at compile time, before any
//! model call is made. Runtime step errors are caught at the engine boundary
//! and translated into an error prediction; callers of
//! [`predict`](crate::engine::PipelineEngine::predict) never see a raw error.
//! [`Paused`](PipelineError::Paused) is the one deliberate exception: it always
//! propagates, carrying enough state to resume the thread later.

use crate::engine::PauseSignal;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur during pipeline compilation and execution
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Pipeline configuration is invalid
    ///
    /// Raised at compile time, never retried. Covers bad step references,
    /// duplicate step names, and schema merge conflicts.
    #[error("Invalid pipeline configuration: {0}")]
    Configuration(String),

    /// A step's compiled sub-workflow failed during execution
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Name of the node that failed
        node: String,
        /// Error message from node execution
        error: String,
    },

    /// Generic execution error without specific node context
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Execution suspended awaiting an external completion
    ///
    /// This is **not a failure** but a deliberate pause; it is never logged
    /// as an error and always propagates to the caller unchanged.
    #[error("Pipeline paused on thread '{}': {}", .0.thread_id, .0.message)]
    Paused(PauseSignal),

    /// Checkpoint persistence failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] cascade_checkpoint::CheckpointError),

    /// State (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
