//! Checkpoint data structures
//!
//! A [`Checkpoint`] is a durable snapshot of pipeline progress, keyed by a
//! thread identifier. Checkpoints are append-only per thread: each state
//! transition produces a new checkpoint, and history is never rewritten.
//!
//! # Core Types
//!
//! - [`Checkpoint`] - Serialized state snapshot at a point in time
//! - [`CheckpointConfig`] - Thread id / namespace / checkpoint id addressing
//! - [`CheckpointMetadata`] - Provenance (source, step counter, extras)
//! - [`CheckpointTuple`] - A checkpoint together with its config and metadata

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a checkpoint within a thread
pub type CheckpointId = String;

/// Where a checkpoint came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Written when the initial state was built from caller input
    Input,
    /// Written on a state-machine step transition
    Loop,
    /// Written when a paused thread was resumed
    Resume,
}

/// Metadata recorded alongside each checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Provenance of this checkpoint
    pub source: CheckpointSource,
    /// Step counter within the thread (-1 for the input checkpoint)
    pub step: i64,
    /// Free-form extra metadata
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource, step: i64) -> Self {
        Self {
            source,
            step,
            extra: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self::new(CheckpointSource::Loop, 0)
    }
}

/// A snapshot of pipeline state at one point in time
///
/// The `state` payload has already passed through the defensive serializer
/// by the time a checkpoint is constructed; it must round-trip through
/// [`SerializerProtocol`](crate::serializer::SerializerProtocol) unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique id of this checkpoint
    pub id: CheckpointId,
    /// Creation timestamp (RFC 3339)
    pub ts: String,
    /// Serialized state snapshot
    pub state: serde_json::Value,
    /// Name of the node the thread will execute next, if it has not finished
    pub next: Option<String>,
}

impl Checkpoint {
    /// Create a checkpoint with a fresh id and the current timestamp
    pub fn new(state: serde_json::Value, next: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now().to_rfc3339(),
            state,
            next,
        }
    }
}

/// Addressing for checkpoint reads and writes
///
/// A config with only a `thread_id` addresses the latest checkpoint for that
/// thread; adding a `checkpoint_id` pins a specific historical snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Thread identifier (required for reads and writes)
    pub thread_id: Option<String>,
    /// Namespace within the thread, for nested or scoped execution
    #[serde(default)]
    pub checkpoint_ns: String,
    /// Specific checkpoint to address; `None` means "latest"
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = checkpoint_ns.into();
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }
}

/// A checkpoint together with its addressing and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTuple {
    /// Actual config of the stored checkpoint (with its real checkpoint id)
    pub config: CheckpointConfig,
    /// The snapshot itself
    pub checkpoint: Checkpoint,
    /// Provenance metadata
    pub metadata: CheckpointMetadata,
    /// Config of the previous checkpoint in this thread, for history traversal
    pub parent_config: Option<CheckpointConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_ids_are_unique() {
        let a = Checkpoint::new(json!({}), None);
        let b = Checkpoint::new(json!({}), None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_config_builder() {
        let config = CheckpointConfig::new()
            .with_thread_id("thread-1")
            .with_checkpoint_ns("ns")
            .with_checkpoint_id("cp-1");

        assert_eq!(config.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(config.checkpoint_ns, "ns");
        assert_eq!(config.checkpoint_id.as_deref(), Some("cp-1"));
    }

    #[test]
    fn test_checkpoint_round_trips_through_json() {
        let checkpoint = Checkpoint::new(json!({"text": "hello", "results": {}}), Some("extract".into()));
        let bytes = serde_json::to_vec(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(restored.id, checkpoint.id);
        assert_eq!(restored.state, checkpoint.state);
        assert_eq!(restored.next.as_deref(), Some("extract"));
    }

    #[test]
    fn test_metadata_extra() {
        let metadata = CheckpointMetadata::new(CheckpointSource::Input, -1)
            .with_extra("node", json!("classify"));

        assert_eq!(metadata.step, -1);
        assert_eq!(metadata.extra["node"], json!("classify"));
    }
}
