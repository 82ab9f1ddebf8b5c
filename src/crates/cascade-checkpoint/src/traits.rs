//! Extensible checkpoint storage trait for custom backend implementations
//!
//! This module defines the **[`CheckpointSaver`]** trait - the core abstraction for
//! implementing checkpoint persistence backends. The trait lets the execution engine
//! persist pipeline progress to any storage system (PostgreSQL, SQLite, Redis, S3,
//! etc.) while the engine itself stays backend-agnostic.
//!
//! # Overview
//!
//! The checkpoint system provides:
//!
//! - **State Persistence** - Save and restore pipeline execution state
//! - **Pause/Resume** - Suspend a prediction awaiting an external batch job,
//!   then pick it back up from the last written snapshot
//! - **Fault Recovery** - Resume execution after crashes or failures
//! - **Audit Trails** - Append-only per-thread checkpoint history
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  cascade-core                                 │
//! │  ┌──────────────────────────────────┐         │
//! │  │  PipelineEngine execution        │         │
//! │  │  • Execute node                  │         │
//! │  │  • Snapshot state (defensive)    │         │
//! │  │  • Call saver.put()              │         │
//! │  └───────────┬──────────────────────┘         │
//! └──────────────┼────────────────────────────────┘
//!                │ CheckpointSaver trait
//!                ↓
//! ┌───────────────────────────────────────────────┐
//! │  Storage backend                              │
//! │  • InMemoryCheckpointSaver (this crate)       │
//! │  • NoopCheckpointSaver (this crate)           │
//! │  • Your database-backed implementation        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync` and safe for concurrent use: the one
//! saver instance is shared across every concurrently running prediction.
//! Within a single thread id, writes must be strictly ordered (one in flight
//! at a time); writes for different thread ids may interleave freely.
//!
//! # Implementing a Custom Backend
//!
//! ```rust,ignore
//! use cascade_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
//!     CheckpointTuple, Result,
//! };
//! use async_trait::async_trait;
//!
//! struct PostgresCheckpointSaver {
//!     pool: sqlx::PgPool,
//! }
//!
//! #[async_trait]
//! impl CheckpointSaver for PostgresCheckpointSaver {
//!     async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
//!         // SELECT ... WHERE thread_id = $1 ORDER BY created_at DESC LIMIT 1
//!         # unimplemented!()
//!     }
//!
//!     async fn list(
//!         &self,
//!         config: &CheckpointConfig,
//!         limit: Option<usize>,
//!     ) -> Result<Vec<CheckpointTuple>> {
//!         # unimplemented!()
//!     }
//!
//!     async fn put(
//!         &self,
//!         config: &CheckpointConfig,
//!         checkpoint: Checkpoint,
//!         metadata: CheckpointMetadata,
//!     ) -> Result<CheckpointConfig> {
//!         // INSERT INTO checkpoints (thread_id, checkpoint_id, payload, metadata) ...
//!         # unimplemented!()
//!     }
//! }
//! ```

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple},
    error::Result,
};
use async_trait::async_trait;

/// Core trait for implementing checkpoint storage backends
///
/// Implementations must provide `get_tuple`, `list`, and `put`; `get` has a
/// default implementation in terms of `get_tuple`. Checkpoints are append-only:
/// `put` records a new snapshot and must never mutate an existing one.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch just the checkpoint addressed by `config`
    ///
    /// Returns the latest checkpoint for the thread when no `checkpoint_id`
    /// is set, or `None` when the thread has no history.
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Retrieve a complete checkpoint tuple with metadata
    ///
    /// - `checkpoint_id` set: return that specific snapshot
    /// - only `thread_id` set: return the **latest** snapshot for the thread
    /// - no matching snapshot: `Ok(None)`, never an error
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints for a thread, newest first
    ///
    /// `limit` caps the number of results; `None` returns the full history.
    async fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Append a checkpoint to the thread's history
    ///
    /// The snapshot inside `checkpoint` has already passed through the
    /// defensive serializer. Returns the config of the stored checkpoint,
    /// with its `checkpoint_id` filled in.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;
}
