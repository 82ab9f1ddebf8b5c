//! # cascade-checkpoint - State Persistence for Pipeline Execution
//!
//! **Trait-based checkpoint abstractions and implementations** for persisting and
//! restoring pipeline execution state. This crate is what lets a long-running or
//! externally-paused prediction resume exactly where it left off.
//!
//! ## Overview
//!
//! Checkpoints are **snapshots of pipeline state** captured after each step
//! transition, keyed by a thread identifier. They enable:
//!
//! - **Pause/Resume** - Suspend a prediction awaiting an external batch job,
//!   then continue from the last written snapshot
//! - **Fault Recovery** - Resume from failures without restarting
//! - **Audit Trails** - Append-only per-thread state history
//!
//! ## Core Concepts
//!
//! ### 1. CheckpointSaver Trait
//!
//! The [`CheckpointSaver`] trait defines the interface for persistence backends:
//!
//! - **`put()`** - Append a checkpoint with config and metadata
//! - **`get_tuple()`** - Retrieve a checkpoint by config (latest, or pinned by id)
//! - **`list()`** - Query per-thread checkpoint history, newest first
//!
//! This crate provides [`InMemoryCheckpointSaver`] as the reference backend and
//! [`NoopCheckpointSaver`] for running without persistence; production deployments
//! implement [`CheckpointSaver`] over PostgreSQL, Redis, or whatever else the
//! operation runs on.
//!
//! ### 2. Defensive Serialization
//!
//! Every snapshot passes through the defensive serializer before a write:
//! [`snapshot`] converts any serializable value into storable JSON, replacing
//! values whose serialization fails with a stable textual placeholder rather
//! than failing the write, and [`sanitize`] bounds pathological nesting. If a
//! backend still rejects a payload, [`dumps_traced`] logs the offending field
//! path before the error surfaces.
//!
//! ## Quick Start
//!
//! ```rust
//! use cascade_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
//!     CheckpointSource, InMemoryCheckpointSaver,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!     let config = CheckpointConfig::new().with_thread_id("thread-123");
//!
//!     saver
//!         .put(
//!             &config,
//!             Checkpoint::new(json!({"text": "hello"}), Some("classify".into())),
//!             CheckpointMetadata::new(CheckpointSource::Input, -1),
//!         )
//!         .await?;
//!
//!     let latest = saver.get(&config).await?.expect("just written");
//!     assert_eq!(latest.next.as_deref(), Some("classify"));
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple,
};
pub use error::{CheckpointError, Result};
pub use memory::{InMemoryCheckpointSaver, NoopCheckpointSaver};
pub use serializer::{
    dumps_traced, sanitize, snapshot, BincodeSerializer, JsonSerializer, SerializerProtocol,
};
pub use traits::CheckpointSaver;
