//! In-memory and no-op checkpoint saver implementations
//!
//! [`InMemoryCheckpointSaver`] is the reference backend: append-only per-thread
//! history behind a `tokio::sync::RwLock`, suitable for tests and for pipelines
//! that do not need durability across process restarts.
//!
//! [`NoopCheckpointSaver`] satisfies the same interface and discards every
//! write; it is what an engine uses when no persistence backend is configured.

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple},
    error::{CheckpointError, Result},
    traits::CheckpointSaver,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<CheckpointTuple>>>>;

/// Thread-safe in-memory checkpoint storage
///
/// Checkpoints are grouped by thread id and appended in write order, so the
/// last entry for a thread is always its latest snapshot. The single write
/// lock keeps writes within a thread strictly ordered; reads take a shared
/// lock and may run concurrently.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of threads being tracked
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Get the total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

fn require_thread_id(config: &CheckpointConfig) -> Result<&str> {
    config
        .thread_id
        .as_deref()
        .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let storage = self.storage.read().await;
        let thread_id = require_thread_id(config)?;

        let Some(entries) = storage.get(thread_id) else {
            return Ok(None);
        };

        let entry = match &config.checkpoint_id {
            Some(checkpoint_id) => entries.iter().find(|e| &e.checkpoint.id == checkpoint_id),
            None => entries.last(),
        };

        Ok(entry.cloned())
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let storage = self.storage.read().await;
        let thread_id = require_thread_id(config)?;

        let mut results: Vec<CheckpointTuple> = storage
            .get(thread_id)
            .map(|entries| entries.iter().rev().cloned().collect())
            .unwrap_or_default();

        if let Some(limit) = limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let mut storage = self.storage.write().await;
        let thread_id = require_thread_id(config)?.to_string();

        let entries = storage.entry(thread_id.clone()).or_default();
        let parent_config = entries.last().map(|entry| entry.config.clone());

        let stored_config = CheckpointConfig {
            thread_id: Some(thread_id),
            checkpoint_ns: config.checkpoint_ns.clone(),
            checkpoint_id: Some(checkpoint.id.clone()),
        };

        entries.push(CheckpointTuple {
            config: stored_config.clone(),
            checkpoint,
            metadata,
            parent_config,
        });

        Ok(stored_config)
    }
}

/// Checkpoint saver that discards all writes
///
/// Used when no persistence backend is configured: `put` succeeds and drops
/// the snapshot, reads always come back empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCheckpointSaver;

impl NoopCheckpointSaver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CheckpointSaver for NoopCheckpointSaver {
    async fn get_tuple(&self, _config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        Ok(None)
    }

    async fn list(
        &self,
        _config: &CheckpointConfig,
        _limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        Ok(Vec::new())
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        _metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        Ok(CheckpointConfig {
            thread_id: config.thread_id.clone(),
            checkpoint_ns: config.checkpoint_ns.clone(),
            checkpoint_id: Some(checkpoint.id),
        })
    }
}
