// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Drives continuous forward sync and resumable re-sync.
//!
//! Every batch is bounded by the confirmed head (chain head minus
//! confirmation depth) and must pass chain validation before the checkpoint
//! advances. The checkpoint status is a small state machine:
//! ACTIVE ⇄ PAUSED, ACTIVE→ERROR on unrecoverable batch failure,
//! ERROR/ACTIVE→RESYNCING on a resync trigger, RESYNCING→ACTIVE on
//! completion.

use crate::config::ReconcilerConfig;
use crate::error::{ReconcilerError, ReconcilerResult};
use crate::events::truncate_hash;
use crate::ingestor::EventIngestor;
use crate::lock_store::{JobLockStore, ResyncProgress};
use crate::metrics::ReconcilerMetrics;
use crate::reconciler::StateReconciler;
use crate::retry_with_max_elapsed_time;
use crate::store::{CheckpointStore, SyncCheckpoint, SyncStatus};
use crate::validator::BlockValidator;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one bounded sync batch
#[derive(Debug, Clone, Default)]
pub struct SyncBatchOutcome {
    pub from_block: u64,
    pub to_block: u64,
    /// Whether the checkpoint advanced
    pub advanced: bool,
    pub events_stored: usize,
    pub events_processed: usize,
    pub events_errored: usize,
    /// Validation errors when the batch was rejected
    pub errors: Vec<String>,
}

/// Result of a completed resync loop
#[derive(Debug, Clone, Default)]
pub struct ResyncOutcome {
    pub from_block: u64,
    pub to_block: u64,
    pub batches: u32,
    pub events_processed: usize,
}

/// Operator-facing snapshot of sync health
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSnapshot {
    pub checkpoint: Option<SyncCheckpoint>,
    /// Chain heads, absent when the chain client is unreachable
    pub latest_block: Option<u64>,
    pub confirmed_block: Option<u64>,
    pub is_stale: bool,
}

/// Coordinates ingestor, validator and reconciler under the checkpoint
pub struct SyncOrchestrator {
    config: ReconcilerConfig,
    ingestor: Arc<EventIngestor>,
    validator: Arc<BlockValidator>,
    reconciler: Arc<StateReconciler>,
    checkpoints: Arc<dyn CheckpointStore>,
    locks: Arc<JobLockStore>,
    metrics: Arc<ReconcilerMetrics>,
}

impl SyncOrchestrator {
    pub fn new(
        config: ReconcilerConfig,
        ingestor: Arc<EventIngestor>,
        validator: Arc<BlockValidator>,
        reconciler: Arc<StateReconciler>,
        checkpoints: Arc<dyn CheckpointStore>,
        locks: Arc<JobLockStore>,
        metrics: Arc<ReconcilerMetrics>,
    ) -> Self {
        Self {
            config,
            ingestor,
            validator,
            reconciler,
            checkpoints,
            locks,
            metrics,
        }
    }

    /// Load or create the checkpoint, attach live ingestion and run one
    /// forward batch. Returns the live subscription task handles.
    pub async fn start_sync(
        &self,
        cancel: CancellationToken,
    ) -> ReconcilerResult<Vec<JoinHandle<()>>> {
        let checkpoint = match self.checkpoints.load().await? {
            Some(mut checkpoint) => {
                if checkpoint.status == SyncStatus::Paused {
                    info!("[{}] Resuming paused sync", self.config.chain_name);
                    checkpoint.status = SyncStatus::Active;
                    self.checkpoints.save(checkpoint.clone()).await?;
                }
                checkpoint
            }
            None => {
                let start = self.bootstrap_start_block().await?;
                info!(
                    "[{}] No checkpoint found; starting at block {}",
                    self.config.chain_name, start
                );
                let checkpoint = SyncCheckpoint::starting_at(start);
                self.checkpoints.save(checkpoint.clone()).await?;
                checkpoint
            }
        };

        let handles = self.ingestor.ingest_live(cancel).await?;
        self.sync_from_block(checkpoint.last_synced_block).await?;
        Ok(handles)
    }

    /// Mark sync paused. In-flight batches complete; subsequent ticks no-op.
    pub async fn stop_sync(&self) -> ReconcilerResult<()> {
        if let Some(mut checkpoint) = self.checkpoints.load().await? {
            checkpoint.status = SyncStatus::Paused;
            self.checkpoints.save(checkpoint).await?;
        }
        info!("[{}] Sync paused", self.config.chain_name);
        Ok(())
    }

    /// Run one bounded forward batch from `from`.
    ///
    /// No-ops while paused. A chain client failure that exhausts its retry
    /// budget marks the checkpoint ERROR and propagates.
    pub async fn sync_from_block(&self, from: u64) -> ReconcilerResult<SyncBatchOutcome> {
        if let Some(checkpoint) = self.checkpoints.load().await? {
            if checkpoint.status == SyncStatus::Paused {
                debug!("[{}] Sync is paused; skipping batch", self.config.chain_name);
                return Ok(SyncBatchOutcome {
                    from_block: from,
                    to_block: from,
                    ..Default::default()
                });
            }
        }
        match self.run_batch(from, SyncStatus::Active).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_error(&e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Re-sync batches from `from` up to the confirmed head, pausing
    /// between batches and persisting progress after each so an
    /// interruption resumes instead of restarting.
    pub async fn resync_from_block(&self, from: u64) -> ReconcilerResult<ResyncOutcome> {
        if let Some(mut checkpoint) = self.checkpoints.load().await? {
            checkpoint.status = SyncStatus::Resyncing;
            self.checkpoints.save(checkpoint).await?;
        } else {
            self.checkpoints
                .save(SyncCheckpoint {
                    status: SyncStatus::Resyncing,
                    ..SyncCheckpoint::starting_at(from)
                })
                .await?;
        }

        let head = self.confirmed_head().await?;
        info!(
            "[{}] Resync started: blocks {}-{}",
            self.config.chain_name, from, head
        );

        let mut outcome = ResyncOutcome {
            from_block: from,
            to_block: from,
            ..Default::default()
        };
        let mut current = from;
        let mut consecutive_failures = 0u32;
        self.save_progress(from, current, head, false, None).await?;

        while current < head {
            match self.run_batch(current, SyncStatus::Resyncing).await {
                Ok(batch) if batch.advanced => {
                    current = batch.to_block;
                    consecutive_failures = 0;
                    outcome.batches += 1;
                    outcome.events_processed += batch.events_processed;
                    self.save_progress(from, current, head, false, None).await?;
                }
                Ok(batch) => {
                    if batch.errors.is_empty() {
                        // Caught up inside the confirmation window
                        break;
                    }
                    consecutive_failures += 1;
                    if consecutive_failures > self.config.max_batch_retries {
                        let message = format!(
                            "Resync aborted at block {}: {}",
                            current,
                            batch.errors.join("; ")
                        );
                        self.save_progress(from, current, head, false, Some(message.clone()))
                            .await?;
                        self.mark_error(&message).await?;
                        return Err(ReconcilerError::Validation(message));
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "[{}] Resync batch at block {} failed ({}/{}): {:?}",
                        self.config.chain_name,
                        current,
                        consecutive_failures,
                        self.config.max_batch_retries,
                        e
                    );
                    if consecutive_failures > self.config.max_batch_retries {
                        let message = format!("Resync aborted at block {}: {}", current, e);
                        self.save_progress(from, current, head, false, Some(message.clone()))
                            .await?;
                        self.mark_error(&message).await?;
                        return Err(e);
                    }
                }
            }
            tokio::time::sleep(self.config.batch_pause()).await;
        }

        outcome.to_block = current;
        self.save_progress(from, current, head, true, None).await?;
        if let Some(mut checkpoint) = self.checkpoints.load().await? {
            checkpoint.status = SyncStatus::Active;
            self.checkpoints.save(checkpoint).await?;
        }
        info!(
            "[{}] Resync complete: blocks {}-{} in {} batches",
            self.config.chain_name, from, current, outcome.batches
        );
        Ok(outcome)
    }

    /// Trigger a resync when the checkpoint is missing (bounded bootstrap),
    /// in ERROR, or stale. Returns the resync outcome when one ran.
    pub async fn auto_resync_if_needed(&self) -> ReconcilerResult<Option<ResyncOutcome>> {
        let Some(checkpoint) = self.checkpoints.load().await? else {
            let start = self.bootstrap_start_block().await?;
            info!(
                "[{}] No checkpoint; bootstrapping most recent {} blocks from {}",
                self.config.chain_name, self.config.bootstrap_blocks, start
            );
            self.checkpoints
                .save(SyncCheckpoint::starting_at(start))
                .await?;
            return self.resync_from_block(start).await.map(Some);
        };

        if checkpoint.status == SyncStatus::Paused || checkpoint.status == SyncStatus::Resyncing {
            return Ok(None);
        }

        let stale = checkpoint.last_sync_at.is_some_and(|at| {
            SystemTime::now()
                .duration_since(at)
                .map(|age| age > self.config.staleness_threshold())
                .unwrap_or(false)
        });

        if checkpoint.status == SyncStatus::Error {
            info!(
                "[{}] Checkpoint in ERROR; resyncing from block {}",
                self.config.chain_name, checkpoint.last_synced_block
            );
            return self
                .resync_from_block(checkpoint.last_synced_block)
                .await
                .map(Some);
        }
        if stale {
            info!(
                "[{}] Checkpoint stale; resyncing from block {}",
                self.config.chain_name, checkpoint.last_synced_block
            );
            return self
                .resync_from_block(checkpoint.last_synced_block)
                .await
                .map(Some);
        }
        Ok(None)
    }

    pub async fn get_sync_status(&self) -> ReconcilerResult<SyncStatusSnapshot> {
        let checkpoint = self.checkpoints.load().await?;
        // Status must be reportable even when the chain client is down
        let latest = self.validator.latest_block_number().await.ok();
        let confirmed = latest.map(|n| n.saturating_sub(self.config.confirmation_depth));
        let is_stale = checkpoint
            .as_ref()
            .and_then(|c| c.last_sync_at)
            .is_some_and(|at| {
                SystemTime::now()
                    .duration_since(at)
                    .map(|age| age > self.config.staleness_threshold())
                    .unwrap_or(false)
            });
        Ok(SyncStatusSnapshot {
            checkpoint,
            latest_block: latest,
            confirmed_block: confirmed,
            is_stale,
        })
    }

    /// One validated batch: bound by the confirmed head, validate linkage,
    /// backfill, reconcile, then advance the checkpoint atomically.
    async fn run_batch(
        &self,
        from: u64,
        status_on_success: SyncStatus,
    ) -> ReconcilerResult<SyncBatchOutcome> {
        let latest = match retry_with_max_elapsed_time!(
            self.validator.latest_block_number(),
            self.config.max_retry_duration()
        ) {
            Ok(Ok(latest)) => latest,
            Ok(Err(e)) | Err(e) => {
                self.metrics
                    .rpc_retries_exhausted
                    .with_label_values(&["get_latest_block_number"])
                    .inc();
                return Err(e);
            }
        };
        self.metrics.latest_block.set(latest as i64);
        let confirmed = latest.saturating_sub(self.config.confirmation_depth);
        self.metrics.confirmed_block.set(confirmed as i64);

        let to = (from + self.config.batch_size).min(confirmed);
        if to <= from {
            debug!(
                "[{}] Nothing to sync: block {} is within the confirmation window (head {})",
                self.config.chain_name, from, latest
            );
            self.metrics.sync_batches.with_label_values(&["noop"]).inc();
            return Ok(SyncBatchOutcome {
                from_block: from,
                to_block: from,
                ..Default::default()
            });
        }

        let validation = match retry_with_max_elapsed_time!(
            self.validator.validate_block_chain(from, to),
            self.config.max_retry_duration()
        ) {
            Ok(Ok(validation)) => validation,
            Ok(Err(e)) | Err(e) => {
                self.metrics
                    .rpc_retries_exhausted
                    .with_label_values(&["validate_block_chain"])
                    .inc();
                return Err(e);
            }
        };
        if !validation.is_valid {
            warn!(
                "[{}] Validation failed for blocks {}-{}: {}",
                self.config.chain_name,
                from,
                to,
                validation.errors.join("; ")
            );
            self.metrics.validation_failures.inc();
            self.metrics
                .sync_batches
                .with_label_values(&["validation_failed"])
                .inc();
            self.mark_error(&format!(
                "Validation failed for blocks {}-{}: {}",
                from,
                to,
                validation.errors.join("; ")
            ))
            .await?;
            return Ok(SyncBatchOutcome {
                from_block: from,
                to_block: to,
                errors: validation.errors,
                ..Default::default()
            });
        }

        let stored = match retry_with_max_elapsed_time!(
            self.ingestor.backfill(from, to),
            self.config.max_retry_duration()
        ) {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) | Err(e) => {
                self.metrics
                    .rpc_retries_exhausted
                    .with_label_values(&["backfill"])
                    .inc();
                return Err(e);
            }
        };

        let batch = self.reconciler.reconcile_unprocessed_events().await?;

        let mut checkpoint = self
            .checkpoints
            .load()
            .await?
            .unwrap_or_else(|| SyncCheckpoint::starting_at(from));
        checkpoint.last_synced_block = to;
        checkpoint.last_synced_block_hash = validation
            .last_block
            .map(|b| b.hash)
            .unwrap_or_default();
        checkpoint.status = status_on_success;
        checkpoint.last_sync_at = Some(SystemTime::now());
        checkpoint.last_error = None;
        checkpoint.total_events_processed += batch.processed as u64;
        checkpoint.total_errors += batch.errors as u64;
        let hash = checkpoint.last_synced_block_hash.clone();
        self.checkpoints.save(checkpoint).await?;

        self.metrics.last_synced_block.set(to as i64);
        self.metrics
            .sync_batches
            .with_label_values(&["success"])
            .inc();
        info!(
            "[{}] Synced blocks {}-{} (hash {}): {} new events, {} processed, {} errors",
            self.config.chain_name,
            from,
            to,
            truncate_hash(&hash),
            stored.len(),
            batch.processed,
            batch.errors
        );

        Ok(SyncBatchOutcome {
            from_block: from,
            to_block: to,
            advanced: true,
            events_stored: stored.len(),
            events_processed: batch.processed,
            events_errored: batch.errors,
            errors: Vec::new(),
        })
    }

    async fn bootstrap_start_block(&self) -> ReconcilerResult<u64> {
        let head = self.confirmed_head().await?;
        Ok(head.saturating_sub(self.config.bootstrap_blocks))
    }

    async fn confirmed_head(&self) -> ReconcilerResult<u64> {
        match retry_with_max_elapsed_time!(
            self.validator.confirmed_head(self.config.confirmation_depth),
            self.config.max_retry_duration()
        ) {
            Ok(Ok(head)) => Ok(head),
            Ok(Err(e)) | Err(e) => {
                self.metrics
                    .rpc_retries_exhausted
                    .with_label_values(&["get_latest_block_number"])
                    .inc();
                Err(e)
            }
        }
    }

    async fn save_progress(
        &self,
        from: u64,
        current: u64,
        to: u64,
        completed: bool,
        error: Option<String>,
    ) -> ReconcilerResult<()> {
        self.locks
            .save_resync_progress(&ResyncProgress {
                from_block: from,
                current_block: current,
                to_block: to,
                completed,
                error,
            })
            .await
    }

    async fn mark_error(&self, message: &str) -> ReconcilerResult<()> {
        let mut checkpoint = self
            .checkpoints
            .load()
            .await?
            .unwrap_or_else(|| SyncCheckpoint::starting_at(0));
        checkpoint.status = SyncStatus::Error;
        checkpoint.last_error = Some(message.to_string());
        checkpoint.total_errors += 1;
        self.checkpoints.save(checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EscrowEventKind, EscrowStatus};
    use crate::lock_store::MemoryKvStore;
    use crate::store::{
        EscrowMapping, EscrowStore, MemoryCheckpointStore, MemoryEscrowStore, MemoryRawEventStore,
        RawEventStore,
    };
    use crate::test_utils::{escrow_log, MockChainClient};
    use std::time::Duration;

    struct Fixture {
        raw_events: Arc<MemoryRawEventStore>,
        domain: Arc<MemoryEscrowStore>,
        checkpoints: Arc<MemoryCheckpointStore>,
        locks: Arc<JobLockStore>,
        orchestrator: SyncOrchestrator,
    }

    fn fixture_with(chain: Arc<MockChainClient>, config: ReconcilerConfig) -> Fixture {
        let raw_events = Arc::new(MemoryRawEventStore::new());
        let domain = Arc::new(MemoryEscrowStore::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let locks = Arc::new(JobLockStore::new(
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(3600),
        ));
        let metrics = Arc::new(ReconcilerMetrics::new_for_testing());
        let ingestor = Arc::new(EventIngestor::new(
            &config.chain_name,
            chain.clone(),
            raw_events.clone(),
            metrics.clone(),
        ));
        let validator = Arc::new(BlockValidator::new(&config.chain_name, chain.clone()));
        let reconciler = Arc::new(StateReconciler::new(
            raw_events.clone(),
            domain.clone(),
            metrics.clone(),
        ));
        let orchestrator = SyncOrchestrator::new(
            config,
            ingestor,
            validator,
            reconciler,
            checkpoints.clone(),
            locks.clone(),
            metrics,
        );
        Fixture {
            raw_events,
            domain,
            checkpoints,
            locks,
            orchestrator,
        }
    }

    fn test_config() -> ReconcilerConfig {
        ReconcilerConfig {
            chain_name: "test".to_string(),
            batch_size: 100,
            confirmation_depth: 12,
            batch_pause_ms: 0,
            max_retry_secs: 1,
            ..Default::default()
        }
    }

    async fn seed_mapping(f: &Fixture, order_ref: &str, escrow_ref: &str) {
        f.domain
            .upsert_mapping(EscrowMapping {
                order_ref: order_ref.to_string(),
                escrow_ref: escrow_ref.to_string(),
                status: EscrowStatus::Pending,
            })
            .await;
    }

    #[tokio::test]
    async fn test_sync_advances_checkpoint() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();

        let outcome = f.orchestrator.sync_from_block(0).await.unwrap();
        assert!(outcome.advanced);
        // Bounded by batch size (100), inside the confirmed head (108)
        assert_eq!(outcome.to_block, 100);

        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.last_synced_block, 100);
        assert_eq!(checkpoint.last_synced_block_hash, "0xb100");
        assert_eq!(checkpoint.status, SyncStatus::Active);
        assert!(checkpoint.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_sync_noop_within_confirmation_window() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint::starting_at(108))
            .await
            .unwrap();

        let outcome = f.orchestrator.sync_from_block(108).await.unwrap();
        assert!(!outcome.advanced);
        assert_eq!(
            f.checkpoints
                .load()
                .await
                .unwrap()
                .unwrap()
                .last_synced_block,
            108
        );
    }

    #[tokio::test]
    async fn test_validation_failure_blocks_checkpoint() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 120));
        chain.break_parent_link(50).await;
        let f = fixture_with(chain, test_config());
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();

        let outcome = f.orchestrator.sync_from_block(0).await.unwrap();
        assert!(!outcome.advanced);
        assert!(!outcome.errors.is_empty());

        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.last_synced_block, 0);
        assert_eq!(checkpoint.status, SyncStatus::Error);
        assert!(checkpoint.last_error.unwrap().contains("Validation failed"));
    }

    #[tokio::test]
    async fn test_sync_ingests_and_reconciles_events() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 120));
        chain
            .add_log(escrow_log(EscrowEventKind::Created, "E1", 100, 0))
            .await;
        chain
            .add_log(escrow_log(EscrowEventKind::Locked, "E1", 101, 0))
            .await;
        let f = fixture_with(chain, test_config());
        seed_mapping(&f, "O1", "E1").await;
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();

        let outcome = f.orchestrator.sync_from_block(0).await.unwrap();
        assert_eq!(outcome.events_stored, 2);
        assert_eq!(outcome.events_processed, 2);

        let mapping = f.domain.get_mapping("E1").await.unwrap().unwrap();
        assert_eq!(mapping.status, EscrowStatus::Locked);
        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.total_events_processed, 2);
    }

    #[tokio::test]
    async fn test_paused_sync_skips_batches() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint {
                status: SyncStatus::Paused,
                ..SyncCheckpoint::starting_at(0)
            })
            .await
            .unwrap();

        let outcome = f.orchestrator.sync_from_block(0).await.unwrap();
        assert!(!outcome.advanced);
        assert_eq!(
            f.checkpoints.load().await.unwrap().unwrap().status,
            SyncStatus::Paused
        );
    }

    #[tokio::test]
    async fn test_rpc_exhaustion_marks_checkpoint_error() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 120));
        chain.fail_next("get_latest_block_number", 100).await;
        let f = fixture_with(chain, test_config());
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();

        let err = f.orchestrator.sync_from_block(0).await.unwrap_err();
        assert!(err.is_transient());
        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.status, SyncStatus::Error);
        assert_eq!(checkpoint.last_synced_block, 0);
    }

    #[tokio::test]
    async fn test_resync_loops_to_confirmed_head() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 300));
        let config = ReconcilerConfig {
            batch_size: 50,
            ..test_config()
        };
        let f = fixture_with(chain, config);
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();

        let outcome = f.orchestrator.resync_from_block(0).await.unwrap();
        // Confirmed head is 288; 50-block batches
        assert_eq!(outcome.to_block, 288);
        assert_eq!(outcome.batches, 6);

        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.last_synced_block, 288);
        assert_eq!(checkpoint.status, SyncStatus::Active);

        let progress = f.locks.load_resync_progress().await.unwrap().unwrap();
        assert!(progress.completed);
        assert_eq!(progress.current_block, 288);
    }

    #[tokio::test]
    async fn test_checkpoint_is_monotonic_across_resync() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();
        f.orchestrator.sync_from_block(0).await.unwrap();
        assert_eq!(
            f.checkpoints
                .load()
                .await
                .unwrap()
                .unwrap()
                .last_synced_block,
            100
        );

        // Resync from an earlier block never moves the checkpoint backward
        f.orchestrator.resync_from_block(50).await.unwrap();
        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert!(checkpoint.last_synced_block >= 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_aborts_after_retry_budget() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 120));
        chain.break_parent_link(50).await;
        let config = ReconcilerConfig {
            max_batch_retries: 2,
            ..test_config()
        };
        let f = fixture_with(chain, config);
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();

        let err = f.orchestrator.resync_from_block(0).await.unwrap_err();
        assert!(matches!(err, ReconcilerError::Validation(_)));

        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.status, SyncStatus::Error);
        let progress = f.locks.load_resync_progress().await.unwrap().unwrap();
        assert!(!progress.completed);
        assert!(progress.error.is_some());
        assert_eq!(progress.current_block, 0);
    }

    #[tokio::test]
    async fn test_auto_resync_bootstraps_without_checkpoint() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 300));
        chain
            .add_log(escrow_log(EscrowEventKind::Created, "E1", 10, 0))
            .await;
        chain
            .add_log(escrow_log(EscrowEventKind::Created, "E2", 250, 0))
            .await;
        let config = ReconcilerConfig {
            bootstrap_blocks: 50,
            batch_size: 50,
            ..test_config()
        };
        let f = fixture_with(chain, config);

        let outcome = f.orchestrator.auto_resync_if_needed().await.unwrap();
        let outcome = outcome.unwrap();
        // Bootstrap covers only the most recent 50 confirmed blocks (238-288)
        assert_eq!(outcome.from_block, 238);
        assert_eq!(outcome.to_block, 288);

        // The old event at block 10 is outside the bootstrap window
        assert!(!f.raw_events.contains("0xtx-E1-10-0").await.unwrap());
        assert!(f.raw_events.contains("0xtx-E2-250-0").await.unwrap());
    }

    #[tokio::test]
    async fn test_auto_resync_on_error_status() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint {
                status: SyncStatus::Error,
                last_error: Some("Validation failed".to_string()),
                ..SyncCheckpoint::starting_at(40)
            })
            .await
            .unwrap();

        let outcome = f.orchestrator.auto_resync_if_needed().await.unwrap();
        assert!(outcome.is_some());
        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        assert_eq!(checkpoint.status, SyncStatus::Active);
        assert_eq!(checkpoint.last_synced_block, 108);
    }

    #[tokio::test]
    async fn test_auto_resync_noop_when_healthy() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint {
                last_sync_at: Some(SystemTime::now()),
                ..SyncCheckpoint::starting_at(100)
            })
            .await
            .unwrap();

        assert!(f
            .orchestrator
            .auto_resync_if_needed()
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_start_sync_creates_checkpoint_and_live_tasks() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 2_000));
        let f = fixture_with(chain, test_config());

        let cancel = CancellationToken::new();
        let handles = f.orchestrator.start_sync(cancel.clone()).await.unwrap();
        assert_eq!(handles.len(), EscrowEventKind::all().len());

        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        // Bootstrap start: confirmed head 1988 minus 1000, plus one batch
        assert_eq!(checkpoint.last_synced_block, 1088);
        assert_eq!(checkpoint.status, SyncStatus::Active);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_get_sync_status_snapshot() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint {
                last_sync_at: Some(SystemTime::now() - Duration::from_secs(3600)),
                ..SyncCheckpoint::starting_at(90)
            })
            .await
            .unwrap();

        let status = f.orchestrator.get_sync_status().await.unwrap();
        assert_eq!(status.latest_block, Some(120));
        assert_eq!(status.confirmed_block, Some(108));
        assert_eq!(status.checkpoint.unwrap().last_synced_block, 90);
        // One hour old against a 300s threshold
        assert!(status.is_stale);
    }

    #[tokio::test]
    async fn test_stop_sync_pauses() {
        let f = fixture_with(
            Arc::new(MockChainClient::with_linked_blocks(0, 120)),
            test_config(),
        );
        f.checkpoints
            .save(SyncCheckpoint::starting_at(0))
            .await
            .unwrap();

        f.orchestrator.stop_sync().await.unwrap();
        assert_eq!(
            f.checkpoints.load().await.unwrap().unwrap().status,
            SyncStatus::Paused
        );
    }
}
