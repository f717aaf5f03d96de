// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wires the reconciliation components together and exposes the operator
//! control surface.
//!
//! The node owns one long-lived instance of each collaborator, constructed
//! once at process start; there are no ambient globals. Control surface
//! methods are thin pass-throughs carrying no business logic.

use crate::auditor::{AuditReport, ConsistencyAuditor};
use crate::chain_client::{BlockHeader, ChainClient};
use crate::config::ReconcilerConfig;
use crate::error::ReconcilerResult;
use crate::ingestor::EventIngestor;
use crate::lock_store::{JobLockStore, KvStore};
use crate::metrics::ReconcilerMetrics;
use crate::orchestrator::{ResyncOutcome, SyncOrchestrator, SyncStatusSnapshot};
use crate::reconciler::{
    EscrowReconcileOutcome, ReconcileAllOutcome, StateReconciler,
};
use crate::scheduler::{Job, JobScheduler};
use crate::store::{CheckpointStore, EscrowStore, RawEventStore};
use crate::validator::{BlockValidation, BlockValidator};
use anyhow::Context;
use async_trait::async_trait;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const SYNC_JOB: &str = "sync";
const STATUS_CHECK_JOB: &str = "status-check";
const RECONCILE_JOB: &str = "reconcile";
const AUDIT_JOB: &str = "audit";
const DEEP_AUDIT_JOB: &str = "deep-audit";

const ALL_JOBS: [&str; 5] = [
    SYNC_JOB,
    STATUS_CHECK_JOB,
    RECONCILE_JOB,
    AUDIT_JOB,
    DEEP_AUDIT_JOB,
];

/// Install a global tracing subscriber driven by `RUST_LOG`
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Long-lived reconciliation node: ingestion, sync, scheduled jobs and the
/// operator control surface.
pub struct EscrowSyncNode {
    config: ReconcilerConfig,
    orchestrator: Arc<SyncOrchestrator>,
    reconciler: Arc<StateReconciler>,
    validator: Arc<BlockValidator>,
    auditor: Arc<ConsistencyAuditor>,
    locks: Arc<JobLockStore>,
    scheduler: JobScheduler,
    cancel: CancellationToken,
}

impl EscrowSyncNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ReconcilerConfig,
        client: Arc<dyn ChainClient>,
        raw_events: Arc<dyn RawEventStore>,
        domain: Arc<dyn EscrowStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        kv: Arc<dyn KvStore>,
        registry: &Registry,
    ) -> anyhow::Result<Self> {
        config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid reconciler configuration")?;

        let metrics = Arc::new(ReconcilerMetrics::new(registry));
        let locks = Arc::new(JobLockStore::new(kv, config.state_ttl()));
        let ingestor = Arc::new(EventIngestor::new(
            &config.chain_name,
            client.clone(),
            raw_events.clone(),
            metrics.clone(),
        ));
        let validator = Arc::new(BlockValidator::new(&config.chain_name, client));
        let reconciler = Arc::new(StateReconciler::new(
            raw_events,
            domain.clone(),
            metrics.clone(),
        ));
        let auditor = Arc::new(ConsistencyAuditor::new(domain, metrics.clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.clone(),
            ingestor,
            validator.clone(),
            reconciler.clone(),
            checkpoints,
            locks.clone(),
            metrics.clone(),
        ));
        let scheduler = JobScheduler::new(locks.clone(), config.lock_ttl(), metrics);

        Ok(Self {
            config,
            orchestrator,
            reconciler,
            validator,
            auditor,
            locks,
            scheduler,
            cancel: CancellationToken::new(),
        })
    }

    /// Recover from any previous crash, start live ingestion and forward
    /// sync, then schedule the periodic jobs. Returns all task handles.
    pub async fn start(&self) -> ReconcilerResult<Vec<JoinHandle<()>>> {
        info!("[{}] Starting escrow sync node", self.config.chain_name);

        let recovery = self.locks.recover(&ALL_JOBS).await?;
        let mut handles = self.orchestrator.start_sync(self.cancel.clone()).await?;

        if let Some(progress) = recovery.unfinished_resync {
            info!(
                "[{}] Resuming interrupted resync from block {}",
                self.config.chain_name, progress.current_block
            );
            self.orchestrator
                .resync_from_block(progress.current_block)
                .await?;
        }

        let jobs: Vec<Arc<dyn Job>> = vec![
            Arc::new(SyncJob {
                orchestrator: self.orchestrator.clone(),
                interval: Duration::from_secs(self.config.sync_interval_secs),
            }),
            Arc::new(StatusCheckJob {
                orchestrator: self.orchestrator.clone(),
                interval: Duration::from_secs(self.config.status_check_interval_secs),
            }),
            Arc::new(ReconcileJob {
                reconciler: self.reconciler.clone(),
                interval: Duration::from_secs(self.config.reconcile_interval_secs),
            }),
            Arc::new(AuditJob {
                auditor: self.auditor.clone(),
                interval: Duration::from_secs(self.config.audit_interval_secs),
                deep: false,
            }),
            Arc::new(AuditJob {
                auditor: self.auditor.clone(),
                interval: Duration::from_secs(self.config.deep_audit_interval_secs),
                deep: true,
            }),
        ];
        handles.extend(self.scheduler.spawn_all(jobs, &self.cancel));
        Ok(handles)
    }

    /// Pause sync and stop scheduling new ticks. In-flight work completes.
    pub async fn stop(&self) -> ReconcilerResult<()> {
        self.orchestrator.stop_sync().await?;
        self.cancel.cancel();
        info!("[{}] Escrow sync node stopped", self.config.chain_name);
        Ok(())
    }

    // Control surface: thin pass-throughs consumed by the CRUD layer and
    // operator tooling.

    pub async fn get_sync_status(&self) -> ReconcilerResult<SyncStatusSnapshot> {
        self.orchestrator.get_sync_status().await
    }

    pub async fn resync_from_block(&self, from: u64) -> ReconcilerResult<ResyncOutcome> {
        self.orchestrator.resync_from_block(from).await
    }

    pub async fn auto_resync(&self) -> ReconcilerResult<Option<ResyncOutcome>> {
        self.orchestrator.auto_resync_if_needed().await
    }

    pub async fn reconcile_all(&self) -> ReconcilerResult<ReconcileAllOutcome> {
        self.reconciler.reconcile_all().await
    }

    pub async fn reconcile_escrow(
        &self,
        escrow_ref: &str,
    ) -> ReconcilerResult<EscrowReconcileOutcome> {
        self.reconciler.reconcile_escrow(escrow_ref).await
    }

    pub async fn validate_block(&self, number: u64) -> ReconcilerResult<BlockValidation> {
        self.validator.validate_block(number).await
    }

    pub async fn get_latest_block(&self) -> ReconcilerResult<Option<BlockHeader>> {
        self.validator.latest_block().await
    }

    pub async fn run_audit(&self) -> ReconcilerResult<AuditReport> {
        self.auditor.audit().await
    }
}

struct SyncJob {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
}

#[async_trait]
impl Job for SyncJob {
    fn name(&self) -> &str {
        SYNC_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<String, String> {
        let status = self
            .orchestrator
            .get_sync_status()
            .await
            .map_err(|e| e.to_string())?;
        let from = status
            .checkpoint
            .map(|c| c.last_synced_block)
            .unwrap_or(0);
        let outcome = self
            .orchestrator
            .sync_from_block(from)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!(
            "blocks {}-{}, {} events processed",
            outcome.from_block, outcome.to_block, outcome.events_processed
        ))
    }
}

struct StatusCheckJob {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
}

#[async_trait]
impl Job for StatusCheckJob {
    fn name(&self) -> &str {
        STATUS_CHECK_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<String, String> {
        match self
            .orchestrator
            .auto_resync_if_needed()
            .await
            .map_err(|e| e.to_string())?
        {
            Some(outcome) => Ok(format!(
                "resynced blocks {}-{}",
                outcome.from_block, outcome.to_block
            )),
            None => Ok("healthy".to_string()),
        }
    }
}

struct ReconcileJob {
    reconciler: Arc<StateReconciler>,
    interval: Duration,
}

#[async_trait]
impl Job for ReconcileJob {
    fn name(&self) -> &str {
        RECONCILE_JOB
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<String, String> {
        let outcome = self
            .reconciler
            .reconcile_all()
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!(
            "{} escrows, {} reconciled, {} errors",
            outcome.total, outcome.reconciled, outcome.errors
        ))
    }
}

struct AuditJob {
    auditor: Arc<ConsistencyAuditor>,
    interval: Duration,
    deep: bool,
}

#[async_trait]
impl Job for AuditJob {
    fn name(&self) -> &str {
        if self.deep {
            DEEP_AUDIT_JOB
        } else {
            AUDIT_JOB
        }
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<String, String> {
        let report = if self.deep {
            self.auditor.audit_deep().await
        } else {
            self.auditor.audit().await
        }
        .map_err(|e| e.to_string())?;
        // Discrepancies are findings, not job failures
        Ok(format!(
            "{} orders audited, {} discrepancies",
            report.audited_orders,
            report.discrepancies.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EscrowStatus;
    use crate::lock_store::{MemoryKvStore, ResyncProgress};
    use crate::store::{
        EscrowMapping, MemoryCheckpointStore, MemoryEscrowStore, MemoryRawEventStore,
        SyncCheckpoint, SyncStatus,
    };
    use crate::test_utils::MockChainClient;

    struct Fixture {
        domain: Arc<MemoryEscrowStore>,
        checkpoints: Arc<MemoryCheckpointStore>,
        kv: Arc<MemoryKvStore>,
        node: EscrowSyncNode,
    }

    fn node_fixture(chain: Arc<MockChainClient>) -> Fixture {
        let config = ReconcilerConfig {
            chain_name: "test".to_string(),
            batch_pause_ms: 0,
            max_retry_secs: 1,
            ..Default::default()
        };
        let domain = Arc::new(MemoryEscrowStore::new());
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let kv = Arc::new(MemoryKvStore::new());
        let node = EscrowSyncNode::new(
            config,
            chain,
            Arc::new(MemoryRawEventStore::new()),
            domain.clone(),
            checkpoints.clone(),
            kv.clone(),
            &Registry::new(),
        )
        .unwrap();
        Fixture {
            domain,
            checkpoints,
            kv,
            node,
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ReconcilerConfig {
            chain_name: String::new(),
            ..Default::default()
        };
        let result = EscrowSyncNode::new(
            config,
            Arc::new(MockChainClient::new()),
            Arc::new(MemoryRawEventStore::new()),
            Arc::new(MemoryEscrowStore::new()),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(MemoryKvStore::new()),
            &Registry::new(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 2_000));
        let f = node_fixture(chain);

        let handles = f.node.start().await.unwrap();
        // Six live subscriptions plus five scheduled jobs
        assert_eq!(handles.len(), 11);
        assert_eq!(
            f.checkpoints.load().await.unwrap().unwrap().status,
            SyncStatus::Active
        );

        f.node.stop().await.unwrap();
        assert_eq!(
            f.checkpoints.load().await.unwrap().unwrap().status,
            SyncStatus::Paused
        );
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_start_resumes_interrupted_resync() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 300));
        let f = node_fixture(chain);
        f.checkpoints
            .save(SyncCheckpoint::starting_at(150))
            .await
            .unwrap();
        // A previous process died mid-resync at block 150
        let stale_locks = JobLockStore::new(f.kv.clone(), Duration::from_secs(3600));
        stale_locks
            .save_resync_progress(&ResyncProgress {
                from_block: 100,
                current_block: 150,
                to_block: 288,
                completed: false,
                error: None,
            })
            .await
            .unwrap();

        let handles = f.node.start().await.unwrap();
        let checkpoint = f.checkpoints.load().await.unwrap().unwrap();
        // The resumed resync carried sync to the confirmed head
        assert_eq!(checkpoint.last_synced_block, 288);

        f.node.stop().await.unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_control_surface_pass_throughs() {
        let chain = Arc::new(MockChainClient::with_linked_blocks(0, 120));
        let f = node_fixture(chain);
        f.checkpoints
            .save(SyncCheckpoint::starting_at(100))
            .await
            .unwrap();
        f.domain
            .upsert_mapping(EscrowMapping {
                order_ref: "O1".to_string(),
                escrow_ref: "E1".to_string(),
                status: EscrowStatus::Pending,
            })
            .await;

        let status = f.node.get_sync_status().await.unwrap();
        assert_eq!(status.latest_block, Some(120));

        let validation = f.node.validate_block(50).await.unwrap();
        assert!(validation.is_valid);

        assert_eq!(f.node.get_latest_block().await.unwrap().unwrap().number, 120);

        let outcome = f.node.reconcile_escrow("E1").await.unwrap();
        assert!(!outcome.reconciled);

        let all = f.node.reconcile_all().await.unwrap();
        assert_eq!(all.total, 1);

        let report = f.node.run_audit().await.unwrap();
        assert!(report.is_consistent());
    }
}
