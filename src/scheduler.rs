// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Timer loop driving named jobs under distributed locks.
//!
//! Each job runs on its own interval in its own task. A tick first takes
//! `lock:<name>`; contention means another process is already running the
//! job, so the tick is skipped, never queued. The run outcome is recorded
//! as a `JobExecution` before the lock is released. Cancellation stops new
//! ticks only; an in-flight run completes.

use crate::lock_store::JobLockStore;
use crate::metrics::ReconcilerMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A named unit of scheduled work. Implementations must be idempotent:
/// the scheduler guarantees mutual exclusion per name, not exactly-once.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// Run once. Returns a short human-readable summary or error message,
    /// recorded in the job's execution record.
    async fn run(&self) -> Result<String, String>;
}

/// Spawns one interval loop per job, serialized cluster-wide by job name
pub struct JobScheduler {
    locks: Arc<JobLockStore>,
    lock_ttl: Duration,
    metrics: Arc<ReconcilerMetrics>,
}

impl JobScheduler {
    pub fn new(locks: Arc<JobLockStore>, lock_ttl: Duration, metrics: Arc<ReconcilerMetrics>) -> Self {
        Self {
            locks,
            lock_ttl,
            metrics,
        }
    }

    pub fn spawn_all(
        &self,
        jobs: Vec<Arc<dyn Job>>,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        jobs.into_iter()
            .map(|job| self.spawn(job, cancel.clone()))
            .collect()
    }

    pub fn spawn(&self, job: Arc<dyn Job>, cancel: CancellationToken) -> JoinHandle<()> {
        let locks = self.locks.clone();
        let lock_ttl = self.lock_ttl;
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let name = job.name().to_string();
            let mut interval = tokio::time::interval(job.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Consume the immediate first tick; jobs start one interval in
            interval.tick().await;
            info!(
                "[JobScheduler] Job '{}' scheduled every {:?}",
                name,
                job.interval()
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[JobScheduler] Job '{}' stopped", name);
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = run_once(&job, &name, &locks, lock_ttl, &metrics).await {
                            warn!("[JobScheduler] Job '{}' bookkeeping failed: {:?}", name, e);
                        }
                    }
                }
            }
        })
    }
}

async fn run_once(
    job: &Arc<dyn Job>,
    name: &str,
    locks: &Arc<JobLockStore>,
    lock_ttl: Duration,
    metrics: &Arc<ReconcilerMetrics>,
) -> crate::error::ReconcilerResult<()> {
    if !locks.acquire_lock(name, lock_ttl).await? {
        debug!(
            "[JobScheduler] Job '{}' lock held elsewhere; skipping tick",
            name
        );
        metrics
            .job_skipped_lock_contention
            .with_label_values(&[name])
            .inc();
        return Ok(());
    }

    let execution = locks.start_execution(name).await?;
    let result = job.run().await;
    match &result {
        Ok(summary) => {
            debug!("[JobScheduler] Job '{}' completed: {}", name, summary);
            metrics
                .job_runs
                .with_label_values(&[name, "completed"])
                .inc();
        }
        Err(error) => {
            warn!("[JobScheduler] Job '{}' failed: {}", name, error);
            metrics.job_runs.with_label_values(&[name, "failed"]).inc();
        }
    }
    // Outcome is recorded before the lock is released
    locks.finish_execution(execution, result).await?;
    locks.release_lock(name).await?;
    Ok(())
}
