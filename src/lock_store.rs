// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! TTL-based distributed locks and crash-recovery checkpoints over a
//! minimal key-value interface.
//!
//! The KV store is "durable enough": values expire, so it holds job locks,
//! execution records and resumable-batch progress, never the authoritative
//! `SyncCheckpoint`. Any backend with atomic conditional-set satisfies the
//! trait; the in-memory implementation backs tests and single-process
//! deployments.

use crate::error::{ReconcilerError, ReconcilerResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Minimal key-value semantics: conditional set with expiry, plus the
/// handful of operations the lock and checkpoint layers need.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set only if the key is absent, with optional expiry.
    /// Returns `true` if this call stored the value.
    async fn set_nx(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> ReconcilerResult<bool>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> ReconcilerResult<()>;

    async fn get(&self, key: &str) -> ReconcilerResult<Option<String>>;

    async fn del(&self, key: &str) -> ReconcilerResult<()>;

    /// Reset the expiry of an existing key. Returns `false` if absent.
    async fn expire(&self, key: &str, ttl: Duration) -> ReconcilerResult<bool>;

    /// Increment an integer value, creating it at 1 if absent
    async fn incr(&self, key: &str) -> ReconcilerResult<i64>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory KV store with lazy TTL expiry: entries are dropped when an
/// access observes them expired, not by a background sweeper.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set_nx(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> ReconcilerResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.expired()) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> ReconcilerResult<()> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> ReconcilerResult<Option<String>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> ReconcilerResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> ReconcilerResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> ReconcilerResult<i64> {
        let mut entries = self.entries.write().await;
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if !entry.expired() => {
                let value = entry
                    .value
                    .parse::<i64>()
                    .map_err(|e| ReconcilerError::Storage(format!("Non-integer value: {}", e)))?;
                (value, entry.expires_at)
            }
            _ => (0, None),
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }
}

/// Run outcome recorded for observability and crash-recovery hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    Completed,
    Failed,
}

/// TTL-bounded record of one scheduled job run. Observability only,
/// never load-bearing for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub job_name: String,
    pub execution_id: String,
    pub started_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub result: Option<String>,
}

/// Incremental progress of a resync, persisted after every batch so an
/// interrupted run resumes instead of restarting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncProgress {
    pub from_block: u64,
    pub current_block: u64,
    pub to_block: u64,
    pub completed: bool,
    pub error: Option<String>,
}

impl ResyncProgress {
    pub fn unfinished(&self) -> bool {
        !self.completed || self.error.is_some()
    }
}

const RESYNC_STATE_KEY: &str = "resync";

/// What startup recovery found and did
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub released_locks: Vec<String>,
    pub unfinished_resync: Option<ResyncProgress>,
}

/// Job lock and checkpoint facade over a [`KvStore`].
///
/// Lock keys are `lock:<jobName>`, existence means held. Each process gets
/// a unique owner id so a holder only ever releases its own lock.
pub struct JobLockStore {
    kv: Arc<dyn KvStore>,
    owner_id: String,
    execution_seq: AtomicU64,
    state_ttl: Duration,
}

impl JobLockStore {
    pub fn new(kv: Arc<dyn KvStore>, state_ttl: Duration) -> Self {
        let owner_id = format!(
            "{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        );
        Self {
            kv,
            owner_id,
            execution_seq: AtomicU64::new(0),
            state_ttl,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lock_key(name: &str) -> String {
        format!("lock:{}", name)
    }

    fn execution_key(name: &str) -> String {
        format!("job:{}:last-execution", name)
    }

    fn state_key(name: &str) -> String {
        format!("state:{}", name)
    }

    /// Atomic "set if absent, with expiry". Returns `true` only if this
    /// caller now holds the lock.
    pub async fn acquire_lock(&self, name: &str, ttl: Duration) -> ReconcilerResult<bool> {
        let acquired = self
            .kv
            .set_nx(&Self::lock_key(name), self.owner_id.clone(), Some(ttl))
            .await?;
        if acquired {
            debug!("[JobLockStore] Acquired lock:{} (ttl {:?})", name, ttl);
        }
        Ok(acquired)
    }

    /// Release the lock only if this process holds it
    pub async fn release_lock(&self, name: &str) -> ReconcilerResult<()> {
        let key = Self::lock_key(name);
        match self.kv.get(&key).await? {
            Some(owner) if owner == self.owner_id => {
                self.kv.del(&key).await?;
                debug!("[JobLockStore] Released lock:{}", name);
            }
            Some(_) => {
                warn!(
                    "[JobLockStore] Refusing to release lock:{} held by another owner",
                    name
                );
            }
            None => {}
        }
        Ok(())
    }

    pub async fn is_held(&self, name: &str) -> ReconcilerResult<bool> {
        Ok(self.kv.get(&Self::lock_key(name)).await?.is_some())
    }

    /// Start an execution record for a job run. Returns the record to be
    /// completed via [`JobLockStore::finish_execution`].
    pub async fn start_execution(&self, job_name: &str) -> ReconcilerResult<JobExecution> {
        let execution = JobExecution {
            job_name: job_name.to_string(),
            execution_id: format!(
                "{}-{}",
                self.owner_id,
                self.execution_seq.fetch_add(1, Ordering::Relaxed)
            ),
            started_at: SystemTime::now(),
            completed_at: None,
            status: ExecutionStatus::Started,
            error: None,
            result: None,
        };
        self.record_execution(&execution).await?;
        Ok(execution)
    }

    /// Record the outcome of a run. Must happen before the lock is released.
    pub async fn finish_execution(
        &self,
        mut execution: JobExecution,
        result: Result<String, String>,
    ) -> ReconcilerResult<()> {
        execution.completed_at = Some(SystemTime::now());
        match result {
            Ok(summary) => {
                execution.status = ExecutionStatus::Completed;
                execution.result = Some(summary);
            }
            Err(error) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(error);
            }
        }
        self.record_execution(&execution).await
    }

    async fn record_execution(&self, execution: &JobExecution) -> ReconcilerResult<()> {
        let value = serde_json::to_string(execution)?;
        self.kv
            .set(
                &Self::execution_key(&execution.job_name),
                value,
                Some(self.state_ttl),
            )
            .await
    }

    pub async fn last_execution(&self, job_name: &str) -> ReconcilerResult<Option<JobExecution>> {
        match self.kv.get(&Self::execution_key(job_name)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// TTL-bounded progress checkpoint, distinct from the authoritative
    /// `SyncCheckpoint`
    pub async fn save_state<T: Serialize + Sync>(
        &self,
        name: &str,
        state: &T,
    ) -> ReconcilerResult<()> {
        let value = serde_json::to_string(state)?;
        self.kv
            .set(&Self::state_key(name), value, Some(self.state_ttl))
            .await
    }

    pub async fn load_state<T: DeserializeOwned>(&self, name: &str) -> ReconcilerResult<Option<T>> {
        match self.kv.get(&Self::state_key(name)).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub async fn clear_state(&self, name: &str) -> ReconcilerResult<()> {
        self.kv.del(&Self::state_key(name)).await
    }

    pub async fn save_resync_progress(&self, progress: &ResyncProgress) -> ReconcilerResult<()> {
        self.save_state(RESYNC_STATE_KEY, progress).await
    }

    pub async fn load_resync_progress(&self) -> ReconcilerResult<Option<ResyncProgress>> {
        self.load_state(RESYNC_STATE_KEY).await
    }

    /// Startup recovery: release post-crash orphan locks and surface any
    /// unfinished resync so the caller can resume it.
    ///
    /// A lock is an orphan when it is held but the job's last execution
    /// record shows nothing in flight (finished, missing, or expired).
    pub async fn recover(&self, job_names: &[&str]) -> ReconcilerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for &name in job_names {
            if !self.is_held(name).await? {
                continue;
            }
            let in_flight = matches!(
                self.last_execution(name).await?,
                Some(JobExecution {
                    status: ExecutionStatus::Started,
                    ..
                })
            );
            if in_flight {
                // A live holder will finish or the TTL will expire
                continue;
            }
            warn!("[JobLockStore] Releasing orphaned lock:{}", name);
            self.kv.del(&Self::lock_key(name)).await?;
            report.released_locks.push(name.to_string());
        }

        if let Some(progress) = self.load_resync_progress().await? {
            if progress.unfinished() {
                info!(
                    "[JobLockStore] Unfinished resync detected: block {} of {}-{}",
                    progress.current_block, progress.from_block, progress.to_block
                );
                report.unfinished_resync = Some(progress);
            }
        }
        Ok(report)
    }
}
