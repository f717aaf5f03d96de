// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the reconciliation core.
///
/// All intervals are wall-clock; timeouts are expressed as lock TTLs and
/// retry ceilings, never as mid-operation cancellation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReconcilerConfig {
    /// Chain identifier used in logs and metrics (e.g. "mainnet")
    pub chain_name: String,
    /// Escrow contract address events are expected from
    pub contract_address: String,
    /// Maximum blocks per sync batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Blocks held back from the head to tolerate shallow reorgs
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    /// First-ever run backfills only this many recent confirmed blocks
    #[serde(default = "default_bootstrap_blocks")]
    pub bootstrap_blocks: u64,
    /// A checkpoint older than this is considered stale
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Pause between resync batches (backpressure toward the chain client)
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// Retry budget for one chain client call within a batch
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,
    /// Consecutive failed batches tolerated during a resync
    #[serde(default = "default_max_batch_retries")]
    pub max_batch_retries: u32,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_status_check_interval_secs")]
    pub status_check_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_audit_interval_secs")]
    pub audit_interval_secs: u64,
    #[serde(default = "default_deep_audit_interval_secs")]
    pub deep_audit_interval_secs: u64,
    /// TTL bounding worst-case staleness of a crashed job's lock
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// TTL of job execution records and saved resync progress
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: u64,
}

fn default_batch_size() -> u64 {
    100
}
fn default_confirmation_depth() -> u64 {
    12
}
fn default_bootstrap_blocks() -> u64 {
    1_000
}
fn default_staleness_threshold_secs() -> u64 {
    300
}
fn default_batch_pause_ms() -> u64 {
    500
}
fn default_max_retry_secs() -> u64 {
    60
}
fn default_max_batch_retries() -> u32 {
    3
}
fn default_sync_interval_secs() -> u64 {
    30
}
fn default_status_check_interval_secs() -> u64 {
    60
}
fn default_reconcile_interval_secs() -> u64 {
    600
}
fn default_audit_interval_secs() -> u64 {
    1_800
}
fn default_deep_audit_interval_secs() -> u64 {
    604_800
}
fn default_lock_ttl_secs() -> u64 {
    120
}
fn default_state_ttl_secs() -> u64 {
    86_400
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            chain_name: "local".to_string(),
            contract_address: String::new(),
            batch_size: default_batch_size(),
            confirmation_depth: default_confirmation_depth(),
            bootstrap_blocks: default_bootstrap_blocks(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            batch_pause_ms: default_batch_pause_ms(),
            max_retry_secs: default_max_retry_secs(),
            max_batch_retries: default_max_batch_retries(),
            sync_interval_secs: default_sync_interval_secs(),
            status_check_interval_secs: default_status_check_interval_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            audit_interval_secs: default_audit_interval_secs(),
            deep_audit_interval_secs: default_deep_audit_interval_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            state_ttl_secs: default_state_ttl_secs(),
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chain_name.is_empty() {
            return Err("chain-name must not be empty".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch-size must be greater than zero".to_string());
        }
        if self.lock_ttl_secs == 0 {
            return Err("lock-ttl-secs must be greater than zero".to_string());
        }
        if self.max_batch_retries == 0 {
            return Err("max-batch-retries must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn max_retry_duration(&self) -> Duration {
        Duration::from_secs(self.max_retry_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }
}
