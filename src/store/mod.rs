// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Repository seams for the reconciliation core.
//!
//! Persistence stays swappable: the core only ever sees the traits defined
//! here. The in-memory implementations back tests and single-process
//! deployments; a relational implementation can be dropped in without
//! touching the components.

mod memory;
mod types;

pub use memory::{MemoryCheckpointStore, MemoryEscrowStore, MemoryRawEventStore};
pub use types::{EscrowMapping, OrderRecord, RawEvent, SyncCheckpoint, SyncStatus};

use crate::error::ReconcilerResult;
use crate::events::EscrowStatus;
use async_trait::async_trait;

/// Raw ledger event rows, deduplicated by `tx_id`
#[async_trait]
pub trait RawEventStore: Send + Sync {
    /// Persist the event unless a row with the same `tx_id` already exists.
    /// Returns `true` if a new row was stored.
    async fn insert_if_absent(&self, event: RawEvent) -> ReconcilerResult<bool>;

    async fn contains(&self, tx_id: &str) -> ReconcilerResult<bool>;

    async fn get(&self, tx_id: &str) -> ReconcilerResult<Option<RawEvent>>;

    /// Unprocessed rows for one escrow, ordered by `(block_number, log_index)`
    /// ascending. This ordering is the reconciler's correctness guarantee.
    async fn unprocessed_for_escrow(&self, escrow_ref: &str) -> ReconcilerResult<Vec<RawEvent>>;

    /// All unprocessed rows, globally ordered by `(block_number, log_index)`
    async fn unprocessed_all(&self) -> ReconcilerResult<Vec<RawEvent>>;

    /// Mark a row processed, optionally with a note (e.g. stale/duplicate)
    async fn mark_processed(&self, tx_id: &str, note: Option<String>) -> ReconcilerResult<()>;

    /// Record a per-event failure, leaving the row unprocessed for retry
    async fn mark_failed(&self, tx_id: &str, error: String) -> ReconcilerResult<()>;

    async fn count(&self) -> ReconcilerResult<usize>;
}

/// Escrow/order status subset of the domain store.
///
/// The reconciler conditionally updates escrow status; the auditor only
/// reads. Order/mapping creation belongs to the CRUD layer.
#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn get_mapping(&self, escrow_ref: &str) -> ReconcilerResult<Option<EscrowMapping>>;

    async fn update_status(&self, escrow_ref: &str, status: EscrowStatus) -> ReconcilerResult<()>;

    /// Mappings whose status is not yet terminal
    async fn open_mappings(&self) -> ReconcilerResult<Vec<EscrowMapping>>;

    async fn all_mappings(&self) -> ReconcilerResult<Vec<EscrowMapping>>;

    async fn get_order(&self, order_ref: &str) -> ReconcilerResult<Option<OrderRecord>>;

    async fn all_orders(&self) -> ReconcilerResult<Vec<OrderRecord>>;
}

/// Singleton sync checkpoint, the authoritative long-lived sync record
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> ReconcilerResult<Option<SyncCheckpoint>>;

    /// Persist the checkpoint. Implementations must keep `last_synced_block`
    /// monotonic: an attempt to move it backward keeps the higher value.
    async fn save(&self, checkpoint: SyncCheckpoint) -> ReconcilerResult<()>;
}
