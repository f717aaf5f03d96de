// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory repository implementations.
//!
//! Backed by `RwLock`-guarded maps, same shape as a relational table keyed
//! by primary key. Used in tests and single-process deployments.

use super::types::{EscrowMapping, OrderRecord, RawEvent, SyncCheckpoint};
use super::{CheckpointStore, EscrowStore, RawEventStore};
use crate::error::{ReconcilerError, ReconcilerResult};
use crate::events::EscrowStatus;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::warn;

/// Raw event rows keyed by `tx_id`
#[derive(Default)]
pub struct MemoryRawEventStore {
    events: RwLock<HashMap<String, RawEvent>>,
}

impl MemoryRawEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawEventStore for MemoryRawEventStore {
    async fn insert_if_absent(&self, event: RawEvent) -> ReconcilerResult<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.tx_id) {
            return Ok(false);
        }
        events.insert(event.tx_id.clone(), event);
        Ok(true)
    }

    async fn contains(&self, tx_id: &str) -> ReconcilerResult<bool> {
        Ok(self.events.read().await.contains_key(tx_id))
    }

    async fn get(&self, tx_id: &str) -> ReconcilerResult<Option<RawEvent>> {
        Ok(self.events.read().await.get(tx_id).cloned())
    }

    async fn unprocessed_for_escrow(&self, escrow_ref: &str) -> ReconcilerResult<Vec<RawEvent>> {
        let events = self.events.read().await;
        let mut rows: Vec<RawEvent> = events
            .values()
            .filter(|e| !e.processed && e.escrow_ref.as_deref() == Some(escrow_ref))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.order_key());
        Ok(rows)
    }

    async fn unprocessed_all(&self) -> ReconcilerResult<Vec<RawEvent>> {
        let events = self.events.read().await;
        let mut rows: Vec<RawEvent> = events.values().filter(|e| !e.processed).cloned().collect();
        rows.sort_by_key(|e| e.order_key());
        Ok(rows)
    }

    async fn mark_processed(&self, tx_id: &str, note: Option<String>) -> ReconcilerResult<()> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(tx_id)
            .ok_or_else(|| ReconcilerError::Storage(format!("No raw event for tx {}", tx_id)))?;
        event.processed = true;
        event.processed_at = Some(SystemTime::now());
        event.error_message = note;
        Ok(())
    }

    async fn mark_failed(&self, tx_id: &str, error: String) -> ReconcilerResult<()> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(tx_id)
            .ok_or_else(|| ReconcilerError::Storage(format!("No raw event for tx {}", tx_id)))?;
        event.processed = false;
        event.error_message = Some(error);
        Ok(())
    }

    async fn count(&self) -> ReconcilerResult<usize> {
        Ok(self.events.read().await.len())
    }
}

/// Escrow mappings and order records keyed by their refs
#[derive(Default)]
pub struct MemoryEscrowStore {
    mappings: RwLock<BTreeMap<String, EscrowMapping>>,
    orders: RwLock<BTreeMap<String, OrderRecord>>,
}

impl MemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a mapping, normally the CRUD layer's job
    pub async fn upsert_mapping(&self, mapping: EscrowMapping) {
        self.mappings
            .write()
            .await
            .insert(mapping.escrow_ref.clone(), mapping);
    }

    /// Seed an order record, normally the CRUD layer's job
    pub async fn upsert_order(&self, order: OrderRecord) {
        self.orders
            .write()
            .await
            .insert(order.order_ref.clone(), order);
    }
}

#[async_trait]
impl EscrowStore for MemoryEscrowStore {
    async fn get_mapping(&self, escrow_ref: &str) -> ReconcilerResult<Option<EscrowMapping>> {
        Ok(self.mappings.read().await.get(escrow_ref).cloned())
    }

    async fn update_status(&self, escrow_ref: &str, status: EscrowStatus) -> ReconcilerResult<()> {
        let mut mappings = self.mappings.write().await;
        let mapping = mappings
            .get_mut(escrow_ref)
            .ok_or_else(|| ReconcilerError::EscrowNotFound(escrow_ref.to_string()))?;
        mapping.status = status;
        Ok(())
    }

    async fn open_mappings(&self) -> ReconcilerResult<Vec<EscrowMapping>> {
        Ok(self
            .mappings
            .read()
            .await
            .values()
            .filter(|m| !m.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn all_mappings(&self) -> ReconcilerResult<Vec<EscrowMapping>> {
        Ok(self.mappings.read().await.values().cloned().collect())
    }

    async fn get_order(&self, order_ref: &str) -> ReconcilerResult<Option<OrderRecord>> {
        Ok(self.orders.read().await.get(order_ref).cloned())
    }

    async fn all_orders(&self) -> ReconcilerResult<Vec<OrderRecord>> {
        Ok(self.orders.read().await.values().cloned().collect())
    }
}

/// Singleton checkpoint with monotonic `last_synced_block` enforcement
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoint: RwLock<Option<SyncCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> ReconcilerResult<Option<SyncCheckpoint>> {
        Ok(self.checkpoint.read().await.clone())
    }

    async fn save(&self, mut checkpoint: SyncCheckpoint) -> ReconcilerResult<()> {
        let mut current = self.checkpoint.write().await;
        if let Some(existing) = current.as_ref() {
            if checkpoint.last_synced_block < existing.last_synced_block {
                warn!(
                    "[CheckpointStore] Refusing to move checkpoint backward: {} < {}",
                    checkpoint.last_synced_block, existing.last_synced_block
                );
                checkpoint.last_synced_block = existing.last_synced_block;
                checkpoint.last_synced_block_hash = existing.last_synced_block_hash.clone();
            }
        }
        *current = Some(checkpoint);
        Ok(())
    }
}
