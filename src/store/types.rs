// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::chain_client::LedgerLog;
use crate::events::{EscrowEventKind, EscrowStatus, OrderStatus};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One row per ledger event, keyed by the globally unique `tx_id`.
///
/// Created by the ingestor (live or backfill), mutated once by the
/// reconciler, never deleted by this subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub tx_id: String,
    pub event: EscrowEventKind,
    pub contract_address: String,
    pub block_number: u64,
    pub block_hash: String,
    pub log_index: u32,
    pub payload: serde_json::Value,
    pub escrow_ref: Option<String>,
    pub processed: bool,
    pub processed_at: Option<SystemTime>,
    pub error_message: Option<String>,
}

impl RawEvent {
    /// Build an unprocessed row from a ledger log.
    ///
    /// Returns `None` for event names this subsystem does not recognize.
    pub fn from_log(log: &LedgerLog) -> Option<Self> {
        let event = EscrowEventKind::from_event_name(&log.event_name)?;
        let escrow_ref = log
            .payload
            .get("escrow_ref")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Some(Self {
            tx_id: log.tx_id.clone(),
            event,
            contract_address: log.contract_address.clone(),
            block_number: log.block_number,
            block_hash: log.block_hash.clone(),
            log_index: log.log_index,
            payload: log.payload.clone(),
            escrow_ref,
            processed: false,
            processed_at: None,
            error_message: None,
        })
    }

    /// Ordering key: ledger order regardless of delivery order
    pub fn order_key(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// Sync lifecycle state over the checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Active,
    Paused,
    Error,
    Resyncing,
}

/// Singleton per deployment: the last ledger position known to be fully
/// and validly processed, plus lifetime counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub last_synced_block: u64,
    pub last_synced_block_hash: String,
    pub status: SyncStatus,
    pub last_sync_at: Option<SystemTime>,
    pub last_error: Option<String>,
    pub total_events_processed: u64,
    pub total_errors: u64,
}

impl SyncCheckpoint {
    /// Fresh checkpoint starting at the given block
    pub fn starting_at(block: u64) -> Self {
        Self {
            last_synced_block: block,
            last_synced_block_hash: String::new(),
            status: SyncStatus::Active,
            last_sync_at: None,
            last_error: None,
            total_events_processed: 0,
            total_errors: 0,
        }
    }
}

/// One-to-one order/escrow mapping owned by the CRUD layer; the reconciler
/// mutates only `status`, forward-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowMapping {
    pub order_ref: String,
    pub escrow_ref: String,
    pub status: EscrowStatus,
}

/// Order record subset read by the consistency auditor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_ref: String,
    pub escrow_ref: Option<String>,
    pub status: OrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_log(event_name: &str) -> LedgerLog {
        LedgerLog {
            tx_id: "0xtx1".to_string(),
            event_name: event_name.to_string(),
            contract_address: "0xescrow".to_string(),
            block_number: 100,
            block_hash: "0xb100".to_string(),
            log_index: 3,
            payload: json!({ "escrow_ref": "E1", "amount": "500" }),
        }
    }

    #[test]
    fn test_raw_event_from_log() {
        let event = RawEvent::from_log(&sample_log("EscrowCreated")).unwrap();
        assert_eq!(event.event, EscrowEventKind::Created);
        assert_eq!(event.escrow_ref.as_deref(), Some("E1"));
        assert!(!event.processed);
        assert_eq!(event.order_key(), (100, 3));
    }

    #[test]
    fn test_raw_event_from_unknown_log() {
        assert!(RawEvent::from_log(&sample_log("Transfer")).is_none());
    }

    #[test]
    fn test_checkpoint_starting_at() {
        let checkpoint = SyncCheckpoint::starting_at(500);
        assert_eq!(checkpoint.last_synced_block, 500);
        assert_eq!(checkpoint.status, SyncStatus::Active);
        assert_eq!(checkpoint.total_events_processed, 0);
    }
}
