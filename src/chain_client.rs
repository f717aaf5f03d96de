// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only ledger access.
//!
//! The reconciliation core talks to the ledger exclusively through
//! [`ChainClient`]. The trait is deliberately narrow: block lookup, head
//! lookup, historical log queries and live subscriptions. There is no
//! transaction-sending method; this subsystem must never move funds.

use crate::error::ReconcilerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Block header fields needed for validation and checkpointing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number/height
    pub number: u64,
    /// Block hash (hex string)
    pub hash: String,
    /// Parent block hash
    pub parent_hash: String,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.number,
            crate::events::truncate_hash(&self.hash)
        )
    }
}

/// A single event log emitted by the escrow contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLog {
    /// Globally unique transaction identifier (idempotency key)
    pub tx_id: String,
    /// Event name as emitted by the contract
    pub event_name: String,
    /// Contract/module address that emitted the event
    pub contract_address: String,
    /// Block where this log was emitted
    pub block_number: u64,
    pub block_hash: String,
    /// Log index within the block, used for intra-block ordering
    pub log_index: u32,
    /// Structured event arguments
    pub payload: serde_json::Value,
}

/// Narrow, chain-agnostic, read-only ledger client.
///
/// Any concrete ledger SDK can implement this; the core never depends on
/// SDK-specific subscription objects or ABI bindings.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch a block header by number. `Ok(None)` means the block does not
    /// exist (yet); transport failures are `Err`.
    async fn get_block(&self, number: u64) -> ReconcilerResult<Option<BlockHeader>>;

    /// Current chain head height
    async fn get_latest_block_number(&self) -> ReconcilerResult<u64>;

    /// Query historical logs for one event name over an inclusive range
    async fn query_logs(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> ReconcilerResult<Vec<LedgerLog>>;

    /// Subscribe to live logs for one event name.
    ///
    /// Delivery is at-least-once and may be out of order; the ingestor's
    /// idempotent insert makes duplicates harmless.
    async fn subscribe(&self, event_name: &str) -> ReconcilerResult<mpsc::Receiver<LedgerLog>>;
}
