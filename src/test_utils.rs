// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Test fixtures: a scripted chain client and event builders.

use crate::chain_client::{BlockHeader, ChainClient, LedgerLog};
use crate::error::{ReconcilerError, ReconcilerResult};
use crate::events::EscrowEventKind;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, RwLock};

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<u64, BlockHeader>,
    logs: Vec<LedgerLog>,
    subscribers: HashMap<String, Vec<mpsc::Sender<LedgerLog>>>,
    fail_next: HashMap<String, u32>,
    call_counts: HashMap<String, usize>,
}

/// Scripted chain client: linked blocks, injectable logs, failure injection
/// and live subscription fan-out.
#[derive(Default)]
pub struct MockChainClient {
    inner: RwLock<Inner>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain of properly parent-linked blocks `from..=to`
    pub fn with_linked_blocks(from: u64, to: u64) -> Self {
        let client = Self::new();
        let mut inner = client.inner.try_write().expect("fresh lock");
        for number in from..=to {
            inner.blocks.insert(number, linked_header(number));
        }
        drop(inner);
        client
    }

    /// Extend the chain head up to `to`, keeping parent links intact
    pub async fn extend_chain(&self, to: u64) {
        let mut inner = self.inner.write().await;
        let start = inner.blocks.keys().max().map(|n| n + 1).unwrap_or(0);
        for number in start..=to {
            inner.blocks.insert(number, linked_header(number));
        }
    }

    /// Corrupt the parent hash of one block, simulating a reorg boundary
    pub async fn break_parent_link(&self, number: u64) {
        let mut inner = self.inner.write().await;
        if let Some(block) = inner.blocks.get_mut(&number) {
            block.parent_hash = format!("0xorphan{}", number);
        }
    }

    pub async fn set_block(&self, block: BlockHeader) {
        self.inner.write().await.blocks.insert(block.number, block);
    }

    /// Make a historical log visible to `query_logs`
    pub async fn add_log(&self, log: LedgerLog) {
        self.inner.write().await.logs.push(log);
    }

    /// Deliver a log to live subscribers of its event name
    pub async fn push_live(&self, log: LedgerLog) {
        let inner = self.inner.read().await;
        if let Some(senders) = inner.subscribers.get(&log.event_name) {
            for sender in senders {
                let _ = sender.send(log.clone()).await;
            }
        }
    }

    /// Fail the next `times` invocations of the named call with an RPC error
    pub async fn fail_next(&self, call: &str, times: u32) {
        self.inner
            .write()
            .await
            .fail_next
            .insert(call.to_string(), times);
    }

    pub async fn call_count(&self, call: &str) -> usize {
        self.inner
            .read()
            .await
            .call_counts
            .get(call)
            .copied()
            .unwrap_or(0)
    }

    async fn enter(&self, call: &str) -> ReconcilerResult<()> {
        let mut inner = self.inner.write().await;
        *inner.call_counts.entry(call.to_string()).or_insert(0) += 1;
        if let Some(remaining) = inner.fail_next.get_mut(call) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ReconcilerError::Rpc(format!(
                    "Injected failure for {}",
                    call
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_block(&self, number: u64) -> ReconcilerResult<Option<BlockHeader>> {
        self.enter("get_block").await?;
        Ok(self.inner.read().await.blocks.get(&number).cloned())
    }

    async fn get_latest_block_number(&self) -> ReconcilerResult<u64> {
        self.enter("get_latest_block_number").await?;
        self.inner
            .read()
            .await
            .blocks
            .keys()
            .max()
            .copied()
            .ok_or_else(|| ReconcilerError::Rpc("Empty chain".to_string()))
    }

    async fn query_logs(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> ReconcilerResult<Vec<LedgerLog>> {
        self.enter("query_logs").await?;
        let inner = self.inner.read().await;
        let mut logs: Vec<LedgerLog> = inner
            .logs
            .iter()
            .filter(|l| {
                l.event_name == event_name
                    && l.block_number >= from_block
                    && l.block_number <= to_block
            })
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(logs)
    }

    async fn subscribe(&self, event_name: &str) -> ReconcilerResult<mpsc::Receiver<LedgerLog>> {
        self.enter("subscribe").await?;
        let (tx, rx) = mpsc::channel(64);
        self.inner
            .write()
            .await
            .subscribers
            .entry(event_name.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

fn linked_header(number: u64) -> BlockHeader {
    BlockHeader {
        number,
        hash: format!("0xb{}", number),
        parent_hash: if number == 0 {
            "0xgenesis".to_string()
        } else {
            format!("0xb{}", number - 1)
        },
        timestamp: 1_700_000_000 + number,
    }
}

/// Escrow event log with a deterministic unique tx id
pub fn escrow_log(
    kind: EscrowEventKind,
    escrow_ref: &str,
    block_number: u64,
    log_index: u32,
) -> LedgerLog {
    LedgerLog {
        tx_id: format!("0xtx-{}-{}-{}", escrow_ref, block_number, log_index),
        event_name: kind.event_name().to_string(),
        contract_address: "0xescrow".to_string(),
        block_number,
        block_hash: format!("0xb{}", block_number),
        log_index,
        payload: json!({ "escrow_ref": escrow_ref }),
    }
}

/// DisputeResolved log carrying an explicit resolution code
pub fn dispute_resolved_log(
    escrow_ref: &str,
    block_number: u64,
    log_index: u32,
    resolution: &str,
) -> LedgerLog {
    let mut log = escrow_log(
        EscrowEventKind::DisputeResolved,
        escrow_ref,
        block_number,
        log_index,
    );
    log.payload = json!({ "escrow_ref": escrow_ref, "resolution": resolution });
    log
}
