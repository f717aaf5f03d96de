// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Raw event ingestion: live subscriptions and historical backfill.
//!
//! Both paths converge on the same dedup rule: a `tx_id` already stored is
//! skipped. Ingestion never touches domain status; that is the
//! reconciler's job.

use crate::chain_client::{ChainClient, LedgerLog};
use crate::error::ReconcilerResult;
use crate::events::EscrowEventKind;
use crate::metrics::ReconcilerMetrics;
use crate::store::{RawEvent, RawEventStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Persists ledger events idempotently, keyed by `tx_id`
pub struct EventIngestor {
    chain_name: String,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn RawEventStore>,
    metrics: Arc<ReconcilerMetrics>,
}

impl EventIngestor {
    pub fn new(
        chain_name: &str,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn RawEventStore>,
        metrics: Arc<ReconcilerMetrics>,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            client,
            store,
            metrics,
        }
    }

    /// Attach one live subscription per event kind.
    ///
    /// Each subscription runs in its own task until the token is cancelled.
    /// A persistence failure for one event is logged and skipped; it will
    /// be picked up again by the next backfill over that range.
    pub async fn ingest_live(
        &self,
        cancel: CancellationToken,
    ) -> ReconcilerResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        for kind in EscrowEventKind::all() {
            let mut rx = self.client.subscribe(kind.event_name()).await?;
            let store = self.store.clone();
            let metrics = self.metrics.clone();
            let chain_name = self.chain_name.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                info!("[{}] Live ingestion started for {}", chain_name, kind);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("[{}] Live ingestion cancelled for {}", chain_name, kind);
                            break;
                        }
                        log = rx.recv() => {
                            let Some(log) = log else {
                                warn!("[{}] Subscription closed for {}", chain_name, kind);
                                break;
                            };
                            if let Err(e) =
                                store_log(&chain_name, &store, &metrics, &log, "live").await
                            {
                                warn!(
                                    "[{}] Failed to persist live event tx={}: {:?}",
                                    chain_name, log.tx_id, e
                                );
                            }
                        }
                    }
                }
            }));
        }
        Ok(handles)
    }

    /// Query historical logs for every event kind over `from..=to` and
    /// persist the ones not yet stored. Returns the newly stored rows.
    ///
    /// A query failure propagates to the caller for retry; a persistence
    /// failure for one event is logged and skipped.
    pub async fn backfill(&self, from_block: u64, to_block: u64) -> ReconcilerResult<Vec<RawEvent>> {
        let mut stored = Vec::new();
        for kind in EscrowEventKind::all() {
            let logs = self
                .client
                .query_logs(kind.event_name(), from_block, to_block)
                .await?;
            debug!(
                "[{}] Backfill fetched {} {} logs (blocks {}-{})",
                self.chain_name,
                logs.len(),
                kind,
                from_block,
                to_block
            );
            for log in &logs {
                match store_log(&self.chain_name, &self.store, &self.metrics, log, "backfill")
                    .await
                {
                    Ok(Some(event)) => stored.push(event),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            "[{}] Failed to persist backfill event tx={}: {:?}",
                            self.chain_name, log.tx_id, e
                        );
                    }
                }
            }
        }
        if !stored.is_empty() {
            info!(
                "[{}] Backfill stored {} new events (blocks {}-{})",
                self.chain_name,
                stored.len(),
                from_block,
                to_block
            );
        }
        Ok(stored)
    }
}

/// Shared dedup-and-persist path for both ingestion modes.
/// Returns the stored row, or `None` for duplicates and unrecognized logs.
async fn store_log(
    chain_name: &str,
    store: &Arc<dyn RawEventStore>,
    metrics: &Arc<ReconcilerMetrics>,
    log: &LedgerLog,
    source: &str,
) -> ReconcilerResult<Option<RawEvent>> {
    let Some(event) = RawEvent::from_log(log) else {
        warn!(
            "[{}] Unrecognized event '{}' from {} (tx={})",
            chain_name, log.event_name, log.contract_address, log.tx_id
        );
        metrics.events_unrecognized.inc();
        return Ok(None);
    };

    if store.insert_if_absent(event.clone()).await? {
        debug!(
            "[{}] Stored {} event tx={} block={} ({})",
            chain_name, event.event, event.tx_id, event.block_number, source
        );
        metrics.events_ingested.with_label_values(&[source]).inc();
        Ok(Some(event))
    } else {
        metrics.events_duplicate.inc();
        Ok(None)
    }
}
