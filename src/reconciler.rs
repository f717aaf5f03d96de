// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Turns unprocessed raw events into canonical escrow status transitions.
//!
//! Events are applied in ledger order `(block_number, log_index)` regardless
//! of delivery order, exactly once per row. Status only moves forward along
//! the transition table; stale or duplicate transitions are marked processed
//! with a note and never mutate status. Each event's failure is isolated to
//! its own row.

use crate::error::ReconcilerResult;
use crate::events::target_status;
use crate::metrics::ReconcilerMetrics;
use crate::store::{EscrowStore, RawEventStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of reconciling one escrow
#[derive(Debug, Clone, Default)]
pub struct EscrowReconcileOutcome {
    /// Whether any status change was applied
    pub reconciled: bool,
    /// Human-readable change descriptions, in application order
    pub changes: Vec<String>,
    /// Rows marked processed (including stale/duplicate notes)
    pub processed: usize,
    /// Rows that failed and remain unprocessed
    pub errors: usize,
}

/// Outcome of a global pass over unprocessed rows
#[derive(Debug, Clone, Default)]
pub struct ReconcileBatchOutcome {
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
}

/// Outcome of reconciling every open escrow mapping
#[derive(Debug, Clone, Default)]
pub struct ReconcileAllOutcome {
    pub total: usize,
    pub reconciled: usize,
    pub errors: usize,
}

/// Applies raw events to the domain store, exactly once per event
pub struct StateReconciler {
    raw_events: Arc<dyn RawEventStore>,
    domain: Arc<dyn EscrowStore>,
    metrics: Arc<ReconcilerMetrics>,
}

impl StateReconciler {
    pub fn new(
        raw_events: Arc<dyn RawEventStore>,
        domain: Arc<dyn EscrowStore>,
        metrics: Arc<ReconcilerMetrics>,
    ) -> Self {
        Self {
            raw_events,
            domain,
            metrics,
        }
    }

    /// Apply all unprocessed events for one escrow, in ledger order.
    ///
    /// A missing mapping or bad payload fails only that row (recorded on
    /// the row, left unprocessed for retry); processing continues with the
    /// next event.
    pub async fn reconcile_escrow(
        &self,
        escrow_ref: &str,
    ) -> ReconcilerResult<EscrowReconcileOutcome> {
        let rows = self.raw_events.unprocessed_for_escrow(escrow_ref).await?;
        let mut outcome = EscrowReconcileOutcome::default();

        for row in rows {
            let target = match target_status(row.event, &row.payload) {
                Ok(target) => target,
                Err(e) => {
                    warn!(
                        "[StateReconciler] Bad payload for tx={} ({}): {:?}",
                        row.tx_id, row.event, e
                    );
                    self.raw_events
                        .mark_failed(&row.tx_id, e.to_string())
                        .await?;
                    self.metrics.reconcile_errors.inc();
                    outcome.errors += 1;
                    continue;
                }
            };

            let Some(mapping) = self.domain.get_mapping(escrow_ref).await? else {
                warn!(
                    "[StateReconciler] No escrow mapping for {} (tx={})",
                    escrow_ref, row.tx_id
                );
                self.raw_events
                    .mark_failed(
                        &row.tx_id,
                        format!("Escrow mapping {} not found", escrow_ref),
                    )
                    .await?;
                self.metrics.reconcile_errors.inc();
                outcome.errors += 1;
                continue;
            };

            if target.rank() > mapping.status.rank() {
                self.domain.update_status(escrow_ref, target).await?;
                let change = format!(
                    "{}: {} -> {} (block {}, {})",
                    escrow_ref, mapping.status, target, row.block_number, row.event
                );
                info!("[StateReconciler] {}", change);
                outcome.changes.push(change);
                self.raw_events.mark_processed(&row.tx_id, None).await?;
                self.metrics
                    .events_processed
                    .with_label_values(&[row.event.event_name()])
                    .inc();
            } else {
                debug!(
                    "[StateReconciler] Stale transition for {}: {} would not advance {} (tx={})",
                    escrow_ref, target, mapping.status, row.tx_id
                );
                self.raw_events
                    .mark_processed(
                        &row.tx_id,
                        Some(format!(
                            "Stale or duplicate transition: {} does not advance {}",
                            target, mapping.status
                        )),
                    )
                    .await?;
            }
            outcome.processed += 1;
        }

        outcome.reconciled = !outcome.changes.is_empty();
        Ok(outcome)
    }

    /// Scan all unprocessed rows in global ledger order, group by escrow and
    /// reconcile each group.
    ///
    /// Replay-safe and restart-safe: re-running after a crash re-derives the
    /// same end state because processed rows are skipped.
    pub async fn reconcile_unprocessed_events(&self) -> ReconcilerResult<ReconcileBatchOutcome> {
        let rows = self.raw_events.unprocessed_all().await?;
        let mut outcome = ReconcileBatchOutcome {
            total: rows.len(),
            ..Default::default()
        };

        // Escrow refs in order of first appearance; rows are already in
        // ledger order
        let mut seen = HashSet::new();
        let mut escrow_refs = Vec::new();
        for row in &rows {
            match row.escrow_ref.as_deref() {
                Some(escrow_ref) => {
                    if seen.insert(escrow_ref.to_string()) {
                        escrow_refs.push(escrow_ref.to_string());
                    }
                }
                None => {
                    warn!(
                        "[StateReconciler] Event tx={} carries no escrow reference",
                        row.tx_id
                    );
                    self.raw_events
                        .mark_failed(&row.tx_id, "Missing escrow reference".to_string())
                        .await?;
                    self.metrics.reconcile_errors.inc();
                    outcome.errors += 1;
                }
            }
        }

        for escrow_ref in escrow_refs {
            match self.reconcile_escrow(&escrow_ref).await {
                Ok(escrow_outcome) => {
                    outcome.processed += escrow_outcome.processed;
                    outcome.errors += escrow_outcome.errors;
                }
                Err(e) => {
                    // One failing escrow does not abort the batch
                    warn!(
                        "[StateReconciler] Failed to reconcile escrow {}: {:?}",
                        escrow_ref, e
                    );
                    self.metrics.reconcile_errors.inc();
                    outcome.errors += 1;
                }
            }
        }

        if outcome.total > 0 {
            info!(
                "[StateReconciler] Batch reconciled: total={} processed={} errors={}",
                outcome.total, outcome.processed, outcome.errors
            );
        }
        Ok(outcome)
    }

    /// Reconcile every escrow mapping not yet in a terminal status
    pub async fn reconcile_all(&self) -> ReconcilerResult<ReconcileAllOutcome> {
        let mappings = self.domain.open_mappings().await?;
        let mut outcome = ReconcileAllOutcome {
            total: mappings.len(),
            ..Default::default()
        };

        for mapping in mappings {
            match self.reconcile_escrow(&mapping.escrow_ref).await {
                Ok(escrow_outcome) => {
                    if escrow_outcome.reconciled {
                        outcome.reconciled += 1;
                    }
                    outcome.errors += escrow_outcome.errors;
                }
                Err(e) => {
                    warn!(
                        "[StateReconciler] Failed to reconcile escrow {}: {:?}",
                        mapping.escrow_ref, e
                    );
                    outcome.errors += 1;
                }
            }
        }
        Ok(outcome)
    }
}
