// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

/// Prometheus metric bundle for the reconciliation core
#[derive(Clone, Debug)]
pub struct ReconcilerMetrics {
    pub(crate) events_ingested: IntCounterVec,
    pub(crate) events_duplicate: IntCounter,
    pub(crate) events_unrecognized: IntCounter,
    pub(crate) events_processed: IntCounterVec,
    pub(crate) reconcile_errors: IntCounter,

    pub(crate) last_synced_block: IntGauge,
    pub(crate) latest_block: IntGauge,
    pub(crate) confirmed_block: IntGauge,
    pub(crate) sync_batches: IntCounterVec,
    pub(crate) validation_failures: IntCounter,

    pub(crate) job_runs: IntCounterVec,
    pub(crate) job_skipped_lock_contention: IntCounterVec,

    pub(crate) audit_discrepancies: IntGauge,

    pub(crate) rpc_retries_exhausted: IntCounterVec,
}

impl ReconcilerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_ingested: register_int_counter_vec_with_registry!(
                "reconciler_events_ingested",
                "Raw events persisted, by ingestion source",
                &["source"],
                registry,
            )
            .unwrap(),
            events_duplicate: register_int_counter_with_registry!(
                "reconciler_events_duplicate",
                "Events skipped because their tx id was already stored",
                registry,
            )
            .unwrap(),
            events_unrecognized: register_int_counter_with_registry!(
                "reconciler_events_unrecognized",
                "Logs whose event name is not part of the escrow lifecycle",
                registry,
            )
            .unwrap(),
            events_processed: register_int_counter_vec_with_registry!(
                "reconciler_events_processed",
                "Raw events applied by the reconciler, by event kind",
                &["event"],
                registry,
            )
            .unwrap(),
            reconcile_errors: register_int_counter_with_registry!(
                "reconciler_reconcile_errors",
                "Per-event reconciliation failures",
                registry,
            )
            .unwrap(),
            last_synced_block: register_int_gauge_with_registry!(
                "reconciler_last_synced_block",
                "Checkpoint block: last fully processed ledger position",
                registry,
            )
            .unwrap(),
            latest_block: register_int_gauge_with_registry!(
                "reconciler_latest_block",
                "Latest observed chain head",
                registry,
            )
            .unwrap(),
            confirmed_block: register_int_gauge_with_registry!(
                "reconciler_confirmed_block",
                "Chain head minus confirmation depth",
                registry,
            )
            .unwrap(),
            sync_batches: register_int_counter_vec_with_registry!(
                "reconciler_sync_batches",
                "Sync batches, by outcome",
                &["outcome"],
                registry,
            )
            .unwrap(),
            validation_failures: register_int_counter_with_registry!(
                "reconciler_validation_failures",
                "Block ranges that failed chain validation",
                registry,
            )
            .unwrap(),
            job_runs: register_int_counter_vec_with_registry!(
                "reconciler_job_runs",
                "Scheduled job runs, by job and outcome",
                &["job", "outcome"],
                registry,
            )
            .unwrap(),
            job_skipped_lock_contention: register_int_counter_vec_with_registry!(
                "reconciler_job_skipped_lock_contention",
                "Scheduled ticks skipped because the job lock was held",
                &["job"],
                registry,
            )
            .unwrap(),
            audit_discrepancies: register_int_gauge_with_registry!(
                "reconciler_audit_discrepancies",
                "Discrepancies found by the most recent consistency audit",
                registry,
            )
            .unwrap(),
            rpc_retries_exhausted: register_int_counter_vec_with_registry!(
                "reconciler_rpc_retries_exhausted",
                "Chain client calls that failed after exhausting retries",
                &["call"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}
