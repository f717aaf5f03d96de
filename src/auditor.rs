// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only cross-check between order status and escrow status.
//!
//! Discrepancies are reported, never auto-corrected: corrections flow
//! through the normal reconciliation path or manual intervention. The
//! auditor holds no write handle to any store.

use crate::error::ReconcilerResult;
use crate::events::{EscrowStatus, OrderStatus};
use crate::metrics::ReconcilerMetrics;
use crate::store::EscrowStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

/// One inconsistency between the order record and the escrow mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Discrepancy {
    /// Order status implies an escrow, but no mapping exists
    MissingEscrow {
        order_ref: String,
        order_status: OrderStatus,
    },
    /// Mapping exists but its status contradicts the order status
    StatusMismatch {
        order_ref: String,
        escrow_ref: String,
        order_status: OrderStatus,
        expected: EscrowStatus,
        actual: EscrowStatus,
    },
    /// Mapping references an order that no longer exists
    OrphanedEscrow {
        escrow_ref: String,
        order_ref: String,
    },
}

/// Result of one audit pass
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub audited_orders: usize,
    pub audited_escrows: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub completed_at: SystemTime,
    /// Whether escrow→order back-references were verified
    pub deep: bool,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Periodic read-only auditor over the domain store
pub struct ConsistencyAuditor {
    domain: Arc<dyn EscrowStore>,
    metrics: Arc<ReconcilerMetrics>,
}

impl ConsistencyAuditor {
    pub fn new(domain: Arc<dyn EscrowStore>, metrics: Arc<ReconcilerMetrics>) -> Self {
        Self { domain, metrics }
    }

    /// Order-side pass: every order whose status implies an escrow must
    /// have a mapping whose status matches the transition table.
    pub async fn audit(&self) -> ReconcilerResult<AuditReport> {
        self.run_audit(false).await
    }

    /// Deep pass: the order-side checks plus escrow→order back-reference
    /// verification. Scheduled weekly.
    pub async fn audit_deep(&self) -> ReconcilerResult<AuditReport> {
        self.run_audit(true).await
    }

    async fn run_audit(&self, deep: bool) -> ReconcilerResult<AuditReport> {
        let orders = self.domain.all_orders().await?;
        let mut discrepancies = Vec::new();
        let audited_orders = orders.len();

        for order in &orders {
            let Some(expected) = order.status.expected_escrow_status() else {
                continue;
            };
            let Some(escrow_ref) = order.escrow_ref.as_deref() else {
                discrepancies.push(Discrepancy::MissingEscrow {
                    order_ref: order.order_ref.clone(),
                    order_status: order.status,
                });
                continue;
            };
            match self.domain.get_mapping(escrow_ref).await? {
                None => {
                    discrepancies.push(Discrepancy::MissingEscrow {
                        order_ref: order.order_ref.clone(),
                        order_status: order.status,
                    });
                }
                Some(mapping) if mapping.status != expected => {
                    discrepancies.push(Discrepancy::StatusMismatch {
                        order_ref: order.order_ref.clone(),
                        escrow_ref: escrow_ref.to_string(),
                        order_status: order.status,
                        expected,
                        actual: mapping.status,
                    });
                }
                Some(_) => {}
            }
        }

        let mut audited_escrows = 0;
        if deep {
            let mappings = self.domain.all_mappings().await?;
            audited_escrows = mappings.len();
            for mapping in &mappings {
                if self.domain.get_order(&mapping.order_ref).await?.is_none() {
                    discrepancies.push(Discrepancy::OrphanedEscrow {
                        escrow_ref: mapping.escrow_ref.clone(),
                        order_ref: mapping.order_ref.clone(),
                    });
                }
            }
        }

        self.metrics
            .audit_discrepancies
            .set(discrepancies.len() as i64);
        if discrepancies.is_empty() {
            info!(
                "[ConsistencyAuditor] Consistent: {} orders, {} escrows checked (deep={})",
                audited_orders, audited_escrows, deep
            );
        } else {
            for discrepancy in &discrepancies {
                warn!("[ConsistencyAuditor] Discrepancy: {:?}", discrepancy);
            }
        }

        Ok(AuditReport {
            audited_orders,
            audited_escrows,
            discrepancies,
            completed_at: SystemTime::now(),
            deep,
        })
    }
}
