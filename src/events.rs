// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Escrow event model and the deterministic status transition table.
//!
//! The ledger emits one event per escrow lifecycle step. Each event maps to
//! a target [`EscrowStatus`]; the reconciler only ever moves status forward
//! along the rank ordering defined here, never backward.

use crate::error::{ReconcilerError, ReconcilerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger event kinds recognized by the reconciliation core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowEventKind {
    Created,
    Locked,
    Released,
    Refunded,
    DisputeOpened,
    DisputeResolved,
}

impl EscrowEventKind {
    /// Event name as emitted by the escrow contract
    pub fn event_name(&self) -> &'static str {
        match self {
            EscrowEventKind::Created => "EscrowCreated",
            EscrowEventKind::Locked => "FundsLocked",
            EscrowEventKind::Released => "FundsReleased",
            EscrowEventKind::Refunded => "FundsRefunded",
            EscrowEventKind::DisputeOpened => "DisputeOpened",
            EscrowEventKind::DisputeResolved => "DisputeResolved",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "EscrowCreated" => Some(EscrowEventKind::Created),
            "FundsLocked" => Some(EscrowEventKind::Locked),
            "FundsReleased" => Some(EscrowEventKind::Released),
            "FundsRefunded" => Some(EscrowEventKind::Refunded),
            "DisputeOpened" => Some(EscrowEventKind::DisputeOpened),
            "DisputeResolved" => Some(EscrowEventKind::DisputeResolved),
            _ => None,
        }
    }

    /// All kinds, in lifecycle order. Used to attach one subscription and
    /// one backfill query per kind.
    pub fn all() -> [EscrowEventKind; 6] {
        [
            EscrowEventKind::Created,
            EscrowEventKind::Locked,
            EscrowEventKind::Released,
            EscrowEventKind::Refunded,
            EscrowEventKind::DisputeOpened,
            EscrowEventKind::DisputeResolved,
        ]
    }
}

impl fmt::Display for EscrowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

/// Escrow status in the domain store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    Pending,
    Locked,
    Released,
    Refunded,
    Disputed,
}

impl EscrowStatus {
    /// Forward-only ordering of escrow statuses.
    ///
    /// Released and Refunded share the terminal rank: which one applies is
    /// decided by the ledger, and neither can be re-entered from the other.
    pub fn rank(&self) -> u8 {
        match self {
            EscrowStatus::Pending => 0,
            EscrowStatus::Locked => 1,
            EscrowStatus::Disputed => 2,
            EscrowStatus::Released => 3,
            EscrowStatus::Refunded => 3,
        }
    }

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EscrowStatus::Pending => "PENDING",
            EscrowStatus::Locked => "LOCKED",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Refunded => "REFUNDED",
            EscrowStatus::Disputed => "DISPUTED",
        };
        write!(f, "{}", s)
    }
}

/// Order status subset consumed by the consistency auditor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    OnchainPending,
    OnchainLocked,
    Completed,
    Refunded,
    Disputed,
}

impl OrderStatus {
    /// The escrow status this order status implies, if any.
    ///
    /// `None` means no escrow is expected to exist yet.
    pub fn expected_escrow_status(&self) -> Option<EscrowStatus> {
        match self {
            OrderStatus::Draft => None,
            OrderStatus::OnchainPending => Some(EscrowStatus::Pending),
            OrderStatus::OnchainLocked => Some(EscrowStatus::Locked),
            OrderStatus::Completed => Some(EscrowStatus::Released),
            OrderStatus::Refunded => Some(EscrowStatus::Refunded),
            OrderStatus::Disputed => Some(EscrowStatus::Disputed),
        }
    }
}

/// Explicit dispute resolution code carried in `DisputeResolved` payloads.
///
/// Replaces substring matching on free-form resolution strings: an unknown
/// code is a per-event error, never a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    RefundBuyer,
    ReleaseSeller,
}

impl DisputeResolution {
    pub fn target_status(&self) -> EscrowStatus {
        match self {
            DisputeResolution::RefundBuyer => EscrowStatus::Refunded,
            DisputeResolution::ReleaseSeller => EscrowStatus::Released,
        }
    }
}

/// Target escrow status for an event, per the transition table.
///
/// `DisputeResolved` needs its payload to decide between the two terminal
/// statuses; the payload must carry a `resolution` field with an exact
/// [`DisputeResolution`] code.
pub fn target_status(
    kind: EscrowEventKind,
    payload: &serde_json::Value,
) -> ReconcilerResult<EscrowStatus> {
    match kind {
        EscrowEventKind::Created => Ok(EscrowStatus::Pending),
        EscrowEventKind::Locked => Ok(EscrowStatus::Locked),
        EscrowEventKind::Released => Ok(EscrowStatus::Released),
        EscrowEventKind::Refunded => Ok(EscrowStatus::Refunded),
        EscrowEventKind::DisputeOpened => Ok(EscrowStatus::Disputed),
        EscrowEventKind::DisputeResolved => {
            let resolution = payload.get("resolution").ok_or_else(|| {
                ReconcilerError::InvalidPayload(
                    "DisputeResolved payload missing 'resolution'".to_string(),
                )
            })?;
            let resolution: DisputeResolution = serde_json::from_value(resolution.clone())
                .map_err(|e| {
                    ReconcilerError::InvalidPayload(format!(
                        "Unrecognized dispute resolution code: {}",
                        e
                    ))
                })?;
            Ok(resolution.target_status())
        }
    }
}

/// Helper to truncate hash for display
pub fn truncate_hash(hash: &str) -> String {
    if hash.len() > 16 {
        format!("{}...{}", &hash[..8], &hash[hash.len() - 6..])
    } else {
        hash.to_string()
    }
}
