// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Result type used throughout the reconciliation core
pub type ReconcilerResult<T> = Result<T, ReconcilerError>;

/// Errors that can occur in the reconciliation core
///
/// Variants map 1:1 onto the failure taxonomy the orchestrator acts on:
/// `Rpc` is transient and retried, `Validation` halts checkpoint
/// advancement, everything else is surfaced per-item or per-call.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Transient chain client failure, safe to retry
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    /// Block or chain-linkage validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Referenced escrow mapping does not exist in the domain store
    #[error("Escrow not found: {0}")]
    EscrowNotFound(String),

    /// Event payload could not be decoded into the expected shape
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconcilerError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            ReconcilerError::Rpc(_) => "rpc_error",
            ReconcilerError::BlockNotFound(_) => "block_not_found",
            ReconcilerError::Validation(_) => "validation_error",
            ReconcilerError::Storage(_) => "storage_error",
            ReconcilerError::EscrowNotFound(_) => "escrow_not_found",
            ReconcilerError::InvalidPayload(_) => "invalid_payload",
            ReconcilerError::Internal(_) => "internal_error",
        }
    }

    /// Whether a retry against the chain client can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcilerError::Rpc(_))
    }
}

impl From<anyhow::Error> for ReconcilerError {
    fn from(e: anyhow::Error) -> Self {
        ReconcilerError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for ReconcilerError {
    fn from(e: serde_json::Error) -> Self {
        ReconcilerError::InvalidPayload(e.to_string())
    }
}
