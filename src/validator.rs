// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block integrity and parent-link continuity checks.
//!
//! A range walk collects every error it finds rather than stopping at the
//! first, so a reorg or gap is surfaced in full extent. Checkpoints only
//! advance over ranges that validate cleanly.

use crate::chain_client::{BlockHeader, ChainClient};
use crate::error::ReconcilerResult;
use crate::events::truncate_hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of validating a single block
#[derive(Debug, Clone)]
pub struct BlockValidation {
    pub is_valid: bool,
    pub block: Option<BlockHeader>,
    pub errors: Vec<String>,
}

/// Result of walking a block range
#[derive(Debug, Clone)]
pub struct ChainValidation {
    pub is_valid: bool,
    pub validated_count: u64,
    pub errors: Vec<String>,
    /// Header of the last block in the range, when it was fetchable.
    /// Used by the orchestrator to record the checkpoint hash.
    pub last_block: Option<BlockHeader>,
}

/// Validates blocks and chain linkage through a read-only chain client
pub struct BlockValidator {
    chain_name: String,
    client: Arc<dyn ChainClient>,
}

impl BlockValidator {
    pub fn new(chain_name: &str, client: Arc<dyn ChainClient>) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            client,
        }
    }

    /// Verify a single block: it exists, carries a non-empty hash, reports
    /// the requested number, a non-zero timestamp and (for n > 0) a
    /// non-empty parent hash.
    pub async fn validate_block(&self, number: u64) -> ReconcilerResult<BlockValidation> {
        let block = self.client.get_block(number).await?;
        let Some(block) = block else {
            return Ok(BlockValidation {
                is_valid: false,
                block: None,
                errors: vec![format!("Block {} not found", number)],
            });
        };

        let mut errors = Vec::new();
        if block.hash.is_empty() {
            errors.push(format!("Block {} has an empty hash", number));
        }
        if block.number != number {
            errors.push(format!(
                "Block {} reports number {} instead",
                number, block.number
            ));
        }
        if block.timestamp == 0 {
            errors.push(format!("Block {} has a zero timestamp", number));
        }
        if number > 0 && block.parent_hash.is_empty() {
            errors.push(format!("Block {} has an empty parent hash", number));
        }

        Ok(BlockValidation {
            is_valid: errors.is_empty(),
            block: Some(block),
            errors,
        })
    }

    /// Walk `from..=to`, validating each block and asserting
    /// `block[n].parent_hash == block[n-1].hash`.
    ///
    /// Linkage breaks are recorded but do not stop the walk: all errors are
    /// collected so the full extent of a reorg or gap is visible.
    pub async fn validate_block_chain(
        &self,
        from: u64,
        to: u64,
    ) -> ReconcilerResult<ChainValidation> {
        let mut errors = Vec::new();
        let mut validated_count = 0u64;
        let mut previous: Option<BlockHeader> = None;
        let mut last_block = None;

        for number in from..=to {
            let validation = self.validate_block(number).await?;
            errors.extend(validation.errors);

            let Some(block) = validation.block else {
                previous = None;
                continue;
            };
            validated_count += 1;

            if let Some(prev) = previous.as_ref() {
                if block.parent_hash != prev.hash {
                    warn!(
                        "[{}] Chain discontinuity at block {}: expected parent {} but got {}",
                        self.chain_name,
                        number,
                        truncate_hash(&prev.hash),
                        truncate_hash(&block.parent_hash)
                    );
                    errors.push(format!(
                        "Parent hash mismatch at block {}: expected {} but got {}",
                        number,
                        truncate_hash(&prev.hash),
                        truncate_hash(&block.parent_hash)
                    ));
                }
            }
            previous = Some(block.clone());
            last_block = Some(block);
        }

        let is_valid = errors.is_empty();
        if is_valid {
            debug!(
                "[{}] Validated blocks {}-{} ({} blocks)",
                self.chain_name, from, to, validated_count
            );
        }

        Ok(ChainValidation {
            is_valid,
            validated_count,
            errors,
            last_block,
        })
    }

    pub async fn latest_block_number(&self) -> ReconcilerResult<u64> {
        self.client.get_latest_block_number().await
    }

    pub async fn latest_block(&self) -> ReconcilerResult<Option<BlockHeader>> {
        let latest = self.client.get_latest_block_number().await?;
        self.client.get_block(latest).await
    }

    /// Highest block considered safe to process: head minus confirmation
    /// depth. Shallow reorgs above this height never reach the reconciler.
    pub async fn confirmed_head(&self, confirmation_depth: u64) -> ReconcilerResult<u64> {
        let latest = self.client.get_latest_block_number().await?;
        Ok(latest.saturating_sub(confirmation_depth))
    }
}
