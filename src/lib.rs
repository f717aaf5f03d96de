// Copyright (c) Arcadia Market, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation core for the marketplace escrow subsystem.
//!
//! Keeps the off-chain relational record of escrow/order state consistent
//! with an external, append-only ledger of events. The crate never builds or
//! submits fund-moving transactions; all ledger access is read-only through
//! the [`chain_client::ChainClient`] trait.

pub mod auditor;
pub mod chain_client;
pub mod config;
pub mod error;
pub mod events;
pub mod ingestor;
pub mod lock_store;
pub mod metrics;
pub mod node;
pub mod orchestrator;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod validator;

#[cfg(test)]
pub mod test_utils;


#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // Fixed 500ms delay between attempts (multiplier 1.0), bounded by
        // $max_elapsed_time. Exhaustion surfaces as the outer Err.
        let backoff = backoff::ExponentialBackoff {
            initial_interval: std::time::Duration::from_millis(500),
            randomization_factor: 0.1,
            multiplier: 1.0,
            max_interval: std::time::Duration::from_millis(500),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
