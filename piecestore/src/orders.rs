// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The orders persistence queue and bandwidth usage ledger (spec.md §1
//! "Out of scope"). Both are borrowed collaborators the endpoint never owns.

use async_trait::async_trait;
use piece_crypto::NodeId;
use thiserror::Error;

use crate::limit::{Action, SerialNumber};

/// The largest verified order seen in a session, recorded exactly once
/// regardless of how the session ends (invariant I1).
#[derive(Clone, Debug)]
pub struct OrderRecord {
    pub coordinator: NodeId,
    pub piece_id: crate::piece::PieceId,
    pub action: Action,
    pub serial_number: SerialNumber,
    pub amount: u64,
}

#[derive(Debug, Error, Clone)]
#[error("failed to enqueue order: {0}")]
pub struct OrdersError(pub String);

#[async_trait]
pub trait OrdersQueue: Send + Sync {
    /// Persist `record` for later settlement. Must succeed even when called
    /// from a session whose RPC context has already been cancelled (spec.md
    /// §5 "Cancellation": this call uses a non-cancellable context
    /// derivative upstream of this trait).
    async fn enqueue(&self, record: OrderRecord) -> Result<(), OrdersError>;
}

#[derive(Debug, Error, Clone)]
#[error("failed to record bandwidth usage: {0}")]
pub struct LedgerError(pub String);

#[async_trait]
pub trait BandwidthLedger: Send + Sync {
    async fn add(&self, coordinator: NodeId, action: Action, amount: i64) -> Result<(), LedgerError>;
}
