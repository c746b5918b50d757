// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! RPC message shapes and stream traits (spec.md §6 "External Interfaces").
//!
//! Framing, TLS, and peer-identity extraction are out of scope (spec.md
//! §1); what's here is the shape a transport crate (tonic, drpc-rs, ...)
//! would adapt its generated types into, plus the minimal trait boundary
//! the endpoint drives. A real binding owns exactly one adapter per trait
//! here; tests in this crate use the in-memory ones in [`crate::testing`].

use std::time::SystemTime;

use async_trait::async_trait;
use piece_crypto::Signature;
use piecestore::{
    limit::{Order, OrderLimit},
    piece::PieceHash,
};
use thiserror::Error;

/// A failure reading or writing the underlying stream.
///
/// `Eof` and `Cancelled` are not endpoint errors (spec.md §5
/// "Cancellation"); handlers branch on them before anything is logged at
/// `warn!`/`error!` level.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("stream closed by peer")]
    Eof,
    #[error("stream cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_peer_gone(&self) -> bool {
        matches!(self, Self::Eof | Self::Cancelled)
    }
}

/// One inbound message of an Upload RPC (spec.md §6, "Subsequent" column).
#[derive(Clone, Debug)]
pub enum UploadRequest {
    Limit(OrderLimit),
    Order(Order),
    Chunk { offset: u64, data: Vec<u8> },
    Done {
        hash: PieceHash,
        piece_size: u64,
        uplink_signature: Signature,
        timestamp: SystemTime,
    },
}

/// The single terminal response of an Upload RPC: the storage node's signed
/// receipt (spec.md §6).
#[derive(Clone, Debug)]
pub struct UploadResponse {
    pub piece_id: piecestore::piece::PieceId,
    pub hash: PieceHash,
    pub piece_size: u64,
    pub timestamp: SystemTime,
    pub storage_node_signature: Signature,
}

#[async_trait]
pub trait UploadStream: Send {
    async fn recv(&mut self) -> Result<UploadRequest, TransportError>;
    async fn send(&mut self, resp: UploadResponse) -> Result<(), TransportError>;
}

/// The first inbound message of a Download RPC (spec.md §6: "{limit,
/// chunk{offset,size}}").
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    pub limit: OrderLimit,
    pub offset: u64,
    pub size: u64,
}

/// One outbound message of a Download RPC.
#[derive(Clone, Debug)]
pub enum DownloadResponse {
    /// Leading frame sent only for `GET_REPAIR` (spec.md §4.4).
    Header { hash: PieceHash, limit: OrderLimit },
    Chunk { offset: u64, data: Vec<u8> },
}

/// The send half of a Download RPC, driven by the consumer task.
#[async_trait]
pub trait DownloadSink: Send {
    async fn send(&mut self, resp: DownloadResponse) -> Result<(), TransportError>;
}

/// The receive half of a Download RPC, driven by the producer task. Only
/// `order` messages arrive after the first combined request (spec.md §6).
#[async_trait]
pub trait DownloadSource: Send {
    async fn recv(&mut self) -> Result<Order, TransportError>;
}

/// Inbound `DeletePieces` request (spec.md §6).
#[derive(Clone, Debug)]
pub struct DeletePiecesRequest {
    pub piece_ids: Vec<piecestore::piece::PieceId>,
}

#[derive(Clone, Debug)]
pub struct DeletePiecesResponse {
    pub unhandled_count: u32,
}

/// Inbound `Retain` request (spec.md §6).
#[derive(Clone, Debug)]
pub struct RetainRequest {
    pub created_before: SystemTime,
    pub hashers: usize,
    pub filter: Vec<u8>,
}
