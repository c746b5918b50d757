// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The piece blob store contract (spec.md §1 "Out of scope").
//!
//! Write/read/commit/cancel, hash streaming, trash/restore, and the
//! expiration index all live on the other side of this trait boundary.
//! spec.md §9 notes two acceptable backends -- an in-memory/KV store that
//! buffers and commits once, or a filesystem tempfile renamed after fsync --
//! and requires only that commit is all-or-nothing.

use async_trait::async_trait;
use piece_crypto::NodeId;
use std::time::SystemTime;
use thiserror::Error;

use crate::piece::{PieceHash, PieceHeader, PieceId};

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("piece not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(String),

    #[error("already committed")]
    AlreadyCommitted,
}

/// An exclusively-owned, in-progress write of one piece.
///
/// Owned for the duration of a single upload session (spec.md §5
/// "Shared-resource policy"); `commit` or `cancel` is guaranteed to run
/// exactly once per session (invariant I5).
#[async_trait]
pub trait PieceWriter: Send {
    /// Bytes written so far. Chunks must arrive with `offset == size()`.
    fn size(&self) -> u64;

    /// The streaming hash of everything written so far.
    fn hash(&self) -> PieceHash;

    async fn write(&mut self, data: &[u8]) -> Result<(), StoreError>;

    /// Atomically publish the piece bytes together with its signed header.
    /// No partial state is observable by readers if the process dies
    /// mid-commit.
    async fn commit(self: Box<Self>, header: PieceHeader) -> Result<(), StoreError>;

    /// Discard everything written. A no-op if `commit` already ran; called
    /// unconditionally on every non-committing exit path.
    async fn cancel(self: Box<Self>) -> Result<(), StoreError>;
}

/// A handle to a committed piece's bytes and header.
#[async_trait]
pub trait PieceReader: Send {
    fn size(&self) -> u64;

    fn header(&self) -> &PieceHeader;

    /// Read `buf.len()` bytes starting at `offset`. Short reads only occur
    /// at end-of-piece.
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait PieceStore: Send + Sync {
    async fn writer(&self, coordinator: NodeId, piece_id: PieceId) -> Result<Box<dyn PieceWriter>, StoreError>;

    async fn reader(&self, coordinator: NodeId, piece_id: PieceId) -> Result<Box<dyn PieceReader>, StoreError>;

    async fn delete(&self, coordinator: NodeId, piece_id: PieceId) -> Result<(), StoreError>;

    async fn restore_trash(&self, coordinator: NodeId) -> Result<(), StoreError>;

    /// Bytes free on the backing volume, used for the upload admission
    /// check (spec.md §4.3 "AwaitLimit").
    async fn disk_free(&self) -> Result<u64, StoreError>;

    /// Record (or clear, if `expires_at` is `None`) the expiration-index
    /// entry for a committed piece.
    async fn set_expiration(
        &self,
        coordinator: NodeId,
        piece_id: PieceId,
        expires_at: Option<SystemTime>,
    ) -> Result<(), StoreError>;
}
