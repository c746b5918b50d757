// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The status taxonomy returned to RPC callers (spec.md §7).
//!
//! Collaborator traits (`PieceStore`, `TrustPool`, ...) have their own small
//! leaf error types; handlers map those into one of the variants here at the
//! point where a status has to cross the RPC boundary.

use thiserror::Error;

/// A classified failure, one variant per row of the status taxonomy.
///
/// Deliberately flat (a message string per variant, not a source chain) --
/// the endpoint's job is to classify, not to preserve arbitrary nested
/// causes; storage-layer detail is logged at the call site, not carried in
/// the returned error.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("expired: {0}")]
    Expired(String),
}

impl Error {
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn expired(msg: impl Into<String>) -> Self {
        Self::Expired(msg.into())
    }

    /// Short, stable tag for metrics labels and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::PermissionDenied(_) => "permission_denied",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Aborted(_) => "aborted",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
            Self::AlreadyExists(_) => "already_exists",
            Self::Expired(_) => "expired",
        }
    }
}
