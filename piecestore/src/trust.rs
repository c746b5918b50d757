// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The trust subsystem contract (spec.md §1 "Out of scope").
//!
//! The endpoint borrows a `TrustPool` to decide which coordinators it will
//! accept directives from and to fetch the public key a coordinator's
//! signature is checked against. Identity extraction from the RPC
//! transport (TLS peer certs, etc.) is the caller's job, not this trait's.

use async_trait::async_trait;
use piece_crypto::{NodeId, PublicKey};

#[async_trait]
pub trait TrustPool: Send + Sync {
    /// Whether `coordinator` is a member of the trust set.
    async fn verify_identity(&self, coordinator: NodeId) -> bool;

    /// The coordinator's current signing key, if known.
    async fn coordinator_key(&self, coordinator: NodeId) -> Option<PublicKey>;
}
