// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The order/limit verifier (spec.md §4.1).

use std::time::{Duration, SystemTime};

use piece_crypto::{NodeId, PublicKey};

use crate::{
    error::Error,
    limit::{Action, Order, OrderLimit},
    piece::{PieceHash, PieceHeader},
    trust::TrustPool,
    used_serials::UsedSerials,
};

/// Verifies order limits and orders against a trust pool, the used-serials
/// cache, and the calling node's own identity. Borrowed by every handler;
/// owns no state of its own beyond the references it holds (spec.md §3
/// "Ownership").
pub struct Verifier<'a> {
    pub trust: &'a (dyn TrustPool + Send + Sync),
    pub used_serials: &'a UsedSerials,
    pub this_node: NodeId,
    pub order_limit_grace_period: Duration,
}

impl<'a> Verifier<'a> {
    /// Validate a coordinator-signed order limit for `expected_action`.
    ///
    /// On success, the limit's serial number is recorded in the
    /// used-serials cache with expiry `limit.order_expiration` -- from this
    /// point on, a second limit with the same `(coordinator, serial)` is
    /// rejected as a replay until that expiry passes.
    pub async fn verify_order_limit(
        &self,
        expected_action: Action,
        limit: &OrderLimit,
        now: SystemTime,
    ) -> Result<(), Error> {
        if limit.piece_id.is_zero() {
            return Err(Error::invalid_argument("piece id is zero"));
        }

        if limit.storage_node_id != self.this_node {
            return Err(Error::permission_denied("order limit targets a different storage node"));
        }

        if limit.action != expected_action {
            return Err(Error::invalid_argument(format!(
                "expected action {expected_action}, got {}",
                limit.action
            )));
        }

        if !self.trust.verify_identity(limit.coordinator_id).await {
            return Err(Error::unauthenticated(format!(
                "coordinator {} is not trusted",
                limit.coordinator_id
            )));
        }

        let coordinator_key = self
            .trust
            .coordinator_key(limit.coordinator_id)
            .await
            .ok_or_else(|| Error::unauthenticated("no public key on file for coordinator"))?;

        verify_signature(&coordinator_key, &limit.signed_bytes(), &limit.coordinator_signature)?;

        if now > limit.order_expiration {
            return Err(Error::expired("order limit expired"));
        }

        if let Some(grace_deadline) = limit.order_creation.checked_add(self.order_limit_grace_period) {
            if now > grace_deadline {
                return Err(Error::expired("order limit grace period elapsed"));
            }
        }

        if let Some(piece_expiration) = limit.piece_expiration {
            if piece_expiration < now {
                return Err(Error::invalid_argument("piece expiration is in the past"));
            }
        }

        self.used_serials
            .insert(limit.coordinator_id, limit.serial_number, limit.order_expiration, now)
            .map_err(|_| Error::already_exists("serial number already used"))?;

        Ok(())
    }

    /// Validate an uplink-signed order against its limit and the largest
    /// amount already seen this session.
    pub fn verify_order(&self, limit: &OrderLimit, order: &Order, prev_amount: u64) -> Result<(), Error> {
        if order.serial_number != limit.serial_number {
            return Err(Error::invalid_argument("order serial does not match limit serial"));
        }

        if order.amount < prev_amount {
            return Err(Error::invalid_argument("order amount decreased"));
        }

        if order.amount > limit.limit {
            return Err(Error::invalid_argument("order amount exceeds limit"));
        }

        verify_signature(&limit.uplink_public_key, &order.signed_bytes(), &order.uplink_signature)
            .map_err(|_| Error::invalid_argument("invalid order signature"))?;

        Ok(())
    }

    /// Validate that the uplink-signed hash in a `done` message matches the
    /// streaming hash computed while writing the piece, covers the declared
    /// size, and is actually signed by the uplink named in `limit`.
    pub fn verify_piece_hash(
        &self,
        limit: &OrderLimit,
        declared_size: u64,
        written_size: u64,
        signed_hash: &PieceHash,
        computed_hash: &PieceHash,
        uplink_signature: &piece_crypto::Signature,
    ) -> Result<(), Error> {
        if declared_size != written_size {
            return Err(Error::invalid_argument(format!(
                "declared piece size {declared_size} does not match written size {written_size}"
            )));
        }

        if signed_hash.0 != computed_hash.0 {
            return Err(Error::invalid_argument("piece hash does not match streamed content"));
        }

        verify_signature(&limit.uplink_public_key, &piece_hash_signed_bytes(signed_hash, declared_size), uplink_signature)
            .map_err(|_| Error::invalid_argument("invalid uplink signature over piece hash"))?;

        Ok(())
    }
}

fn verify_signature(key: &PublicKey, msg: &[u8], sig: &piece_crypto::Signature) -> Result<(), Error> {
    piece_crypto::verify(key, msg, sig).map_err(|_| Error::unauthenticated("invalid signature"))
}

/// The bytes the uplink signs over when it signs a piece's hash in a `done`
/// message: the hash itself plus the declared size, so a signature can't be
/// replayed across two pieces that happen to hash the same prefix.
pub(crate) fn piece_hash_signed_bytes(hash: &PieceHash, declared_size: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 8);
    buf.extend_from_slice(&hash.0);
    buf.extend_from_slice(&declared_size.to_be_bytes());
    buf
}

/// Required on every `done` message before [`Verifier::verify_piece_hash`];
/// kept separate so handlers can reject malformed headers before touching
/// the store.
pub fn validate_header(header: &PieceHeader, now: SystemTime) -> Result<(), Error> {
    if header.creation_time > now + Duration::from_secs(60) {
        return Err(Error::invalid_argument("piece header creation time is in the future"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{signed_limit, FakeTrustPool};
    use piece_crypto::SecretKey;
    use std::time::Duration;

    #[tokio::test]
    async fn accepts_a_well_formed_limit() {
        let node_key = SecretKey::generate();
        let coordinator_key = SecretKey::generate();
        let this_node = NodeId::from(node_key.public());
        let trust = FakeTrustPool::trusting(coordinator_key.public());
        let used_serials = UsedSerials::new(1 << 20);

        let now = SystemTime::now();
        let limit = signed_limit(&coordinator_key, this_node, Action::Put, now).await;

        let verifier = Verifier {
            trust: &trust,
            used_serials: &used_serials,
            this_node,
            order_limit_grace_period: Duration::from_secs(60),
        };

        verifier.verify_order_limit(Action::Put, &limit, now).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_replayed_serial() {
        let node_key = SecretKey::generate();
        let coordinator_key = SecretKey::generate();
        let this_node = NodeId::from(node_key.public());
        let trust = FakeTrustPool::trusting(coordinator_key.public());
        let used_serials = UsedSerials::new(1 << 20);

        let now = SystemTime::now();
        let limit = signed_limit(&coordinator_key, this_node, Action::Put, now).await;

        let verifier = Verifier {
            trust: &trust,
            used_serials: &used_serials,
            this_node,
            order_limit_grace_period: Duration::from_secs(60),
        };

        verifier.verify_order_limit(Action::Put, &limit, now).await.unwrap();
        let err = verifier.verify_order_limit(Action::Put, &limit, now).await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
    }

    #[tokio::test]
    async fn rejects_wrong_action() {
        let node_key = SecretKey::generate();
        let coordinator_key = SecretKey::generate();
        let this_node = NodeId::from(node_key.public());
        let trust = FakeTrustPool::trusting(coordinator_key.public());
        let used_serials = UsedSerials::new(1 << 20);

        let now = SystemTime::now();
        let limit = signed_limit(&coordinator_key, this_node, Action::Put, now).await;

        let verifier = Verifier {
            trust: &trust,
            used_serials: &used_serials,
            this_node,
            order_limit_grace_period: Duration::from_secs(60),
        };

        let err = verifier.verify_order_limit(Action::Get, &limit, now).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn rejects_untrusted_coordinator() {
        let node_key = SecretKey::generate();
        let coordinator_key = SecretKey::generate();
        let this_node = NodeId::from(node_key.public());
        let trust = FakeTrustPool::empty();
        let used_serials = UsedSerials::new(1 << 20);

        let now = SystemTime::now();
        let limit = signed_limit(&coordinator_key, this_node, Action::Put, now).await;

        let verifier = Verifier {
            trust: &trust,
            used_serials: &used_serials,
            this_node,
            order_limit_grace_period: Duration::from_secs(60),
        };

        let err = verifier.verify_order_limit(Action::Put, &limit, now).await.unwrap_err();
        assert_eq!(err.kind(), "unauthenticated");
    }
}
