// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

use std::{convert::TryFrom, fmt, time::SystemTime};

use piece_crypto::Signature;

use crate::limit::OrderLimit;

/// A piece is addressed by the pair (coordinator, piece id); the id itself
/// is opaque to the endpoint -- just a 32-byte content identifier chosen by
/// the uplink.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct PieceId([u8; 32]);

impl PieceId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// A piece id of all zero bytes is never valid (spec.md §4.1).
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<[u8; 32]> for PieceId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for PieceId {
    type Error = InvalidPieceId;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| InvalidPieceId)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceId({})", multibase::encode(multibase::Base::Base32Z, self.0))
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", multibase::encode(multibase::Base::Base32Z, self.0))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid piece id")]
pub struct InvalidPieceId;

/// The streaming content hash of a piece.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PieceHash(pub [u8; 32]);

impl fmt::Debug for PieceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceHash({})", multibase::encode(multibase::Base::Base32Z, self.0))
    }
}

/// The signed header committed alongside a piece's bytes.
///
/// Produced once, at the end of a successful upload (spec.md §4.3
/// "Commit"), and handed back unchanged by the store on every subsequent
/// read so a `GET_REPAIR` download can forward it for peer-side validation.
#[derive(Clone, Debug)]
pub struct PieceHeader {
    pub hash: PieceHash,
    pub creation_time: SystemTime,
    /// The uplink's signature over the hash, carried from the `done`
    /// message so a repair peer can validate provenance without re-deriving
    /// it from the order limit.
    pub uplink_signature: Signature,
    pub order_limit: OrderLimit,
}
