// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

use std::{convert::TryFrom, fmt, str::FromStr};

use multibase::Base;
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};

use crate::{InvalidPublicKey, PublicKey};

/// A coordinator or storage-node identity.
///
/// `NodeId` is used interchangeably for satellites (coordinators) and for
/// this storage node's own identity -- both are just ed25519 public keys on
/// the wire.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct NodeId(PublicKey);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        self.0
    }
}

impl From<PublicKey> for NodeId {
    fn from(pk: PublicKey) -> Self {
        Self(pk)
    }
}

impl From<NodeId> for PublicKey {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = InvalidPublicKey;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        PublicKey::try_from(bytes).map(Self)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", multibase::encode(Base::Base58Btc, self.as_bytes()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseNodeIdError {
    #[error("invalid multibase encoding")]
    Multibase(#[from] multibase::Error),

    #[error(transparent)]
    InvalidPublicKey(#[from] InvalidPublicKey),
}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, bytes) = multibase::decode(s)?;
        Ok(NodeId::try_from(bytes.as_slice())?)
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NodeIdVisitor;

        impl<'de> Visitor<'de> for NodeIdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a multibase-encoded node id")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(NodeIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_display_and_fromstr() {
        let id = NodeId::from(PublicKey::from([7u8; 32]));
        let s = id.to_string();
        let parsed: NodeId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }
}
