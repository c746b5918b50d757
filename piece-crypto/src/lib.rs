// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! Ed25519 identities and signatures shared between the piece store endpoint
//! and its collaborators.
//!
//! Every order-limit is signed by a coordinator, every order is signed by an
//! uplink, and every receipt is signed by the storage node itself -- all
//! three use the same primitives defined here.

mod peer;
mod signer;

pub use peer::{NodeId, ParseNodeIdError};
pub use signer::{verify, BoxedSigner, ErasedSigner, SecretKey, SignError, Signer, VerifyError};

use std::convert::TryFrom;

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct PublicKey(ed25519_zebra::VerificationKeyBytes);

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", multibase::encode(multibase::Base::Base32Z, self.as_bytes()))
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = InvalidPublicKey;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| InvalidPublicKey)?;
        Ok(Self(ed25519_zebra::VerificationKeyBytes::from(arr)))
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(ed25519_zebra::VerificationKeyBytes::from(bytes))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid public key")]
pub struct InvalidPublicKey;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(..)")
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = InvalidSignature;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| InvalidSignature)?;
        Ok(Self(arr))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid signature encoding")]
pub struct InvalidSignature;
