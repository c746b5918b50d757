// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

use std::convert::TryFrom;

use async_trait::async_trait;
use dyn_clone::DynClone;
use thiserror::Error;
use zeroize::Zeroize;

use crate::{PublicKey, Signature};

/// Something that can produce [`Signature`]s over arbitrary byte strings.
///
/// Mirrors `keystore::sign::Signer` in spirit: signing is async because a
/// real deployment may back this with an out-of-process agent or HSM rather
/// than an in-memory key. The storage node's own receipt key and every
/// uplink/coordinator key we verify *against* share this one contract.
#[async_trait]
pub trait Signer: DynClone + Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn public_key(&self) -> PublicKey;

    async fn sign(&self, msg: &[u8]) -> Result<Signature, Self::Error>;
}

/// A type-erased, cloneable [`Signer`] with a boxed error, used wherever the
/// concrete signer implementation is an operational detail (e.g. the
/// storage node's receipt-signing key, injected into the endpoint).
#[async_trait]
pub trait ErasedSigner: DynClone + Send + Sync {
    fn public_key(&self) -> PublicKey;

    async fn sign(&self, msg: &[u8]) -> Result<Signature, SignError>;
}

dyn_clone::clone_trait_object!(ErasedSigner);

pub type BoxedSigner = Box<dyn ErasedSigner>;

#[derive(Debug, Error)]
#[error("signing failed: {0}")]
pub struct SignError(Box<dyn std::error::Error + Send + Sync>);

#[async_trait]
impl<S> ErasedSigner for S
where
    S: Signer + Clone + 'static,
{
    fn public_key(&self) -> PublicKey {
        Signer::public_key(self)
    }

    async fn sign(&self, msg: &[u8]) -> Result<Signature, SignError> {
        Signer::sign(self, msg)
            .await
            .map_err(|e| SignError(Box::new(e)))
    }
}

/// An in-memory ed25519 signing key.
///
/// Used for the storage node's own receipt key in the common case where no
/// external agent is configured.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey(#[zeroize(skip)] ed25519_zebra::SigningKey);

impl SecretKey {
    pub fn generate() -> Self {
        Self(ed25519_zebra::SigningKey::new(rand::thread_rng()))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_zebra::SigningKey::from(bytes))
    }

    pub fn public(&self) -> PublicKey {
        PublicKey::from(ed25519_zebra::VerificationKey::from(&self.0))
    }
}

impl From<ed25519_zebra::VerificationKey> for PublicKey {
    fn from(vk: ed25519_zebra::VerificationKey) -> Self {
        PublicKey(ed25519_zebra::VerificationKeyBytes::from(vk))
    }
}

#[async_trait]
impl Signer for SecretKey {
    type Error = std::convert::Infallible;

    fn public_key(&self) -> PublicKey {
        self.public()
    }

    async fn sign(&self, msg: &[u8]) -> Result<Signature, Self::Error> {
        Ok(Signature(self.0.sign(msg).into()))
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
#[error("signature verification failed")]
pub struct VerifyError;

/// Verify `sig` over `msg` under `pk`.
///
/// Used for every coordinator-signed order limit, every uplink-signed
/// order, and every uplink-signed piece hash the endpoint encounters.
pub fn verify(pk: &PublicKey, msg: &[u8], sig: &Signature) -> Result<(), VerifyError> {
    let vk = ed25519_zebra::VerificationKey::try_from(pk.0).map_err(|_| VerifyError)?;
    vk.verify(&ed25519_zebra::Signature::from(sig.0), msg)
        .map_err(|_| VerifyError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_then_verify_roundtrips() {
        let sk = SecretKey::generate();
        let sig = sk.sign(b"hello").await.unwrap();
        verify(&sk.public(), b"hello", &sig).unwrap();
    }

    #[tokio::test]
    async fn verify_rejects_tampered_message() {
        let sk = SecretKey::generate();
        let sig = sk.sign(b"hello").await.unwrap();
        assert!(verify(&sk.public(), b"goodbye", &sig).is_err());
    }
}
