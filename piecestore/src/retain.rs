// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The retain (bloom-filter GC) service contract (spec.md §1 "Out of
//! scope", §4.6).

use std::{hash::Hash, marker::PhantomData, time::SystemTime};

use async_trait::async_trait;
use bloom_filter_simple::{BloomFilter as _, KMBloomFilter};
use piece_crypto::NodeId;
use siphasher::sip::SipHasher24;
use xxhash_rust::xxh3::Xxh3;

use crate::piece::PieceId;

/// A bloom filter of piece ids a coordinator wants this node to retain;
/// anything older than `created_before` and absent from the filter is
/// eligible for garbage collection by the (asynchronous) retain service.
///
/// Modeled directly on `librad::bloom::BloomFilter`: same hasher pair, same
/// load/parse split, generic only over the element type we hash.
pub struct BloomFilter<T = PieceId> {
    inner: KMBloomFilter<Xxh3, SipHasher24>,
    _marker: PhantomData<T>,
}

impl<T> std::fmt::Debug for BloomFilter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("hashers", &self.inner.number_of_hashers())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("could not parse bloom filter")]
pub struct ParseBloomFilterError;

impl<T: Hash> BloomFilter<T> {
    /// Build an empty filter sized for `capacity` elements at `fp_rate`
    /// false-positive probability. Used on the coordinator side to build a
    /// retention snapshot before sending it over the wire.
    pub fn new(capacity: usize, fp_rate: f64) -> Option<Self> {
        if capacity == 0 {
            None
        } else {
            Some(Self {
                inner: KMBloomFilter::new(capacity, fp_rate),
                _marker: PhantomData,
            })
        }
    }

    /// Parse a wire-format filter: `hashers` rows of `filter.len() / hashers`
    /// bytes each.
    pub fn parse(hashers: usize, filter: Vec<u8>) -> Result<Self, ParseBloomFilterError> {
        if hashers == 0 || filter.is_empty() {
            return Err(ParseBloomFilterError);
        }
        let bits_per_hasher = (filter.len() as f64 / hashers as f64).ceil() as usize;
        KMBloomFilter::load(hashers, bits_per_hasher, filter)
            .map(|inner| Self {
                inner,
                _marker: PhantomData,
            })
            .ok_or(ParseBloomFilterError)
    }

    pub fn insert(&mut self, value: &T) {
        self.inner.insert(value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    /// Number of hash functions this filter was built with -- the `hashers`
    /// argument a receiver must pass back into [`Self::parse`].
    pub fn hashers(&self) -> usize {
        self.inner.number_of_hashers()
    }

    /// The raw bitset, ready to be sent on the wire alongside
    /// [`Self::hashers`].
    pub fn bits(&self) -> &[u8] {
        self.inner.bitset()
    }
}

#[derive(Clone, Debug)]
pub struct RetainRequest {
    pub coordinator: NodeId,
    /// `created_before` already adjusted by `retain_time_buffer` (spec.md
    /// §4.6); the service itself does no further adjustment.
    pub created_before: SystemTime,
    pub filter: std::sync::Arc<BloomFilter<PieceId>>,
}

#[async_trait]
pub trait RetainService: Send + Sync {
    /// Enqueue a retain request. Returns `false` if the request was dropped
    /// (queue full, or a duplicate the service chose to dedupe) -- the
    /// caller still reports success to the coordinator either way (spec.md
    /// §4.6).
    async fn enqueue(&self, request: RetainRequest) -> bool;
}
