// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! In-memory collaborator mocks, shared by this crate's and
//! `piecestore-node`'s unit tests.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use piece_crypto::{NodeId, PublicKey, SecretKey, Signer};

use crate::{
    limit::{Action, Order, OrderLimit, SerialNumber},
    monitor::{Monitor, MonitorError},
    orders::{BandwidthLedger, LedgerError, OrderRecord, OrdersError, OrdersQueue},
    piece::{PieceHash, PieceHeader, PieceId},
    retain::{RetainRequest, RetainService},
    store::{PieceReader, PieceStore, PieceWriter, StoreError},
};

/// Build a well-formed, correctly signed order limit for tests.
pub async fn signed_limit(
    coordinator_key: &SecretKey,
    this_node: NodeId,
    action: Action,
    now: SystemTime,
) -> OrderLimit {
    let mut limit = OrderLimit {
        coordinator_id: NodeId::from(coordinator_key.public()),
        uplink_public_key: PublicKey::from([9u8; 32]),
        storage_node_id: this_node,
        piece_id: PieceId::from([1u8; 32]),
        action,
        limit: 1 << 20,
        serial_number: SerialNumber::from([1u8; 16]),
        order_creation: now,
        piece_expiration: None,
        order_expiration: now + Duration::from_secs(3600),
        coordinator_signature: piece_crypto::Signature([0u8; 64]),
    };
    let sig = coordinator_key.sign(&limit.signed_bytes()).await.unwrap();
    limit.coordinator_signature = sig;
    limit
}

/// Fully parameterized order-limit builder: unlike [`signed_limit`], the
/// uplink key is caller-supplied (and real), so the returned limit can be
/// paired with [`signed_order`] for session flows that also exercise order
/// verification, not just the limit.
#[allow(clippy::too_many_arguments)]
pub async fn signed_limit_for(
    coordinator_key: &SecretKey,
    uplink_key: &SecretKey,
    this_node: NodeId,
    piece_id: PieceId,
    action: Action,
    byte_limit: u64,
    serial: SerialNumber,
    now: SystemTime,
    order_expiration: SystemTime,
) -> OrderLimit {
    let mut limit = OrderLimit {
        coordinator_id: NodeId::from(coordinator_key.public()),
        uplink_public_key: uplink_key.public(),
        storage_node_id: this_node,
        piece_id,
        action,
        limit: byte_limit,
        serial_number: serial,
        order_creation: now,
        piece_expiration: None,
        order_expiration,
        coordinator_signature: piece_crypto::Signature([0u8; 64]),
    };
    let sig = coordinator_key.sign(&limit.signed_bytes()).await.unwrap();
    limit.coordinator_signature = sig;
    limit
}

/// Build an uplink-signed order for `serial`/`amount`.
pub async fn signed_order(uplink_key: &SecretKey, serial: SerialNumber, amount: u64, now: SystemTime) -> Order {
    let mut order = Order {
        serial_number: serial,
        amount,
        order_creation: now,
        uplink_signature: piece_crypto::Signature([0u8; 64]),
    };
    let sig = uplink_key.sign(&order.signed_bytes()).await.unwrap();
    order.uplink_signature = sig;
    order
}

/// Sign `hash`/`declared_size` the way an uplink signs a `done` message's
/// piece hash, so upload tests can exercise [`crate::verifier::Verifier::verify_piece_hash`]'s
/// signature check.
pub async fn signed_piece_hash(uplink_key: &SecretKey, hash: &PieceHash, declared_size: u64) -> piece_crypto::Signature {
    uplink_key
        .sign(&crate::verifier::piece_hash_signed_bytes(hash, declared_size))
        .await
        .unwrap()
}

/// A [`crate::trust::TrustPool`] that trusts a fixed set of coordinators.
pub struct FakeTrustPool {
    keys: Mutex<HashMap<NodeId, PublicKey>>,
}

impl FakeTrustPool {
    pub fn empty() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn trusting(key: PublicKey) -> Self {
        let pool = Self::empty();
        pool.keys.lock().unwrap().insert(NodeId::from(key), key);
        pool
    }
}

#[async_trait]
impl crate::trust::TrustPool for FakeTrustPool {
    async fn verify_identity(&self, coordinator: NodeId) -> bool {
        self.keys.lock().unwrap().contains_key(&coordinator)
    }

    async fn coordinator_key(&self, coordinator: NodeId) -> Option<PublicKey> {
        self.keys.lock().unwrap().get(&coordinator).copied()
    }
}

#[derive(Default)]
pub struct MockOrdersQueue {
    pub records: Mutex<Vec<OrderRecord>>,
}

#[async_trait]
impl OrdersQueue for MockOrdersQueue {
    async fn enqueue(&self, record: OrderRecord) -> Result<(), OrdersError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Records every bandwidth add, keyed loosely for assertions in tests.
#[derive(Default)]
pub struct MockBandwidthLedger {
    pub entries: Mutex<Vec<(NodeId, Action, i64)>>,
}

#[async_trait]
impl BandwidthLedger for MockBandwidthLedger {
    async fn add(&self, coordinator: NodeId, action: Action, amount: i64) -> Result<(), LedgerError> {
        self.entries.lock().unwrap().push((coordinator, action, amount));
        Ok(())
    }
}

pub struct MockMonitor {
    pub available: Mutex<u64>,
    pub notified: Mutex<usize>,
}

impl MockMonitor {
    pub fn with_available(bytes: u64) -> Self {
        Self {
            available: Mutex::new(bytes),
            notified: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Monitor for MockMonitor {
    async fn available_space(&self) -> Result<u64, MonitorError> {
        Ok(*self.available.lock().unwrap())
    }

    fn notify_low_disk(&self) {
        *self.notified.lock().unwrap() += 1;
    }
}

#[derive(Default)]
pub struct MockRetainService {
    pub requests: Mutex<Vec<RetainRequest>>,
    pub accept: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl RetainService for MockRetainService {
    async fn enqueue(&self, request: RetainRequest) -> bool {
        let accept = self.accept.load(std::sync::atomic::Ordering::Relaxed) || self.requests.lock().unwrap().is_empty();
        self.requests.lock().unwrap().push(request);
        accept
    }
}

/// An in-memory piece store: pieces live in a `Mutex<HashMap>`, writes
/// buffer in a `Vec<u8>` and are published on `commit` -- the "buffer in
/// memory, commit once" backend spec.md §9 calls out as acceptable.
#[derive(Default)]
pub struct MockPieceStore {
    pieces: std::sync::Arc<Mutex<HashMap<(NodeId, PieceId), StoredPiece>>>,
    pub disk_free: Mutex<u64>,
}

struct StoredPiece {
    data: Vec<u8>,
    header: PieceHeader,
    expiration: Option<SystemTime>,
}

impl MockPieceStore {
    pub fn with_disk_free(bytes: u64) -> Self {
        Self {
            pieces: std::sync::Arc::new(Mutex::new(HashMap::new())),
            disk_free: Mutex::new(bytes),
        }
    }
}

#[async_trait]
impl PieceStore for MockPieceStore {
    async fn writer(&self, coordinator: NodeId, piece_id: PieceId) -> Result<Box<dyn PieceWriter>, StoreError> {
        Ok(Box::new(MockWriter {
            coordinator,
            piece_id,
            data: Vec::new(),
            committed: false,
            pieces: std::sync::Arc::clone(&self.pieces),
        }))
    }

    async fn reader(&self, coordinator: NodeId, piece_id: PieceId) -> Result<Box<dyn PieceReader>, StoreError> {
        let pieces = self.pieces.lock().unwrap();
        let piece = pieces.get(&(coordinator, piece_id)).ok_or(StoreError::NotFound)?;
        Ok(Box::new(MockReader {
            data: piece.data.clone(),
            header: piece.header.clone(),
        }))
    }

    async fn delete(&self, coordinator: NodeId, piece_id: PieceId) -> Result<(), StoreError> {
        self.pieces.lock().unwrap().remove(&(coordinator, piece_id));
        Ok(())
    }

    async fn restore_trash(&self, _coordinator: NodeId) -> Result<(), StoreError> {
        Ok(())
    }

    async fn disk_free(&self) -> Result<u64, StoreError> {
        Ok(*self.disk_free.lock().unwrap())
    }

    async fn set_expiration(
        &self,
        coordinator: NodeId,
        piece_id: PieceId,
        expires_at: Option<SystemTime>,
    ) -> Result<(), StoreError> {
        if let Some(piece) = self.pieces.lock().unwrap().get_mut(&(coordinator, piece_id)) {
            piece.expiration = expires_at;
        }
        Ok(())
    }
}

impl MockPieceStore {
    /// Test-only back door: commit a piece directly, bypassing the writer,
    /// so download tests don't need an upload round-trip to set up fixtures.
    pub fn seed(&self, coordinator: NodeId, piece_id: PieceId, data: Vec<u8>, header: PieceHeader) {
        self.pieces.lock().unwrap().insert(
            (coordinator, piece_id),
            StoredPiece {
                data,
                header,
                expiration: None,
            },
        );
    }
}

struct MockWriter {
    coordinator: NodeId,
    piece_id: PieceId,
    data: Vec<u8>,
    committed: bool,
    pieces: std::sync::Arc<Mutex<HashMap<(NodeId, PieceId), StoredPiece>>>,
}

#[async_trait]
impl PieceWriter for MockWriter {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn hash(&self) -> PieceHash {
        hash_bytes(&self.data)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    async fn commit(mut self: Box<Self>, header: PieceHeader) -> Result<(), StoreError> {
        self.committed = true;
        self.pieces.lock().unwrap().insert(
            (self.coordinator, self.piece_id),
            StoredPiece {
                data: std::mem::take(&mut self.data),
                header,
                expiration: None,
            },
        );
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MockReader {
    data: Vec<u8>,
    header: PieceHeader,
}

#[async_trait]
impl PieceReader for MockReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn header(&self) -> &PieceHeader {
        &self.header
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, StoreError> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }
}

pub fn hash_bytes(data: &[u8]) -> PieceHash {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    let h = hasher.finish();
    let mut out = [0u8; 32];
    out[..8].copy_from_slice(&h.to_be_bytes());
    PieceHash(out)
}
