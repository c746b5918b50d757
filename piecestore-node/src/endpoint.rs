// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The piece store endpoint: wires the verifier, collaborators, and
//! per-RPC state machines from spec.md §4 together into one request
//! surface.

use std::{sync::Arc, time::{Duration, Instant, SystemTime}};

use piece_crypto::{BoxedSigner, NodeId, Signature};
use piecestore::{
    error::Error,
    limit::{Action, Order, OrderLimit},
    monitor::Monitor,
    orders::{BandwidthLedger, OrderRecord, OrdersQueue},
    piece::{PieceHash, PieceHeader, PieceId},
    retain::{BloomFilter, RetainService},
    store::{PieceStore, StoreError},
    throttle::{Throttle, ThrottleError},
    trust::TrustPool,
    used_serials::UsedSerials,
    verifier::{validate_header, Verifier},
};

use crate::{
    config::Config,
    deleter::{DeleteQueueItem, PieceDeleter},
    limiter::RequestLimiter,
    metrics::{Metrics, Operation, Outcome},
    ping::PingStats,
    transport::{
        DeletePiecesRequest, DeletePiecesResponse, DownloadRequest, DownloadResponse, DownloadSink,
        DownloadSource, RetainRequest, TransportError, UploadRequest, UploadResponse, UploadStream,
    },
};

/// One chunk's worth of bytes sent per throttle grant (spec.md §4.4).
const DOWNLOAD_CHUNK_SIZE: u64 = 1024 * 1024;

/// The endpoint. Every collaborator is a borrowed, shared reference (spec.md
/// §3 "Ownership": the endpoint owns only the live-request counter and the
/// used-serials cache); `Arc` gives the cheap clones the download handler's
/// two concurrent halves need without fighting the borrow checker over a
/// `&self` that outlives a `tokio::join!`.
#[derive(Clone)]
pub struct Endpoint {
    pub this_node: NodeId,
    pub config: Config,
    pub store: Arc<dyn PieceStore>,
    pub trust: Arc<dyn TrustPool>,
    pub orders: Arc<dyn OrdersQueue>,
    pub ledger: Arc<dyn BandwidthLedger>,
    pub monitor: Arc<dyn Monitor>,
    pub retain: Arc<dyn RetainService>,
    pub deleter: Arc<PieceDeleter>,
    pub signer: BoxedSigner,
    pub used_serials: Arc<UsedSerials>,
    pub limiter: Arc<RequestLimiter>,
    pub ping: Arc<dyn PingStats>,
    pub metrics: Arc<dyn Metrics>,
}

impl Endpoint {
    fn verifier(&self) -> Verifier<'_> {
        Verifier {
            trust: self.trust.as_ref(),
            used_serials: self.used_serials.as_ref(),
            this_node: self.this_node,
            order_limit_grace_period: self.config.order_limit_grace_period,
        }
    }

    async fn sign_receipt(&self, piece_id: PieceId, hash: &PieceHash, size: u64, now: SystemTime) -> Result<Signature, Error> {
        let mut buf = Vec::with_capacity(32 + 32 + 8 + 8);
        buf.extend_from_slice(piece_id.as_bytes());
        buf.extend_from_slice(&hash.0);
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&time_secs(now).to_be_bytes());
        self.signer
            .sign(&buf)
            .await
            .map_err(|e| Error::internal(format!("failed to sign receipt: {e}")))
    }
}

fn time_secs(t: SystemTime) -> i64 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Internal classification of a stream operation's outcome: either it
/// produced a message, the peer is gone (EOF or cancel -- spec.md §5), or
/// it genuinely failed.
enum StreamSignal<T> {
    Msg(T),
    Gone,
    Failed(Error),
}

async fn recv_upload(stream: &mut dyn UploadStream, timeout: Duration) -> StreamSignal<UploadRequest> {
    match piece_async::timeout(timeout, stream.recv()).await {
        Ok(Ok(msg)) => StreamSignal::Msg(msg),
        Ok(Err(e)) if e.is_peer_gone() => StreamSignal::Gone,
        Ok(Err(e)) => StreamSignal::Failed(Error::internal(e.to_string())),
        Err(_elapsed) => StreamSignal::Failed(Error::internal("stream operation timed out")),
    }
}

async fn send_upload(stream: &mut dyn UploadStream, timeout: Duration, resp: UploadResponse) -> Result<(), Error> {
    match piece_async::timeout(timeout, stream.send(resp)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::internal(e.to_string())),
        Err(_elapsed) => Err(Error::internal("stream operation timed out")),
    }
}

/// Mutable state threaded through an upload session, inspected after the
/// main loop returns so the deferred cleanup (writer cancel, order persist)
/// always runs regardless of how the loop ended (spec.md §4.3 "Exit
/// invariants", invariants I1 and I5).
#[derive(Default)]
struct UploadState {
    limit: Option<OrderLimit>,
    writer: Option<Box<dyn piecestore::store::PieceWriter>>,
    largest_order: Option<Order>,
    order_saved: bool,
    low_disk: bool,
    written: u64,
}

enum UploadOutcome {
    Done(UploadResponse),
    Gone,
}

impl Endpoint {
    /// Handle one Upload RPC (spec.md §4.3).
    #[tracing::instrument(skip(self, stream))]
    pub async fn upload(&self, stream: &mut dyn UploadStream) -> Result<Option<UploadResponse>, Error> {
        self.ping.was_pinged(SystemTime::now());
        let started = Instant::now();

        let guard = match self.limiter.enter_upload(self.config.max_concurrent_requests) {
            Ok(guard) => guard,
            Err(e) => {
                self.metrics.observe_request(Operation::Upload, Outcome::Failure, started.elapsed(), 0);
                return Err(e);
            },
        };

        let mut state = UploadState::default();
        let result = self.upload_loop(stream, &mut state).await;
        drop(guard);

        if let Some(writer) = state.writer.take() {
            if let Err(e) = writer.cancel().await {
                tracing::error!(error = %e, "failed to cancel piece writer on upload exit");
            }
        }

        if !state.order_saved {
            if let (Some(limit), Some(order)) = (&state.limit, &state.largest_order) {
                self.persist_order(limit, order).await;
            }
        }

        if state.low_disk {
            self.monitor.notify_low_disk();
        }

        let elapsed = started.elapsed();
        let bytes = state.written;
        match &result {
            Ok(UploadOutcome::Done(_)) => {
                self.metrics.observe_request(Operation::Upload, Outcome::Success, elapsed, bytes)
            },
            Ok(UploadOutcome::Gone) => {
                self.metrics.observe_request(Operation::Upload, Outcome::Cancelled, elapsed, bytes)
            },
            Err(_) => self.metrics.observe_request(Operation::Upload, Outcome::Failure, elapsed, bytes),
        }

        match result {
            Ok(UploadOutcome::Done(resp)) => Ok(Some(resp)),
            Ok(UploadOutcome::Gone) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn persist_order(&self, limit: &OrderLimit, order: &Order) {
        let record = OrderRecord {
            coordinator: limit.coordinator_id,
            piece_id: limit.piece_id,
            action: limit.action,
            serial_number: order.serial_number,
            amount: order.amount,
        };
        if let Err(e) = self.orders.enqueue(record).await {
            tracing::error!(coordinator = %limit.coordinator_id, piece_id = %limit.piece_id, error = %e, "failed to persist order");
        }
        if let Err(e) = self.ledger.add(limit.coordinator_id, limit.action, order.amount as i64).await {
            tracing::error!(coordinator = %limit.coordinator_id, error = %e, "failed to record bandwidth usage");
        }
    }

    async fn upload_loop(&self, stream: &mut dyn UploadStream, state: &mut UploadState) -> Result<UploadOutcome, Error> {
        let op_timeout = self.config.stream_operation_timeout;

        let limit = match recv_upload(stream, op_timeout).await {
            StreamSignal::Msg(UploadRequest::Limit(limit)) => limit,
            StreamSignal::Msg(_) => {
                return Err(Error::invalid_argument("first upload message must carry an order limit"))
            },
            StreamSignal::Gone => return Ok(UploadOutcome::Gone),
            StreamSignal::Failed(e) => return Err(e),
        };

        if !limit.action.is_upload() {
            return Err(Error::invalid_argument(format!(
                "action {} is not an upload action",
                limit.action
            )));
        }

        let now = SystemTime::now();
        self.verifier().verify_order_limit(limit.action, &limit, now).await?;
        state.limit = Some(limit.clone());

        let available = self
            .monitor
            .available_space()
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        let disk_free = self.store.disk_free().await.map_err(|e| Error::internal(e.to_string()))?;
        if disk_free < limit.limit {
            return Err(Error::aborted(format!(
                "not enough available disk space: need {}, have {disk_free}",
                limit.limit
            )));
        }
        if available < self.config.report_capacity_threshold {
            state.low_disk = true;
        }

        let mut writer = self
            .store
            .writer(limit.coordinator_id, limit.piece_id)
            .await
            .map_err(|e| Error::internal(e.to_string()))?;
        let mut available_space = disk_free as i64;

        loop {
            let msg = match recv_upload(stream, op_timeout).await {
                StreamSignal::Msg(msg) => msg,
                StreamSignal::Gone => {
                    state.writer = Some(writer);
                    return Ok(UploadOutcome::Gone);
                },
                StreamSignal::Failed(e) => {
                    state.writer = Some(writer);
                    return Err(e);
                },
            };

            match msg {
                UploadRequest::Limit(_) => {
                    state.writer = Some(writer);
                    return Err(Error::invalid_argument("unexpected order limit after session start"));
                },
                UploadRequest::Order(order) => {
                    let prev = state.largest_order.as_ref().map(|o| o.amount).unwrap_or(0);
                    if let Err(e) = self.verifier().verify_order(&limit, &order, prev) {
                        state.writer = Some(writer);
                        return Err(e);
                    }
                    state.largest_order = Some(order);
                },
                UploadRequest::Chunk { offset, data } => {
                    if offset != writer.size() {
                        state.writer = Some(writer);
                        return Err(Error::invalid_argument("chunk out of order"));
                    }
                    let largest = state.largest_order.as_ref().map(|o| o.amount).unwrap_or(0);
                    if largest < writer.size() + data.len() as u64 {
                        state.writer = Some(writer);
                        return Err(Error::invalid_argument("not enough allocated"));
                    }
                    available_space -= data.len() as i64;
                    if available_space < 0 {
                        state.writer = Some(writer);
                        return Err(Error::internal("out of space"));
                    }
                    if let Err(e) = writer.write(&data).await {
                        state.writer = Some(writer);
                        return Err(Error::internal(e.to_string()));
                    }
                    state.written += data.len() as u64;
                },
                UploadRequest::Done { hash, piece_size, uplink_signature, timestamp } => {
                    let computed_hash = writer.hash();
                    let written_size = writer.size();

                    let header = PieceHeader {
                        hash: computed_hash,
                        creation_time: timestamp,
                        uplink_signature,
                        order_limit: limit.clone(),
                    };

                    if let Err(e) = validate_header(&header, SystemTime::now()) {
                        state.writer = Some(writer);
                        return Err(e);
                    }

                    if let Err(e) = self.verifier().verify_piece_hash(
                        &limit,
                        piece_size,
                        written_size,
                        &hash,
                        &computed_hash,
                        &uplink_signature,
                    ) {
                        state.writer = Some(writer);
                        return Err(e);
                    }

                    if let Err(e) = writer.commit(header).await {
                        return Err(Error::internal(e.to_string()));
                    }

                    if let Some(piece_expiration) = limit.piece_expiration {
                        let expires_at = piece_expiration + self.config.expiration_grace_period;
                        if let Err(e) = self
                            .store
                            .set_expiration(limit.coordinator_id, limit.piece_id, Some(expires_at))
                            .await
                        {
                            tracing::error!(piece_id = %limit.piece_id, error = %e, "failed to set expiration index entry");
                        }
                    }

                    let receipt_time = SystemTime::now();
                    let signature = self.sign_receipt(limit.piece_id, &computed_hash, written_size, receipt_time).await?;

                    if let Some(order) = state.largest_order.clone() {
                        self.persist_order(&limit, &order).await;
                    }
                    state.order_saved = true;

                    let response = UploadResponse {
                        piece_id: limit.piece_id,
                        hash: computed_hash,
                        piece_size: written_size,
                        timestamp: receipt_time,
                        storage_node_signature: signature,
                    };
                    send_upload(stream, op_timeout, response.clone()).await?;

                    return Ok(UploadOutcome::Done(response));
                },
            }
        }
    }

    /// Handle one Download RPC (spec.md §4.4). `sink`/`source` are the two
    /// halves of the underlying bidi stream; they run as two concurrently
    /// polled futures joined before this call returns.
    #[tracing::instrument(skip(self, sink, source))]
    pub async fn download(
        &self,
        request: DownloadRequest,
        sink: &mut dyn DownloadSink,
        source: &mut dyn DownloadSource,
    ) -> Result<Option<()>, Error> {
        self.ping.was_pinged(SystemTime::now());
        let _guard = self.limiter.enter();
        let started = Instant::now();

        let result = self.download_inner(request, sink, source).await;

        let elapsed = started.elapsed();
        match &result {
            Ok((Some(()), bytes)) => self.metrics.observe_request(Operation::Download, Outcome::Success, elapsed, *bytes),
            Ok((None, bytes)) => self.metrics.observe_request(Operation::Download, Outcome::Cancelled, elapsed, *bytes),
            Err(_) => self.metrics.observe_request(Operation::Download, Outcome::Failure, elapsed, 0),
        }

        result.map(|(outcome, _)| outcome)
    }

    async fn download_inner(
        &self,
        request: DownloadRequest,
        sink: &mut dyn DownloadSink,
        source: &mut dyn DownloadSource,
    ) -> Result<(Option<()>, u64), Error> {
        let DownloadRequest { limit, offset, size } = request;

        if !limit.action.is_download() {
            return Err(Error::invalid_argument(format!(
                "action {} is not a download action",
                limit.action
            )));
        }

        let now = SystemTime::now();
        self.verifier().verify_order_limit(limit.action, &limit, now).await?;

        if size > limit.limit {
            return Err(Error::invalid_argument(format!(
                "requested size {size} exceeds order limit {}",
                limit.limit
            )));
        }

        let mut reader = match self.store.reader(limit.coordinator_id, limit.piece_id).await {
            Ok(r) => r,
            Err(StoreError::NotFound) => return Err(Error::not_found("piece not found")),
            Err(e) => return Err(Error::internal(e.to_string())),
        };

        let piece_size = reader.size();
        if offset.checked_add(size).map_or(true, |end| end > piece_size) {
            return Err(Error::invalid_argument(format!(
                "requested range {offset}+{size} exceeds piece size {piece_size}"
            )));
        }

        let op_timeout = self.config.stream_operation_timeout;

        if matches!(limit.action, Action::GetRepair) {
            let header = reader.header().clone();
            let sent = piece_async::timeout(
                op_timeout,
                sink.send(DownloadResponse::Header { hash: header.hash, limit: header.order_limit }),
            )
            .await;
            match sent {
                Ok(Ok(())) => {},
                Ok(Err(e)) if e.is_peer_gone() => return Ok((None, 0)),
                Ok(Err(e)) => return Err(Error::internal(e.to_string())),
                Err(_elapsed) => return Err(Error::internal("stream operation timed out")),
            }
        }

        let throttle = Throttle::new();
        let verifier = self.verifier();

        self.run_download_halves(&limit, &verifier, &throttle, op_timeout, offset, size, reader.as_mut(), sink, source)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_download_halves(
        &self,
        limit: &OrderLimit,
        verifier: &Verifier<'_>,
        throttle: &Throttle,
        op_timeout: Duration,
        offset: u64,
        size: u64,
        reader: &mut dyn piecestore::store::PieceReader,
        sink: &mut dyn DownloadSink,
        source: &mut dyn DownloadSource,
    ) -> Result<(Option<()>, u64), Error> {
        let mut largest_order: Option<Order> = None;

        let producer_fut = async {
            loop {
                match piece_async::timeout(op_timeout, source.recv()).await {
                    Ok(Ok(order)) => {
                        let prev = largest_order.as_ref().map(|o| o.amount).unwrap_or(0);
                        if let Err(e) = verifier.verify_order(limit, &order, prev) {
                            throttle.fail(ThrottleError(e.to_string()));
                            return Err(e);
                        }
                        let delta = order.amount.saturating_sub(prev);
                        throttle.produce(delta);
                        largest_order = Some(order);
                    },
                    Ok(Err(e)) if e.is_peer_gone() => {
                        throttle.fail(ThrottleError("peer gone".into()));
                        return Ok(());
                    },
                    Ok(Err(e)) => {
                        throttle.fail(ThrottleError(e.to_string()));
                        return Err(Error::internal(e.to_string()));
                    },
                    Err(_elapsed) => {
                        throttle.fail(ThrottleError("stream operation timed out".into()));
                        return Err(Error::internal("stream operation timed out"));
                    },
                }
            }
        };

        let mut sent: u64 = 0;
        let consumer_fut = async {
            while sent < size {
                let want = (size - sent).min(DOWNLOAD_CHUNK_SIZE);
                let granted = match throttle.consume_or_wait(want).await {
                    Ok(granted) => granted,
                    Err(_) => return Ok(false),
                };
                if granted == 0 {
                    continue;
                }
                let mut buf = vec![0u8; granted as usize];
                let n = reader
                    .read_at(offset + sent, &mut buf)
                    .await
                    .map_err(|e| Error::internal(e.to_string()))?;
                if n == 0 {
                    break;
                }
                buf.truncate(n);
                let send_result = piece_async::timeout(op_timeout, sink.send(DownloadResponse::Chunk { offset: offset + sent, data: buf })).await;
                match send_result {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) if e.is_peer_gone() => return Ok(false),
                    Ok(Err(e)) => return Err(Error::internal(e.to_string())),
                    Err(_elapsed) => return Err(Error::internal("stream operation timed out")),
                }
                sent += n as u64;
            }
            Ok(true)
        };

        let (producer_res, consumer_res): (Result<(), Error>, Result<bool, Error>) = tokio::join!(producer_fut, consumer_fut);

        if let Some(order) = largest_order {
            self.persist_order(limit, &order).await;
        }

        match (consumer_res, producer_res) {
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
            (Ok(true), Ok(())) => Ok((Some(()), sent)),
            (Ok(false), Ok(())) => Ok((None, sent)),
        }
    }

    /// Handle the deprecated single-piece `Delete` RPC (spec.md §4.5).
    ///
    /// Matches the source behavior spec.md §9 calls out: only the
    /// order-limit's own signature is checked here, not whether the calling
    /// peer identity equals the limit's coordinator.
    #[tracing::instrument(skip(self, limit))]
    pub async fn delete(&self, limit: OrderLimit) -> Result<(), Error> {
        self.ping.was_pinged(SystemTime::now());
        let _guard = self.limiter.enter();
        let started = Instant::now();

        let result = self.delete_inner(limit).await;

        self.metrics
            .observe_request(Operation::Delete, outcome_of(&result), started.elapsed(), 0);
        result
    }

    async fn delete_inner(&self, limit: OrderLimit) -> Result<(), Error> {
        if limit.action != Action::Delete {
            return Err(Error::invalid_argument("action must be DELETE"));
        }

        let now = SystemTime::now();
        self.verifier().verify_order_limit(Action::Delete, &limit, now).await?;

        match self.store.delete(limit.coordinator_id, limit.piece_id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => {
                tracing::info!(piece_id = %limit.piece_id, "piece already absent on delete");
                Ok(())
            },
            Err(e) => Err(Error::internal(e.to_string())),
        }
    }

    /// Handle the batched `DeletePieces` RPC (spec.md §4.5).
    #[tracing::instrument(skip(self, request), fields(coordinator = %peer))]
    pub async fn delete_pieces(&self, peer: NodeId, request: DeletePiecesRequest) -> Result<DeletePiecesResponse, Error> {
        self.ping.was_pinged(SystemTime::now());
        let _guard = self.limiter.enter();
        let started = Instant::now();

        let result = self.delete_pieces_inner(peer, request).await;

        self.metrics
            .observe_request(Operation::DeletePieces, outcome_of(&result), started.elapsed(), 0);
        result
    }

    async fn delete_pieces_inner(&self, peer: NodeId, request: DeletePiecesRequest) -> Result<DeletePiecesResponse, Error> {
        if !self.trust.verify_identity(peer).await {
            return Err(Error::unauthenticated(format!("coordinator {peer} is not trusted")));
        }

        let dropped = self.deleter.enqueue(
            DeleteQueueItem { coordinator: peer, piece_ids: request.piece_ids },
            self.metrics.as_ref(),
        );

        Ok(DeletePiecesResponse { unhandled_count: dropped })
    }

    /// Handle the `Retain` RPC (spec.md §4.6).
    #[tracing::instrument(skip(self, request), fields(coordinator = %peer))]
    pub async fn retain(&self, peer: NodeId, request: RetainRequest) -> Result<(), Error> {
        self.ping.was_pinged(SystemTime::now());
        let _guard = self.limiter.enter();
        let started = Instant::now();

        let result = self.retain_inner(peer, request).await;

        self.metrics
            .observe_request(Operation::Retain, outcome_of(&result), started.elapsed(), 0);
        result
    }

    async fn retain_inner(&self, peer: NodeId, request: RetainRequest) -> Result<(), Error> {
        if !self.config.retain_enabled {
            return Ok(());
        }

        if !self.trust.verify_identity(peer).await {
            return Err(Error::unauthenticated(format!("coordinator {peer} is not trusted")));
        }

        let filter = BloomFilter::parse(request.hashers, request.filter)
            .map_err(|_| Error::invalid_argument("could not parse bloom filter"))?;

        let adjusted = request
            .created_before
            .checked_sub(self.config.retain_time_buffer)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let queued = self
            .retain
            .enqueue(piecestore::retain::RetainRequest {
                coordinator: peer,
                created_before: adjusted,
                filter: Arc::new(filter),
            })
            .await;

        if !queued {
            tracing::info!(coordinator = %peer, "retain request dropped (queue full or duplicate)");
        }

        Ok(())
    }

    /// Handle the `RestoreTrash` RPC (spec.md §4.7).
    #[tracing::instrument(skip(self), fields(coordinator = %peer))]
    pub async fn restore_trash(&self, peer: NodeId) -> Result<(), Error> {
        self.ping.was_pinged(SystemTime::now());
        let _guard = self.limiter.enter();
        let started = Instant::now();

        let result = self.restore_trash_inner(peer).await;

        self.metrics
            .observe_request(Operation::RestoreTrash, outcome_of(&result), started.elapsed(), 0);
        result
    }

    async fn restore_trash_inner(&self, peer: NodeId) -> Result<(), Error> {
        if !self.trust.verify_identity(peer).await {
            return Err(Error::unauthenticated(format!("coordinator {peer} is not trusted")));
        }

        self.store.restore_trash(peer).await.map_err(|e| Error::internal(e.to_string()))
    }
}

fn outcome_of<T>(result: &Result<T, Error>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(_) => Outcome::Failure,
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use async_trait::async_trait;
    use piece_async::Spawner;
    use piece_crypto::{PublicKey, SecretKey};
    use piecestore::{
        limit::SerialNumber,
        retain::BloomFilter,
        testing::{
            hash_bytes, signed_limit_for, signed_order, signed_piece_hash, FakeTrustPool, MockBandwidthLedger,
            MockMonitor, MockOrdersQueue, MockPieceStore, MockRetainService,
        },
    };

    use super::*;
    use crate::{metrics::testing::RecordingMetrics, ping::NoopPingStats};

    fn node(b: u8) -> NodeId {
        NodeId::from(PublicKey::from([b; 32]))
    }

    fn piece(b: u8) -> PieceId {
        PieceId::from([b; 32])
    }

    /// A fixed queue of inbound messages; `send` just records the receipt.
    struct ChannelUploadStream {
        inbound: VecDeque<UploadRequest>,
        sent: Vec<UploadResponse>,
    }

    impl ChannelUploadStream {
        fn new(msgs: Vec<UploadRequest>) -> Self {
            Self {
                inbound: msgs.into(),
                sent: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl UploadStream for ChannelUploadStream {
        async fn recv(&mut self) -> Result<UploadRequest, TransportError> {
            self.inbound.pop_front().ok_or(TransportError::Eof)
        }

        async fn send(&mut self, resp: UploadResponse) -> Result<(), TransportError> {
            self.sent.push(resp);
            Ok(())
        }
    }

    struct VecDownloadSource {
        orders: VecDeque<Order>,
    }

    impl VecDownloadSource {
        fn new(orders: Vec<Order>) -> Self {
            Self { orders: orders.into() }
        }
    }

    #[async_trait]
    impl DownloadSource for VecDownloadSource {
        async fn recv(&mut self) -> Result<Order, TransportError> {
            self.orders.pop_front().ok_or(TransportError::Eof)
        }
    }

    #[derive(Default)]
    struct RecordingDownloadSink {
        responses: Vec<DownloadResponse>,
    }

    #[async_trait]
    impl DownloadSink for RecordingDownloadSink {
        async fn send(&mut self, resp: DownloadResponse) -> Result<(), TransportError> {
            self.responses.push(resp);
            Ok(())
        }
    }

    struct Fixture {
        endpoint: Endpoint,
        coordinator_key: SecretKey,
        uplink_key: SecretKey,
        this_node: NodeId,
        store: Arc<MockPieceStore>,
        retain: Arc<MockRetainService>,
        metrics: Arc<RecordingMetrics>,
    }

    /// Assemble an [`Endpoint`] wired to in-memory collaborators. Must be
    /// called from within a `#[tokio::test]` -- the delete-queue worker pool
    /// spawns onto the ambient runtime.
    fn fixture(config: Config) -> Fixture {
        let coordinator_key = SecretKey::generate();
        let uplink_key = SecretKey::generate();
        let node_key = SecretKey::generate();
        let this_node = NodeId::from(node_key.public());

        let store = Arc::new(MockPieceStore::with_disk_free(1 << 30));
        let trust = Arc::new(FakeTrustPool::trusting(coordinator_key.public()));
        let orders = Arc::new(MockOrdersQueue::default());
        let ledger = Arc::new(MockBandwidthLedger::default());
        let monitor = Arc::new(MockMonitor::with_available(1 << 30));
        let retain = Arc::new(MockRetainService::default());
        let metrics = Arc::new(RecordingMetrics::default());

        let spawner = Spawner::from_current().expect("fixture must run inside a tokio runtime");
        let deleter = Arc::new(PieceDeleter::spawn(
            store.clone() as Arc<dyn PieceStore>,
            metrics.clone() as Arc<dyn Metrics>,
            &spawner,
            config.delete_workers,
            config.delete_queue_size,
        ));

        let signer: BoxedSigner = Box::new(node_key);

        let endpoint = Endpoint {
            this_node,
            config,
            store: store.clone() as Arc<dyn PieceStore>,
            trust: trust as Arc<dyn TrustPool>,
            orders: orders as Arc<dyn OrdersQueue>,
            ledger: ledger as Arc<dyn BandwidthLedger>,
            monitor: monitor as Arc<dyn Monitor>,
            retain: retain.clone() as Arc<dyn RetainService>,
            deleter,
            signer,
            used_serials: Arc::new(UsedSerials::new(1 << 20)),
            limiter: Arc::new(RequestLimiter::new()),
            ping: Arc::new(NoopPingStats),
            metrics: metrics.clone() as Arc<dyn Metrics>,
        };

        Fixture {
            endpoint,
            coordinator_key,
            uplink_key,
            this_node,
            store,
            retain,
            metrics,
        }
    }

    fn now() -> SystemTime {
        SystemTime::now()
    }

    async fn upload_limit(f: &Fixture, piece_id: PieceId, byte_limit: u64, serial: u8) -> OrderLimit {
        signed_limit_for(
            &f.coordinator_key,
            &f.uplink_key,
            f.this_node,
            piece_id,
            Action::Put,
            byte_limit,
            SerialNumber::from([serial; 16]),
            now(),
            now() + Duration::from_secs(3600),
        )
        .await
    }

    #[tokio::test]
    async fn upload_happy_path_signs_and_commits_receipt() {
        let f = fixture(Config::default());
        let data = b"hello piece store".to_vec();
        let limit = upload_limit(&f, piece(1), 1 << 16, 1).await;
        let order = signed_order(&f.uplink_key, limit.serial_number, data.len() as u64, now()).await;
        let hash = hash_bytes(&data);
        let uplink_signature = signed_piece_hash(&f.uplink_key, &hash, data.len() as u64).await;

        let mut stream = ChannelUploadStream::new(vec![
            UploadRequest::Limit(limit.clone()),
            UploadRequest::Order(order),
            UploadRequest::Chunk { offset: 0, data: data.clone() },
            UploadRequest::Done {
                hash,
                piece_size: data.len() as u64,
                uplink_signature,
                timestamp: now(),
            },
        ]);

        let response = f.endpoint.upload(&mut stream).await.unwrap().expect("upload completed");
        assert_eq!(response.piece_id, limit.piece_id);
        assert_eq!(response.piece_size, data.len() as u64);
        // The receipt observed over the stream must be the one returned.
        assert_eq!(stream.sent.len(), 1);

        let mut reader = f.store.reader(limit.coordinator_id, limit.piece_id).await.unwrap();
        assert_eq!(reader.size(), data.len() as u64);
        let mut buf = vec![0u8; data.len()];
        reader.read_at(0, &mut buf).await.unwrap();
        assert_eq!(buf, data);

        let events = f.metrics.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Operation::Upload);
        assert_eq!(events[0].outcome, Outcome::Success);
        assert_eq!(events[0].bytes, data.len() as u64);
    }

    #[tokio::test]
    async fn upload_rejects_replayed_order_limit() {
        let f = fixture(Config::default());
        let data = b"abc".to_vec();
        let limit = upload_limit(&f, piece(2), 1 << 16, 2).await;
        let order = signed_order(&f.uplink_key, limit.serial_number, data.len() as u64, now()).await;
        let hash = hash_bytes(&data);
        let uplink_signature = signed_piece_hash(&f.uplink_key, &hash, data.len() as u64).await;

        let mut first = ChannelUploadStream::new(vec![
            UploadRequest::Limit(limit.clone()),
            UploadRequest::Order(order.clone()),
            UploadRequest::Chunk { offset: 0, data: data.clone() },
            UploadRequest::Done {
                hash,
                piece_size: data.len() as u64,
                uplink_signature,
                timestamp: now(),
            },
        ]);
        f.endpoint.upload(&mut first).await.unwrap();

        let mut second = ChannelUploadStream::new(vec![UploadRequest::Limit(limit)]);
        let err = f.endpoint.upload(&mut second).await.unwrap_err();
        assert_eq!(err.kind(), "already_exists");
    }

    #[tokio::test]
    async fn upload_rejects_when_disk_space_is_insufficient() {
        let f = fixture(Config::default());
        *f.store.disk_free.lock().unwrap() = 10;
        let limit = upload_limit(&f, piece(3), 1 << 16, 3).await;

        let mut stream = ChannelUploadStream::new(vec![UploadRequest::Limit(limit)]);
        let err = f.endpoint.upload(&mut stream).await.unwrap_err();
        assert_eq!(err.kind(), "aborted");
    }

    #[tokio::test]
    async fn upload_rejects_chunk_exceeding_order_allocation() {
        let f = fixture(Config::default());
        let limit = upload_limit(&f, piece(4), 1 << 16, 4).await;
        // Order only authorizes 4 bytes; the chunk tries to write 10.
        let order = signed_order(&f.uplink_key, limit.serial_number, 4, now()).await;

        let mut stream = ChannelUploadStream::new(vec![
            UploadRequest::Limit(limit),
            UploadRequest::Order(order),
            UploadRequest::Chunk { offset: 0, data: vec![0u8; 10] },
        ]);
        let err = f.endpoint.upload(&mut stream).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn upload_rejects_out_of_order_chunk() {
        let f = fixture(Config::default());
        let limit = upload_limit(&f, piece(5), 1 << 16, 5).await;
        let order = signed_order(&f.uplink_key, limit.serial_number, 100, now()).await;

        let mut stream = ChannelUploadStream::new(vec![
            UploadRequest::Limit(limit),
            UploadRequest::Order(order),
            // Offset 5 with nothing written yet.
            UploadRequest::Chunk { offset: 5, data: vec![0u8; 5] },
        ]);
        let err = f.endpoint.upload(&mut stream).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn upload_cancelled_mid_session_leaves_no_piece() {
        let f = fixture(Config::default());
        let limit = upload_limit(&f, piece(6), 1 << 16, 6).await;
        let coordinator = limit.coordinator_id;
        let piece_id = limit.piece_id;

        // Only the limit arrives; the peer then vanishes.
        let mut stream = ChannelUploadStream::new(vec![UploadRequest::Limit(limit)]);
        let outcome = f.endpoint.upload(&mut stream).await.unwrap();
        assert!(outcome.is_none());

        let err = f.store.reader(coordinator, piece_id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn upload_rejects_concurrent_request_over_cap() {
        let mut config = Config::default();
        config.max_concurrent_requests = 1;
        let f = fixture(config);
        let _held = f.endpoint.limiter.enter();

        let limit = upload_limit(&f, piece(7), 1 << 16, 7).await;
        let mut stream = ChannelUploadStream::new(vec![UploadRequest::Limit(limit)]);
        let err = f.endpoint.upload(&mut stream).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }

    async fn download_limit(f: &Fixture, piece_id: PieceId, byte_limit: u64, serial: u8, action: Action) -> OrderLimit {
        signed_limit_for(
            &f.coordinator_key,
            &f.uplink_key,
            f.this_node,
            piece_id,
            action,
            byte_limit,
            SerialNumber::from([serial; 16]),
            now(),
            now() + Duration::from_secs(3600),
        )
        .await
    }

    fn seed_piece(f: &Fixture, coordinator: NodeId, piece_id: PieceId, data: Vec<u8>, header_limit: OrderLimit) {
        let header = PieceHeader {
            hash: hash_bytes(&data),
            creation_time: now(),
            uplink_signature: piece_crypto::Signature([0u8; 64]),
            order_limit: header_limit,
        };
        f.store.seed(coordinator, piece_id, data, header);
    }

    #[tokio::test]
    async fn download_happy_path_streams_full_piece() {
        let f = fixture(Config::default());
        let data = b"the quick brown fox".to_vec();
        let limit = download_limit(&f, piece(10), 1 << 16, 10, Action::Get).await;
        seed_piece(&f, limit.coordinator_id, limit.piece_id, data.clone(), limit.clone());

        let order = signed_order(&f.uplink_key, limit.serial_number, data.len() as u64, now()).await;
        let mut source = VecDownloadSource::new(vec![order]);
        let mut sink = RecordingDownloadSink::default();

        let request = DownloadRequest { limit, offset: 0, size: data.len() as u64 };
        let outcome = f.endpoint.download(request, &mut sink, &mut source).await.unwrap();
        assert!(outcome.is_some());

        let chunks: Vec<u8> = sink
            .responses
            .into_iter()
            .flat_map(|r| match r {
                DownloadResponse::Chunk { data, .. } => data,
                DownloadResponse::Header { .. } => panic!("unexpected header frame for plain GET"),
            })
            .collect();
        assert_eq!(chunks, data);
    }

    #[tokio::test]
    async fn download_get_repair_sends_leading_header_frame() {
        let f = fixture(Config::default());
        let data = b"repair me".to_vec();
        let limit = download_limit(&f, piece(11), 1 << 16, 11, Action::GetRepair).await;
        seed_piece(&f, limit.coordinator_id, limit.piece_id, data.clone(), limit.clone());

        let order = signed_order(&f.uplink_key, limit.serial_number, data.len() as u64, now()).await;
        let mut source = VecDownloadSource::new(vec![order]);
        let mut sink = RecordingDownloadSink::default();

        let request = DownloadRequest { limit, offset: 0, size: data.len() as u64 };
        f.endpoint.download(request, &mut sink, &mut source).await.unwrap();

        assert!(matches!(sink.responses.first(), Some(DownloadResponse::Header { .. })));
        assert!(sink.responses.iter().any(|r| matches!(r, DownloadResponse::Chunk { .. })));
    }

    #[tokio::test]
    async fn download_rejects_size_over_order_limit() {
        let f = fixture(Config::default());
        let limit = download_limit(&f, piece(12), 10, 12, Action::Get).await;
        seed_piece(&f, limit.coordinator_id, limit.piece_id, vec![0u8; 100], limit.clone());

        let mut source = VecDownloadSource::new(vec![]);
        let mut sink = RecordingDownloadSink::default();
        let request = DownloadRequest { limit, offset: 0, size: 20 };
        let err = f.endpoint.download(request, &mut sink, &mut source).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn download_rejects_range_past_piece_end() {
        let f = fixture(Config::default());
        let limit = download_limit(&f, piece(13), 1 << 16, 13, Action::Get).await;
        seed_piece(&f, limit.coordinator_id, limit.piece_id, vec![0u8; 10], limit.clone());

        let mut source = VecDownloadSource::new(vec![]);
        let mut sink = RecordingDownloadSink::default();
        let request = DownloadRequest { limit, offset: 5, size: 10 };
        let err = f.endpoint.download(request, &mut sink, &mut source).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn download_of_missing_piece_is_not_found() {
        let f = fixture(Config::default());
        let limit = download_limit(&f, piece(14), 1 << 16, 14, Action::Get).await;

        let mut source = VecDownloadSource::new(vec![]);
        let mut sink = RecordingDownloadSink::default();
        let request = DownloadRequest { limit, offset: 0, size: 1 };
        let err = f.endpoint.download(request, &mut sink, &mut source).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn delete_pieces_enqueues_and_reports_back_pressure() {
        let mut config = Config::default();
        config.delete_workers = 0;
        config.delete_queue_size = 1;
        let f = fixture(config);

        let peer = NodeId::from(f.coordinator_key.public());
        let first = f
            .endpoint
            .delete_pieces(peer, DeletePiecesRequest { piece_ids: vec![piece(20)] })
            .await
            .unwrap();
        assert_eq!(first.unhandled_count, 0);

        let second = f
            .endpoint
            .delete_pieces(peer, DeletePiecesRequest { piece_ids: vec![piece(21), piece(22)] })
            .await
            .unwrap();
        // Either the lone worker already drained slot one, or the
        // one-slot queue was still full; both are valid under scheduling.
        assert!(second.unhandled_count == 0 || second.unhandled_count == 2);
    }

    #[tokio::test]
    async fn delete_pieces_rejects_untrusted_coordinator() {
        let f = fixture(Config::default());
        let err = f
            .endpoint
            .delete_pieces(node(99), DeletePiecesRequest { piece_ids: vec![piece(23)] })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unauthenticated");
    }

    #[tokio::test]
    async fn retain_disabled_by_config_is_a_no_op() {
        let mut config = Config::default();
        config.retain_enabled = false;
        let f = fixture(config);

        f.endpoint.retain(node(99), RetainRequest { created_before: now(), hashers: 1, filter: vec![] }).await.unwrap();
        assert!(f.retain.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retain_rejects_untrusted_coordinator() {
        let f = fixture(Config::default());
        let filter = BloomFilter::<PieceId>::new(8, 0.01).unwrap();
        let request = RetainRequest {
            created_before: now(),
            hashers: filter.hashers(),
            filter: filter.bits().to_vec(),
        };
        let err = f.endpoint.retain(node(99), request).await.unwrap_err();
        assert_eq!(err.kind(), "unauthenticated");
    }

    #[tokio::test]
    async fn retain_enqueues_a_parsed_bloom_filter() {
        let f = fixture(Config::default());
        let mut filter = BloomFilter::<PieceId>::new(8, 0.01).unwrap();
        filter.insert(&piece(30));
        let peer = NodeId::from(f.coordinator_key.public());

        let request = RetainRequest {
            created_before: now(),
            hashers: filter.hashers(),
            filter: filter.bits().to_vec(),
        };
        f.endpoint.retain(peer, request).await.unwrap();

        let requests = f.retain.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].filter.contains(&piece(30)));
    }

    #[tokio::test]
    async fn restore_trash_rejects_untrusted_coordinator() {
        let f = fixture(Config::default());
        let err = f.endpoint.restore_trash(node(99)).await.unwrap_err();
        assert_eq!(err.kind(), "unauthenticated");
    }

    #[tokio::test]
    async fn restore_trash_succeeds_for_trusted_coordinator() {
        let f = fixture(Config::default());
        let peer = NodeId::from(f.coordinator_key.public());
        f.endpoint.restore_trash(peer).await.unwrap();
    }

    #[tokio::test]
    async fn delete_single_piece_is_idempotent_when_already_absent() {
        let f = fixture(Config::default());
        let limit = signed_limit_for(
            &f.coordinator_key,
            &f.uplink_key,
            f.this_node,
            piece(40),
            Action::Delete,
            0,
            SerialNumber::from([40u8; 16]),
            now(),
            now() + Duration::from_secs(3600),
        )
        .await;

        f.endpoint.delete(limit).await.unwrap();
    }
}
