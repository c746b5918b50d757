// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The piece store endpoint: the request-processing surface of a storage
//! node (spec.md §1–§2). Wires `piecestore`'s domain model and collaborator
//! contracts into the upload/download streaming state machines, the
//! delete/retain/restore-trash handlers, the live-request limiter, the
//! delete-queue worker pool, configuration, and per-request metrics.

pub mod config;
pub mod deleter;
pub mod endpoint;
pub mod limiter;
pub mod metrics;
pub mod ping;
pub mod transport;

pub use config::Config;
pub use endpoint::Endpoint;
