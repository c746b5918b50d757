// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The disk-space monitor contract (spec.md §1 "Out of scope").

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[error("monitor unavailable: {0}")]
pub struct MonitorError(pub String);

#[async_trait]
pub trait Monitor: Send + Sync {
    /// Bytes the monitor currently believes are available, independent of
    /// the store's own `disk_free` (spec.md §4.3 queries both).
    async fn available_space(&self) -> Result<u64, MonitorError>;

    /// Fire the low-disk notification. Called at most once per upload, only
    /// when available space dropped below `report_capacity_threshold`
    /// during the session (spec.md §4.3 "Exit invariants").
    fn notify_low_disk(&self);
}
