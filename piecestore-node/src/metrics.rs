// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! Per-request observations (SPEC_FULL.md §2.3), the concrete form of the
//! "Metrics/Logging shims" row in spec.md's component table.

use std::time::Duration;

/// Which RPC a [`Metrics`] observation belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    Upload,
    Download,
    Delete,
    DeletePieces,
    Retain,
    RestoreTrash,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Delete => "delete",
            Self::DeletePieces => "delete_pieces",
            Self::Retain => "retain",
            Self::RestoreTrash => "restore_trash",
        }
    }
}

/// How a request ended. Cancellation is kept separate from failure (spec.md
/// §5 "Cancellation": "a distinct log/metric bucket, not an error").
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    Cancelled,
}

/// Collaborator that records request duration, byte counts, and outcomes.
/// Borrowed, not owned -- same ownership model as the other collaborators
/// in spec.md §3.
pub trait Metrics: Send + Sync {
    fn observe_request(&self, op: Operation, outcome: Outcome, duration: Duration, bytes: u64);

    /// Depth of the delete queue right after an enqueue attempt
    /// (SPEC_FULL.md §3 "Delete-queue drain metrics").
    fn observe_delete_queue_depth(&self, depth: usize) {
        let _ = depth;
    }

    /// One delete-worker completed one coordinator's batch.
    fn observe_delete_worker_completed(&self) {}
}

/// Discards every observation. Used when the endpoint is embedded without a
/// metrics backend wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn observe_request(&self, _op: Operation, _outcome: Outcome, _duration: Duration, _bytes: u64) {}
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Eq, PartialEq, Clone)]
    pub struct Recorded {
        pub op: Operation,
        pub outcome: Outcome,
        pub bytes: u64,
    }

    #[derive(Default)]
    pub struct RecordingMetrics {
        pub events: Mutex<Vec<Recorded>>,
        pub delete_queue_depths: Mutex<Vec<usize>>,
    }

    impl Metrics for RecordingMetrics {
        fn observe_request(&self, op: Operation, outcome: Outcome, _duration: Duration, bytes: u64) {
            self.events.lock().unwrap().push(Recorded { op, outcome, bytes });
        }

        fn observe_delete_queue_depth(&self, depth: usize) {
            self.delete_queue_depths.lock().unwrap().push(depth);
        }
    }
}
