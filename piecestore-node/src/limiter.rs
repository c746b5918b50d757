// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The live-request counter (spec.md §4.8, §3 "Live-Request Counter").
//!
//! Every RPC entry increments the counter; uploads additionally reject
//! with `Unavailable` once the post-increment value exceeds a configured
//! cap. The counter itself is process-wide and gates nothing on its own --
//! only the upload handler consults the cap (spec.md §4.3 "Concurrency
//! gating").

use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

use piecestore::Error;

/// Process-wide live-request counter.
#[derive(Default)]
pub struct RequestLimiter {
    count: AtomicUsize,
}

/// Decrements the counter when dropped, regardless of how the request
/// ended -- the RAII equivalent of the "decrement deferred" note in
/// spec.md §4.8.
pub struct RequestGuard<'a> {
    limiter: &'a RequestLimiter,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.limiter.count.fetch_sub(1, SeqCst);
    }
}

impl RequestLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_requests(&self) -> usize {
        self.count.load(SeqCst)
    }

    /// Increment unconditionally. Every RPC entry point calls this (spec.md
    /// §4.8); only uploads look at the cap.
    pub fn enter(&self) -> RequestGuard<'_> {
        self.count.fetch_add(1, SeqCst);
        RequestGuard { limiter: self }
    }

    /// Increment and, when `max` is nonzero, fail if the post-increment
    /// value exceeds it (spec.md §4.3 "Concurrency gating", invariant I6).
    pub fn enter_upload(&self, max: usize) -> Result<RequestGuard<'_>, Error> {
        let guard = self.enter();
        if max > 0 && self.live_requests() > max {
            return Err(Error::unavailable(format!(
                "too many concurrent requests (limit {max})"
            )));
        }
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_live_requests() {
        let limiter = RequestLimiter::new();
        let a = limiter.enter();
        let b = limiter.enter();
        assert_eq!(limiter.live_requests(), 2);
        drop(a);
        assert_eq!(limiter.live_requests(), 1);
        drop(b);
        assert_eq!(limiter.live_requests(), 0);
    }

    #[test]
    fn rejects_upload_over_cap() {
        let limiter = RequestLimiter::new();
        let _a = limiter.enter_upload(1).unwrap();
        let err = limiter.enter_upload(1).unwrap_err();
        assert_eq!(err.kind(), "unavailable");
        // The rejecting call's guard still decrements on drop, so the
        // counter does not leak past the brief reject window (spec.md I6).
        assert_eq!(limiter.live_requests(), 1);
    }

    #[test]
    fn zero_cap_is_unlimited() {
        let limiter = RequestLimiter::new();
        let _guards: Vec<_> = (0..50).map(|_| limiter.enter_upload(0).unwrap()).collect();
        assert_eq!(limiter.live_requests(), 50);
    }
}
