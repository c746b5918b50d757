// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The ping-stats sink (spec.md §3 "Last-ping timestamp", §4.8).
//!
//! Opaque to the endpoint: every RPC entry reports `now()` and nothing
//! reads the value back through this trait. A real deployment wires this
//! to whatever answers the node's own liveness/ping RPC.

use std::time::SystemTime;

pub trait PingStats: Send + Sync {
    fn was_pinged(&self, now: SystemTime);
}

#[derive(Default)]
pub struct NoopPingStats;

impl PingStats for NoopPingStats {
    fn was_pinged(&self, _now: SystemTime) {}
}

/// Records only the most recent timestamp; used by embedders that want the
/// value without standing up a full ping-stats service.
#[derive(Default)]
pub struct LastPing(std::sync::Mutex<Option<SystemTime>>);

impl PingStats for LastPing {
    fn was_pinged(&self, now: SystemTime) {
        *self.0.lock().unwrap() = Some(now);
    }
}

impl LastPing {
    pub fn get(&self) -> Option<SystemTime> {
        *self.0.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn records_the_latest_timestamp() {
        let sink = LastPing::default();
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + Duration::from_secs(10);
        sink.was_pinged(t0);
        sink.was_pinged(t1);
        assert_eq!(sink.get(), Some(t1));
    }
}
