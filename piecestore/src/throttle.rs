// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! The download throttle (spec.md §9 "Throttle primitive").
//!
//! A single-producer/single-consumer token bucket: the receive side
//! `produce`s tokens as orders arrive, the send side `consume_or_wait`s
//! tokens before sending each chunk. `fail` wakes every waiter so the
//! consumer exits cleanly once the producer observes stream EOF -- that
//! handshake is the one subtlety worth getting right here.

use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone, Debug, thiserror::Error)]
#[error("throttle failed: {0}")]
pub struct ThrottleError(pub String);

struct State {
    available: u64,
    failed: Option<ThrottleError>,
}

#[derive(Clone)]
pub struct Throttle {
    state: Arc<std::sync::Mutex<State>>,
    notify: Arc<Notify>,
}

impl Throttle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(std::sync::Mutex::new(State {
                available: 0,
                failed: None,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Add `n` tokens (an order's `delta`, spec.md §4.4). A no-op once the
    /// throttle has failed.
    pub fn produce(&self, n: u64) {
        {
            let mut state = self.state.lock().unwrap();
            if state.failed.is_some() {
                return;
            }
            state.available = state.available.saturating_add(n);
        }
        self.notify.notify_waiters();
    }

    /// Wake every waiter with `err`. Subsequent `produce` calls are
    /// ignored; subsequent `consume_or_wait` calls return `err` immediately.
    pub fn fail(&self, err: ThrottleError) {
        {
            let mut state = self.state.lock().unwrap();
            if state.failed.is_none() {
                state.failed = Some(err);
            }
        }
        self.notify.notify_waiters();
    }

    /// Grant up to `want` tokens, waiting until at least one is available
    /// or the throttle fails. Returns the amount actually granted (which
    /// may be less than `want`), or the failure error.
    pub async fn consume_or_wait(&self, want: u64) -> Result<u64, ThrottleError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                // Drain whatever is already available before surfacing a
                // failure -- a producer that fails right after producing
                // (e.g. EOF immediately following the order that covered
                // the whole request) must not strand those tokens unconsumed.
                if state.available > 0 {
                    let grant = state.available.min(want);
                    state.available -= grant;
                    return Ok(grant);
                }
                if let Some(err) = &state.failed {
                    return Err(err.clone());
                }
            }
            notified.await;
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn consume_returns_available_tokens() {
        let throttle = Throttle::new();
        throttle.produce(100);
        let granted = throttle.consume_or_wait(40).await.unwrap();
        assert_eq!(granted, 40);
    }

    #[tokio::test]
    async fn consume_waits_for_tokens() {
        let throttle = Throttle::new();
        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.consume_or_wait(10).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        throttle.produce(10);

        let granted = waiter.await.unwrap().unwrap();
        assert_eq!(granted, 10);
    }

    #[tokio::test]
    async fn fail_wakes_waiters_with_error() {
        let throttle = Throttle::new();
        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.consume_or_wait(10).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        throttle.fail(ThrottleError("peer gone".into()));

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.0, "peer gone");
    }

    #[tokio::test]
    async fn partial_grant_when_demand_exceeds_supply() {
        let throttle = Throttle::new();
        throttle.produce(5);
        let granted = throttle.consume_or_wait(10).await.unwrap();
        assert_eq!(granted, 5);
    }
}
