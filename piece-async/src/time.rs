// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

use std::{future::Future, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("timeout elapsed")]
pub struct Elapsed;

/// Require `f` to complete before `after` elapses.
///
/// Used to implement the stream-operation-timeout that wraps every single
/// send and receive on an RPC stream.
///
/// # Cancellation
///
/// No special measures are taken to cancel `f` -- it is simply dropped if
/// the timeout elapses or if the returned future is dropped.
pub async fn timeout<F, T>(after: Duration, f: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(after, f).await.map_err(|_| Elapsed)
}

pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}
