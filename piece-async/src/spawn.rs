// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

use std::{
    any::Any,
    future::Future,
    panic,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc,
    },
    task::{Context, Poll},
};

use futures_util::FutureExt as _;
use thiserror::Error;
use tracing::Instrument as _;

/// Wrapper around the ambient tokio runtime.
///
/// Every RPC handler receives a [`Spawner`] rather than calling
/// `tokio::spawn` directly, so that download/upload concurrency can be
/// observed and, in tests, driven deterministically.
pub struct Spawner {
    inner: tokio::runtime::Handle,
    spawned: Arc<AtomicUsize>,
}

impl Spawner {
    /// Build a [`Spawner`] from the ambient async context.
    pub fn from_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().map(Self::tokio).ok()
    }

    pub fn tokio(inner: tokio::runtime::Handle) -> Self {
        Self {
            inner,
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn a task, returning a [`Task`] handle which aborts the task on
    /// drop unless [`Task::detach`] is called.
    pub fn spawn<T>(&self, task: T) -> Task<T::Output>
    where
        T: Future + Send + 'static,
        T::Output: Send + 'static,
    {
        let counter = Arc::clone(&self.spawned);
        self.inner
            .spawn(
                async move {
                    counter.fetch_add(1, Relaxed);
                    let res = task.await;
                    counter.fetch_sub(1, Relaxed);
                    res
                }
                .in_current_span(),
            )
            .into()
    }

    /// Number of tasks spawned via [`Spawner::spawn`] that have not resolved
    /// yet. Includes detached tasks.
    pub fn stats(&self) -> Stats {
        Stats {
            spawned: self.spawned.load(Relaxed),
        }
    }
}

impl Clone for Spawner {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            spawned: Arc::clone(&self.spawned),
        }
    }
}

pub struct Stats {
    pub spawned: usize,
}

/// A handle to a task spawned via [`Spawner::spawn`].
///
/// Dropping a [`Task`] aborts the underlying task. To let it keep running
/// unattended, call [`Task::detach`].
#[must_use = "spawned tasks must be awaited or detached"]
pub struct Task<T> {
    task: tokio::task::JoinHandle<T>,
    abort_on_drop: bool,
}

impl<T> Task<T> {
    pub fn abort(&self) {
        self.task.abort()
    }

    pub fn detach(mut self) {
        self.abort_on_drop = false;
    }
}

impl<T> From<tokio::task::JoinHandle<T>> for Task<T> {
    fn from(task: tokio::task::JoinHandle<T>) -> Self {
        Self {
            task,
            abort_on_drop: true,
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.abort()
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        self.task.poll_unpin(cx).map(|t| t.map_err(JoinError::from))
    }
}

#[derive(Error)]
pub enum JoinError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked")]
    Panicked(Box<dyn Any + Send + 'static>),
}

impl std::fmt::Debug for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("JoinError::Cancelled"),
            Self::Panicked(_) => f.write_str("JoinError::Panicked(..)"),
        }
    }
}

impl JoinError {
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match self {
            Self::Cancelled => panic!("task was cancelled, not panicked"),
            Self::Panicked(payload) => payload,
        }
    }
}

impl From<tokio::task::JoinError> for JoinError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::Cancelled
        } else if e.is_panic() {
            Self::Panicked(e.into_panic())
        } else {
            unreachable!("unexpected join error: {:?}", e)
        }
    }
}

#[derive(Debug, Error)]
#[error("spawned task cancelled")]
pub struct Cancelled;
