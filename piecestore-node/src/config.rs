// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

//! Endpoint configuration (spec.md §6).
//!
//! A `serde::Deserialize` struct rather than `structopt` flags: this crate
//! is embedded in a host node process, not a standalone binary, so
//! configuration arrives from the host's config file. Field-level docs
//! follow the density `node-lib::args::Args` uses for its own flags.

use std::time::Duration;

use serde::Deserialize;

fn default_max_concurrent_requests() -> usize {
    0
}

fn default_order_limit_grace_period() -> Duration {
    Duration::from_secs(60)
}

fn default_stream_operation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_report_capacity_threshold() -> u64 {
    500 * 1024 * 1024
}

fn default_max_used_serials_size() -> usize {
    64 * 1024 * 1024
}

fn default_retain_time_buffer() -> Duration {
    Duration::from_secs(48 * 3600)
}

fn default_delete_workers() -> usize {
    1
}

fn default_delete_queue_size() -> usize {
    10_000
}

fn default_expiration_grace_period() -> Duration {
    Duration::from_secs(48 * 3600)
}

fn default_retain_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Caps the number of uploads admitted concurrently; `0` means
    /// unlimited. Downloads and the other RPCs are never gated by this
    /// value (spec.md §4.3 "Concurrency gating").
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// How long after an order limit's `issued_at` it remains acceptable,
    /// independent of its own `order_expiration` (spec.md §4.1).
    #[serde(default = "default_order_limit_grace_period", with = "humantime_serde")]
    pub order_limit_grace_period: Duration,

    /// Deadline applied to every individual stream send/receive, not the
    /// RPC as a whole (spec.md §4.3 "Stream read/write timeout").
    #[serde(default = "default_stream_operation_timeout", with = "humantime_serde")]
    pub stream_operation_timeout: Duration,

    /// If available disk space drops below this many bytes over the course
    /// of an upload, the monitor's low-disk notifier fires once when the
    /// stream closes (spec.md §4.3 "Exit invariants").
    #[serde(default = "default_report_capacity_threshold")]
    pub report_capacity_threshold: u64,

    /// Memory budget for the used-serials replay cache (spec.md §4.2).
    #[serde(default = "default_max_used_serials_size")]
    pub max_used_serials_size: usize,

    /// Subtracted from a Retain RPC's `created_before` timestamp before it
    /// is queued, so that pieces committed just before the coordinator's
    /// bloom filter snapshot are never collected prematurely (spec.md
    /// §4.6).
    #[serde(default = "default_retain_time_buffer", with = "humantime_serde")]
    pub retain_time_buffer: Duration,

    /// Number of workers draining the delete queue (spec.md §4.5).
    #[serde(default = "default_delete_workers")]
    pub delete_workers: usize,

    /// Bound on the delete queue; `DeletePieces` reports how many
    /// submitted ids were dropped once this is exceeded (spec.md §4.5).
    #[serde(default = "default_delete_queue_size")]
    pub delete_queue_size: usize,

    /// Added to a piece's declared expiration before it is recorded in the
    /// store's expiration index (SPEC_FULL.md §3 "Expiration grace
    /// period").
    #[serde(default = "default_expiration_grace_period", with = "humantime_serde")]
    pub expiration_grace_period: Duration,

    /// Whether the `Retain` RPC is honored at all; when `false` it succeeds
    /// as a no-op without touching the retain service (spec.md §4.6).
    #[serde(default = "default_retain_enabled")]
    pub retain_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            order_limit_grace_period: default_order_limit_grace_period(),
            stream_operation_timeout: default_stream_operation_timeout(),
            report_capacity_threshold: default_report_capacity_threshold(),
            max_used_serials_size: default_max_used_serials_size(),
            retain_time_buffer: default_retain_time_buffer(),
            delete_workers: default_delete_workers(),
            delete_queue_size: default_delete_queue_size(),
            expiration_grace_period: default_expiration_grace_period(),
            retain_enabled: default_retain_enabled(),
        }
    }
}
