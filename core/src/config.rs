//! Engine defaults and worker-pool configuration.

use std::{env, thread};

/// Values requested ahead from an upstream by operators that buffer (`publish_on`, `publish`)
pub const DEFAULT_PREFETCH: u64 = 256;

/// Upstream values `concat_map` keeps queued while an inner producer runs
pub const CONCAT_PREFETCH: u64 = 32;

/// Per-source prefetch of `zip`
pub const ZIP_PREFETCH: u64 = 32;

/// Default per-subscriber capacity of the emitter bridge
pub const SMALL_BUFFER_SIZE: usize = 256;

/// Overrides the worker count of the shared parallel pool
pub const PARALLELISM_ENV: &str = "SLUICE_PARALLELISM";

/// Named worker pool settings. Worker threads are named `{name}-{n}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    name: String,
    workers: usize,
}

impl SchedulerConfig {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), workers: available_cpus() } }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn worker_count(&self) -> usize { self.workers }

    /// One worker per CPU, or `SLUICE_PARALLELISM` when set to a positive number
    pub fn parallel() -> Self { Self::new("parallel").workers(parallelism_override(env::var(PARALLELISM_ENV).ok()).unwrap_or_else(available_cpus)) }

    /// Pool for blocking work: ten workers per CPU
    pub fn bounded_elastic() -> Self { Self::new("bounded-elastic").workers(available_cpus() * 10) }

    pub fn single() -> Self { Self::new("single").workers(1) }
}

fn parallelism_override(value: Option<String>) -> Option<usize> { value?.trim().parse().ok().filter(|n| *n > 0) }

fn available_cpus() -> usize { thread::available_parallelism().map(|n| n.get()).unwrap_or(1) }
