//! Execution contexts: named worker pools that accept tasks.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, OnceLock,
    },
    thread,
    time::Duration,
};

use tokio::{
    runtime::{Builder, Handle, Runtime},
    task::AbortHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error};

use crate::{config::SchedulerConfig, error::SchedulerError};

/// A named execution context.
///
/// Cloning is cheap and every clone submits to the same pool. The pool shuts down when the
/// last clone is dropped, without waiting for running tasks.
#[derive(Clone)]
pub struct Scheduler(Arc<Inner>);

struct Inner {
    name: String,
    kind: Kind,
}

enum Kind {
    /// Runs tasks on the calling thread
    Immediate,
    Pool { handle: Handle, runtime: Option<Runtime> },
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Kind::Pool { runtime, .. } = &mut self.kind {
            if let Some(runtime) = runtime.take() {
                debug!("shutting down worker pool {}", self.name);
                runtime.shutdown_background();
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("Scheduler").field(&self.0.name).finish() }
}

static PARALLEL: OnceLock<Scheduler> = OnceLock::new();
static BOUNDED_ELASTIC: OnceLock<Scheduler> = OnceLock::new();
static SINGLE: OnceLock<Scheduler> = OnceLock::new();

impl Scheduler {
    /// Starts a dedicated worker pool
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let prefix = config.name().to_owned();
        let counter = AtomicUsize::new(0);
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_count())
            .thread_name_fn(move || format!("{}-{}", prefix, counter.fetch_add(1, Ordering::Relaxed)))
            .enable_time()
            .build()
            .map_err(|source| SchedulerError::Start { name: config.name().to_owned(), source })?;
        debug!("started worker pool {} with {} workers", config.name(), config.worker_count());
        let handle = runtime.handle().clone();
        Ok(Self(Arc::new(Inner { name: config.name().to_owned(), kind: Kind::Pool { handle, runtime: Some(runtime) } })))
    }

    /// Runs every task inline on the submitting thread
    pub fn immediate() -> Self { Self(Arc::new(Inner { name: "immediate".to_owned(), kind: Kind::Immediate })) }

    /// Shared pool for non-blocking work; also the timing context of `interval` and `delay`
    pub fn parallel() -> Self { shared(&PARALLEL, SchedulerConfig::parallel) }

    /// Shared pool for work that may block
    pub fn bounded_elastic() -> Self { shared(&BOUNDED_ELASTIC, SchedulerConfig::bounded_elastic) }

    /// Shared single-worker pool
    pub fn single() -> Self { shared(&SINGLE, SchedulerConfig::single) }

    pub fn name(&self) -> &str { &self.0.name }

    pub fn is_immediate(&self) -> bool { matches!(self.0.kind, Kind::Immediate) }

    pub fn schedule<F>(&self, task: F)
    where F: FnOnce() + Send + 'static {
        match &self.0.kind {
            Kind::Immediate => task(),
            Kind::Pool { handle, .. } => {
                handle.spawn(async move { task() });
            }
        }
    }

    /// Runs `task` once after `delay`, unless the returned handle is cancelled first
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> TaskHandle
    where F: FnOnce() + Send + 'static {
        match &self.0.kind {
            Kind::Pool { handle, .. } => {
                let join = handle.spawn(async move {
                    time::sleep(delay).await;
                    task();
                });
                TaskHandle::Abort(join.abort_handle())
            }
            Kind::Immediate => {
                let cancelled = Arc::new(AtomicBool::new(false));
                let flag = cancelled.clone();
                spawn_timer_thread(move || {
                    thread::sleep(delay);
                    if !flag.load(Ordering::Acquire) {
                        task();
                    }
                });
                TaskHandle::Flag(cancelled)
            }
        }
    }

    /// Runs `task` after `initial`, then every `period`. Late ticks are delayed, never bunched.
    pub fn schedule_periodically<F>(&self, initial: Duration, period: Duration, task: F) -> TaskHandle
    where F: Fn() + Send + Sync + 'static {
        let period = period.max(Duration::from_millis(1));
        match &self.0.kind {
            Kind::Pool { handle, .. } => {
                let join = handle.spawn(async move {
                    let mut ticker = time::interval_at(Instant::now() + initial, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        task();
                    }
                });
                TaskHandle::Abort(join.abort_handle())
            }
            Kind::Immediate => {
                let cancelled = Arc::new(AtomicBool::new(false));
                let flag = cancelled.clone();
                spawn_timer_thread(move || {
                    thread::sleep(initial);
                    while !flag.load(Ordering::Acquire) {
                        task();
                        thread::sleep(period);
                    }
                });
                TaskHandle::Flag(cancelled)
            }
        }
    }
}

fn shared(cell: &'static OnceLock<Scheduler>, config: fn() -> SchedulerConfig) -> Scheduler {
    cell.get_or_init(|| {
        let config = config();
        Scheduler::new(config).unwrap_or_else(|e| {
            error!("{e}; falling back to the immediate scheduler");
            Scheduler::immediate()
        })
    })
    .clone()
}

fn spawn_timer_thread(body: impl FnOnce() + Send + 'static) {
    if let Err(e) = thread::Builder::new().name("immediate-timer".into()).spawn(body) {
        error!("failed to spawn timer thread: {e}");
    }
}

/// Cancels a pending timed task
#[derive(Debug)]
pub enum TaskHandle {
    Abort(AbortHandle),
    Flag(Arc<AtomicBool>),
}

impl TaskHandle {
    pub fn cancel(&self) {
        match self {
            TaskHandle::Abort(handle) => handle.abort(),
            TaskHandle::Flag(flag) => flag.store(true, Ordering::Release),
        }
    }
}
