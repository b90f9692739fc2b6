//! Decides where the synchronous part of the chain runs.
//!
//! Inline execution keeps everything on the task that accepted the request.
//! The pooled variant owns a dedicated runtime: chain stages run on its
//! blocking threads (at most `max_threads` at once), completion tasks on its
//! `core_threads` async workers. Admission is bounded by a semaphore holding
//! `max_threads + queue_capacity` permits, so an overloaded pool rejects new
//! work immediately instead of queueing it without limit.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tokio::{
    runtime::{Builder, Handle, Runtime},
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError},
};

use crate::config::models::WorkerPoolConfig;

const THREAD_NAME: &str = "rpcgate-biz";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PoolError {
    /// Every worker is busy and the queue is full
    #[error("worker pool saturated ({capacity} tasks admitted)")]
    Saturated { capacity: usize },

    /// The pool no longer accepts work
    #[error("worker pool is shut down")]
    Shutdown,

    /// The pool settings are unusable
    #[error("invalid worker pool settings: {0}")]
    InvalidConfig(String),

    /// The runtime backing the pool could not be started
    #[error("failed to start worker pool: {0}")]
    Start(String),
}

/// Bounded pool of business threads.
#[derive(Debug)]
pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> Result<Self, PoolError> {
        if config.core_threads == 0 || config.max_threads < config.core_threads {
            return Err(PoolError::InvalidConfig(format!(
                "core_threads={} max_threads={}",
                config.core_threads, config.max_threads
            )));
        }
        let keep_alive = config
            .keep_alive_duration()
            .map_err(|e| PoolError::InvalidConfig(format!("keep_alive: {e}")))?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.core_threads)
            .max_blocking_threads(config.max_threads)
            .thread_keep_alive(keep_alive)
            .thread_name(THREAD_NAME)
            .enable_all()
            .build()
            .map_err(|e| PoolError::Start(e.to_string()))?;

        let capacity = config.max_threads + config.queue_capacity;
        tracing::info!(
            "Worker pool started: core={}, max={}, queue={}, keep_alive={:?}",
            config.core_threads,
            config.max_threads,
            config.queue_capacity,
            keep_alive
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Claim a slot without waiting.
    pub fn try_reserve(&self) -> Result<Reservation, PoolError> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(Reservation {
                permit,
                handle: self.handle.clone(),
            }),
            Err(TryAcquireError::NoPermits) => Err(PoolError::Saturated {
                capacity: self.capacity,
            }),
            Err(TryAcquireError::Closed) => Err(PoolError::Shutdown),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop admitting work and let the runtime wind down in the background.
    pub fn shutdown(&self) {
        self.permits.close();
        let runtime = match self.runtime.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
            tracing::info!("Worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An admitted slot in the pool. Released when the submitted task returns.
#[derive(Debug)]
pub struct Reservation {
    permit: OwnedSemaphorePermit,
    handle: Handle,
}

impl Reservation {
    pub fn execute<F>(self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = self.permit;
        self.handle.spawn_blocking(move || {
            run_guarded(task);
            drop(permit);
        });
    }
}

/// Where chain execution happens.
#[derive(Debug)]
pub enum Isolation {
    Inline,
    Pool(WorkerPool),
}

/// Permission to run one unit of chain work.
#[derive(Debug)]
pub enum Admission {
    Inline,
    Pooled(Reservation),
}

impl Admission {
    pub fn run<F>(self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Admission::Inline => run_guarded(task),
            Admission::Pooled(reservation) => reservation.execute(task),
        }
    }
}

/// Run `task`, containing any panic. State owned by the task is dropped
/// during the unwind, so a pending response writer still answers.
fn run_guarded<F: FnOnce()>(task: F) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = panic
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        tracing::error!(panic = message, "Filter chain panicked");
    }
}

impl Isolation {
    /// `None` or `core_threads = 0` selects inline execution.
    pub fn from_config(config: Option<&WorkerPoolConfig>) -> Result<Self, PoolError> {
        match config {
            Some(pool) if pool.core_threads > 0 => Ok(Isolation::Pool(WorkerPool::new(pool)?)),
            _ => {
                tracing::info!("Worker pool disabled, filters run inline");
                Ok(Isolation::Inline)
            }
        }
    }

    pub fn admit(&self) -> Result<Admission, PoolError> {
        match self {
            Isolation::Inline => Ok(Admission::Inline),
            Isolation::Pool(pool) => pool.try_reserve().map(Admission::Pooled),
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, Isolation::Pool(_))
    }

    pub fn shutdown(&self) {
        if let Isolation::Pool(pool) = self {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    use super::*;

    fn pool_config(core: usize, max: usize, queue: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            core_threads: core,
            max_threads: max,
            keep_alive: "1s".to_string(),
            queue_capacity: queue,
        }
    }

    #[test]
    fn test_zero_core_threads_is_inline() {
        let isolation = Isolation::from_config(Some(&pool_config(0, 4, 4))).unwrap();
        assert!(!isolation.is_pooled());
        assert!(matches!(isolation.admit(), Ok(Admission::Inline)));
        assert!(!Isolation::from_config(None).unwrap().is_pooled());
    }

    #[test]
    fn test_inline_runs_on_caller() {
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        Isolation::Inline
            .admit()
            .unwrap()
            .run(move || tx.send(std::thread::current().id()).unwrap());
        assert_eq!(rx.recv().unwrap(), caller);
    }

    struct SignalOnDrop(mpsc::Sender<&'static str>);

    impl Drop for SignalOnDrop {
        fn drop(&mut self) {
            let _ = self.0.send("dropped");
        }
    }

    #[test]
    fn test_inline_panic_is_contained() {
        let (tx, rx) = mpsc::channel();
        let owned = SignalOnDrop(tx);
        Isolation::Inline.admit().unwrap().run(move || {
            let _owned = owned;
            panic!("filter blew up");
        });
        assert_eq!(rx.recv().unwrap(), "dropped");
    }

    #[test]
    fn test_pooled_panic_releases_permit() {
        let pool = WorkerPool::new(&pool_config(1, 1, 0)).unwrap();
        let (tx, rx) = mpsc::channel();
        let owned = SignalOnDrop(tx);
        pool.try_reserve().unwrap().execute(move || {
            let _owned = owned;
            panic!("filter blew up");
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "dropped");

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.available() < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(pool.try_reserve().is_ok());
    }

    #[test]
    fn test_pool_runs_on_named_threads() {
        let pool = WorkerPool::new(&pool_config(1, 2, 0)).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.try_reserve()
            .unwrap()
            .execute(move || tx.send(std::thread::current().name().map(str::to_string)).unwrap());

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some(THREAD_NAME));
    }

    #[test]
    fn test_saturated_pool_rejects() {
        let pool = WorkerPool::new(&pool_config(1, 1, 1)).unwrap();
        assert_eq!(pool.capacity(), 2);

        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..2 {
            let release = release_rx.clone();
            let done = done_tx.clone();
            pool.try_reserve().unwrap().execute(move || {
                let _ = release.lock().unwrap().recv();
                let _ = done.send(());
            });
        }

        assert_eq!(
            pool.try_reserve().unwrap_err(),
            PoolError::Saturated { capacity: 2 }
        );

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        for _ in 0..2 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.available() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(pool.try_reserve().is_ok());
    }

    #[test]
    fn test_shutdown_stops_admission() {
        let pool = WorkerPool::new(&pool_config(1, 1, 0)).unwrap();
        pool.shutdown();
        assert_eq!(pool.try_reserve().unwrap_err(), PoolError::Shutdown);
        pool.shutdown();
    }

    #[test]
    fn test_invalid_sizes_are_rejected() {
        assert!(matches!(
            WorkerPool::new(&pool_config(4, 2, 0)),
            Err(PoolError::InvalidConfig(_))
        ));
    }
}
