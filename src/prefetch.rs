//! Background refilling of a cipher storage's prefetch queue

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CryptError, ErrorCategory, ErrorKind, Result};
use crate::storage::CipherStorage;

/// How many entries the worker keeps ready.
pub const DEFAULT_DEPTH: usize = 4;

/// Upper bound on how long the worker sleeps between queue checks.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchConfig {
    /// Target number of ready entries; must be at least 1.
    pub depth: usize,
    pub idle_interval: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}

impl PrefetchConfig {
    fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(CryptError::with_kind(
                ErrorCategory::User,
                ErrorKind::Configuration,
                "prefetch depth must be at least 1",
            ));
        }
        if self.idle_interval.is_zero() {
            return Err(CryptError::with_kind(
                ErrorCategory::User,
                ErrorKind::Configuration,
                "prefetch idle interval must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Handle to a running prefetch worker. Dropping it stops the worker.
#[derive(Debug)]
pub struct Prefetcher {
    storage: Arc<CipherStorage>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Prefetcher {
    /// Whether the worker thread has exited, either stopped or failed.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the worker and wait for it.
    ///
    /// Returns the error that ended the worker early, if any. A derivation
    /// already in progress is allowed to finish first.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Release);
        self.storage.wake_waiters();
        handle.join().map_err(|_| {
            CryptError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "prefetch worker panicked",
            )
        })?
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "prefetch worker ended with an error");
        }
    }
}

impl CipherStorage {
    /// Start a worker thread that keeps `config.depth` entries ready.
    ///
    /// The worker calls [`CipherStorage::create_cipher`] whenever the queue
    /// is below depth and otherwise sleeps until an entry is popped. If a
    /// derivation fails the worker logs the error and exits; the error is
    /// returned from [`Prefetcher::stop`].
    pub fn spawn_prefetcher(self: &Arc<Self>, config: PrefetchConfig) -> Result<Prefetcher> {
        config.validate()?;

        let stop = Arc::new(AtomicBool::new(false));
        let storage = Arc::clone(self);
        let worker_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("simplecrypt-prefetch".into())
            .spawn(move || run(&storage, &config, &worker_stop))
            .map_err(|e| {
                CryptError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to spawn prefetch worker",
                    e,
                )
            })?;

        debug!(depth = config.depth, "prefetch worker started");
        Ok(Prefetcher {
            storage: Arc::clone(self),
            stop,
            handle: Some(handle),
        })
    }
}

fn run(storage: &CipherStorage, config: &PrefetchConfig, stop: &AtomicBool) -> Result<()> {
    while storage.wait_for_demand(config.depth, stop, config.idle_interval) {
        if let Err(e) = storage.create_cipher() {
            warn!(error = %e, "prefetch worker stopping after failed derivation");
            return Err(e);
        }
    }
    debug!("prefetch worker stopped");
    Ok(())
}
