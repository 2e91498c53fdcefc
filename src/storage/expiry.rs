//! Key Expiry Management
//!
//! Keys with an expiry are removed in two ways:
//!
//! 1. **Passive**: every command that touches an existing key first calls
//!    [`ExpiryManager::check_and_remove_if_expired`], so a client never
//!    observes a value past its deadline.
//! 2. **Active**: a background task samples random keys on a fixed interval
//!    and removes the expired ones. Without it a key that expires and is
//!    never read again would stay in memory forever.
//!
//! ## Active cycle
//!
//! ```text
//!        ┌──────────── wait interval (or stop) ◄───────────┐
//!        ▼                                                  │
//!  snapshot keys ── empty ──────────────────────────────────┤
//!        │                                                  │
//!  sample min(20, n) keys, passive-check each               │
//!        │                                                  │
//!  removed / sampled > 25% ? ── no ─────────────────────────┘
//!        │ yes
//!        └── stop requested? ── no ──► sample again immediately
//! ```
//!
//! A cycle never awaits, so it runs to completion once started. The stop
//! signal is observed at the interval wait and between repeated samples,
//! which bounds how long [`ExpiryManager::stop`] can take even when every
//! sampled key is expired.

use crate::storage::StorageEngine;
use rand::seq::IteratorRandom;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Maximum number of keys sampled in one pass
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// Fraction of sampled keys that must be expired to sample again at once
pub const DEFAULT_THRESHOLD: f64 = 0.25;

/// What TTL reports for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    NoExpiry,
    Remaining(u64),
}

/// Configuration for the active expiry loop.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Wait between cycles (default: 1s)
    pub interval: Duration,

    /// Keys sampled per pass (default: 20)
    pub sample_size: usize,

    /// If more than this fraction of a sample was expired, sample again
    /// without waiting (default: 0.25)
    pub threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            sample_size: DEFAULT_SAMPLE_SIZE,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryError {
    #[error("active expiry is already running")]
    AlreadyRunning,
}

/// Handle on the spawned active expiry task.
#[derive(Debug)]
struct ActiveTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns passive checks and the active expiry task for one store.
#[derive(Debug)]
pub struct ExpiryManager {
    storage: Arc<StorageEngine>,
    config: ExpiryConfig,
    task: Mutex<Option<ActiveTask>>,
}

impl ExpiryManager {
    /// Creates a manager with the default configuration.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self::with_config(storage, ExpiryConfig::default())
    }

    pub fn with_config(storage: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        Self {
            storage,
            config,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ExpiryConfig {
        &self.config
    }

    /// Passive expiry: removes `key` if its deadline has passed.
    ///
    /// Returns `true` only if this call removed the key. Keys without an
    /// expiry, live keys and absent keys all return `false`.
    pub fn check_and_remove_if_expired(&self, key: &[u8]) -> bool {
        expire_if_due(&self.storage, key)
    }

    /// Sets the key to expire `seconds` from now. Returns `false` if the key
    /// does not exist.
    pub fn set_expiry_in(&self, key: &[u8], seconds: u64) -> bool {
        let deadline = unix_now().saturating_add(seconds);
        self.storage.set_expiry(key, deadline)
    }

    /// Expiry state of `key`, read in one lookup. Remaining time is in
    /// whole seconds, rounded down and never negative.
    pub fn remaining_ttl(&self, key: &[u8]) -> KeyTtl {
        match self.storage.get_entry(key) {
            None => KeyTtl::Missing,
            Some(entry) => match entry.expires_at {
                None => KeyTtl::NoExpiry,
                Some(deadline) => KeyTtl::Remaining(seconds_until(deadline)),
            },
        }
    }

    /// Runs one active cycle on the calling thread and returns the number
    /// of keys removed.
    pub fn run_cycle(&self) -> usize {
        run_cycle(&self.storage, &self.config, None)
    }

    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }

    /// Starts the active expiry task on the current Tokio runtime.
    ///
    /// Returns immediately; the loop runs until [`stop`](Self::stop).
    pub fn start(&self) -> Result<(), ExpiryError> {
        self.start_with(|storage, config, shutdown| run_cycle(storage, config, Some(shutdown)))
    }

    fn start_with<F>(&self, cycle: F) -> Result<(), ExpiryError>
    where
        F: Fn(&StorageEngine, &ExpiryConfig, &watch::Receiver<bool>) -> usize + Send + 'static,
    {
        let mut task = self.lock_task();
        if task.is_some() {
            return Err(ExpiryError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(active_expiry_loop(
            Arc::clone(&self.storage),
            self.config.clone(),
            shutdown_rx,
            cycle,
        ));

        *task = Some(ActiveTask {
            shutdown_tx,
            handle,
        });

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            sample_size = self.config.sample_size,
            "Active expiry started"
        );
        Ok(())
    }

    /// Stops the active expiry task and waits until it has exited.
    ///
    /// Does nothing if the task is not running.
    pub async fn stop(&self) {
        let task = self.lock_task().take();
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown_tx.send(true);
        if let Err(e) = task.handle.await {
            error!(error = %e, "Active expiry task ended abnormally");
        }

        info!("Active expiry stopped");
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<ActiveTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ExpiryManager {
    fn drop(&mut self) {
        if let Some(task) = self.lock_task().take() {
            let _ = task.shutdown_tx.send(true);
        }
    }
}

/// Current time as whole unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Whole seconds from now until `deadline`, zero once it has passed.
fn seconds_until(deadline: u64) -> u64 {
    deadline.saturating_sub(unix_now())
}

fn expire_if_due(storage: &StorageEngine, key: &[u8]) -> bool {
    // Most keys never get an expiry; skip the write lock for them.
    if storage.get_expiry(key).is_none() {
        return false;
    }

    let removed = storage.remove_if_expired(key, unix_now());
    if removed {
        trace!(key = %String::from_utf8_lossy(key), "Expired key removed");
    }
    removed
}

/// The active expiry loop. `cycle` runs once per interval; a panic inside
/// it is logged and the loop carries on.
async fn active_expiry_loop<F>(
    storage: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    cycle: F,
) where
    F: Fn(&StorageEngine, &ExpiryConfig, &watch::Receiver<bool>) -> usize,
{
    debug!("Active expiry task running");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }

        if *shutdown_rx.borrow() {
            break;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            cycle(&storage, &config, &shutdown_rx)
        }));

        match outcome {
            Ok(0) => {}
            Ok(removed) => debug!(
                removed = removed,
                keys_remaining = storage.len(),
                "Active expiry cycle removed keys"
            ),
            Err(_) => error!("Active expiry cycle panicked, continuing with next cycle"),
        }
    }

    debug!("Active expiry task exiting");
}

/// One active cycle, including immediate repeats while the hit rate stays
/// above the threshold.
fn run_cycle(
    storage: &StorageEngine,
    config: &ExpiryConfig,
    shutdown: Option<&watch::Receiver<bool>>,
) -> usize {
    let mut rng = rand::rng();
    let mut total_removed = 0;

    loop {
        let keys = storage.all_keys();
        let sample = keys.into_iter().choose_multiple(&mut rng, config.sample_size);
        if sample.is_empty() {
            break;
        }

        let removed = sample
            .iter()
            .filter(|key| expire_if_due(storage, key))
            .count();
        total_removed += removed;

        let deletion_rate = removed as f64 / sample.len() as f64;
        trace!(
            sampled = sample.len(),
            removed = removed,
            rate = %format!("{:.2}%", deletion_rate * 100.0),
            "Active expiry sample"
        );

        if deletion_rate <= config.threshold {
            break;
        }
        if shutdown.is_some_and(|rx| *rx.borrow()) {
            break;
        }
    }

    total_removed
}
