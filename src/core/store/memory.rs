//! In-memory key-value store
//!
//! Backed by a [`DashMap`] of values with absolute expiry instants. Expired entries are
//! invisible to reads immediately; a background sweeper started by `open` reclaims
//! their memory every `sweep_interval`.
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive it with a paused clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{KeyValueStore, StoreError, StoreResult};

/// Default sweep interval for expired entries
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

struct Sweeper {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

/// TTL-aware in-process store
pub struct InMemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    open: AtomicBool,
    sweep_interval: Duration,
    sweeper: Mutex<Option<Sweeper>>,
}

impl InMemoryStore {
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            open: AtomicBool::new(false),
            sweep_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Number of entries still held, including expired ones not yet swept
    pub fn raw_len(&self) -> usize {
        self.entries.len()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store is closed".to_string()))
        }
    }

    fn sweep(entries: &DashMap<String, Entry>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(entries.len())
    }

    async fn sweep_loop(
        entries: Arc<DashMap<String, Entry>>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    return;
                }
            }

            let removed = Self::sweep(&entries);
            if removed > 0 {
                tracing::trace!(removed, "swept expired store entries");
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn open(&self) -> StoreResult<()> {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() {
            let (shutdown_tx, shutdown_rx) = watch::channel(());
            let handle = tokio::spawn(Self::sweep_loop(
                self.entries.clone(),
                self.sweep_interval,
                shutdown_rx,
            ));
            *sweeper = Some(Sweeper {
                shutdown_tx,
                handle,
            });
        }
        self.open.store(true, Ordering::Release);
        tracing::debug!(sweep_interval = ?self.sweep_interval, "in-memory store opened");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.open.store(false, Ordering::Release);
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            let _ = sweeper.shutdown_tx.send(());
            if let Err(err) = sweeper.handle.await {
                tracing::warn!(error = %err, "store sweeper ended abnormally");
            }
        }
        tracing::debug!("in-memory store closed");
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        let now = Instant::now();

        let lookup = self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| !entry.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.ensure_open()?;
        if ttl.is_zero() {
            return Err(StoreError::InvalidTtl);
        }

        let expires_at = Instant::now() + ttl;
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, entry| entry.is_live(now) && entry.value == expected)
            .is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let now = Instant::now();

        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();

        Ok(keys
            .into_iter()
            .filter_map(|key| {
                self.entries
                    .remove(&key)
                    .filter(|(_, entry)| entry.is_live(now))
                    .map(|(key, _)| key)
            })
            .collect())
    }
}
