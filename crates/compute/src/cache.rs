//! Boundary cache of loaded entry sets.
//!
//! The engine itself never loads anything; callers fetch entries through an
//! [`EntryLoader`] and may wrap it in an [`EntryCache`] to avoid reloading a
//! source on every request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use canon_core::config::CacheConfig;
use canon_core::{EngineError, Entry, Result};

/// Produces the full entry set for an opaque source id (a path, a URL, ...).
pub trait EntryLoader: Send + Sync {
    fn load(&self, source: &str) -> Result<Vec<Entry>>;
}

struct CachedEntries {
    entries: Vec<Entry>,
    loaded_at: Instant,
}

/// Per-source entry cache with a staleness threshold.
///
/// Reads return a copy, so callers are free to mutate what they get. The lock
/// is held while loading, so concurrent requests for a cold source load it once.
pub struct EntryCache<L> {
    loader: L,
    staleness: Duration,
    slots: Mutex<HashMap<String, CachedEntries>>,
}

impl<L: EntryLoader> EntryCache<L> {
    pub fn new(loader: L, config: &CacheConfig) -> Self {
        Self::with_staleness(loader, Duration::from_secs(config.staleness_secs))
    }

    pub fn with_staleness(loader: L, staleness: Duration) -> Self {
        Self {
            loader,
            staleness,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CachedEntries>>> {
        self.slots
            .lock()
            .map_err(|e| EngineError::LockPoisoned(format!("entry cache: {}", e)))
    }

    /// Entries for `source`, loading when absent, stale or `force_reload` is set.
    pub fn get(&self, source: &str, force_reload: bool) -> Result<Vec<Entry>> {
        let mut slots = self.lock()?;

        if !force_reload {
            if let Some(cached) = slots.get(source) {
                if cached.loaded_at.elapsed() < self.staleness {
                    debug!(source, entries = cached.entries.len(), "Using cached entries");
                    return Ok(cached.entries.clone());
                }
            }
        }

        let start = Instant::now();
        let entries = self.loader.load(source)?;
        info!(
            source,
            entries = entries.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Loaded entries into cache"
        );
        slots.insert(
            source.to_string(),
            CachedEntries {
                entries: entries.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(entries)
    }

    /// Whether `source` is cached and still fresh.
    pub fn is_cached(&self, source: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .get(source)
            .is_some_and(|c| c.loaded_at.elapsed() < self.staleness))
    }

    /// Drop one source. Returns whether it was cached.
    pub fn invalidate(&self, source: &str) -> Result<bool> {
        let removed = self.lock()?.remove(source).is_some();
        if removed {
            info!(source, "Cache entry invalidated");
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        info!("Cache cleared");
        Ok(())
    }
}
