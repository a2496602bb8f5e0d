use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::models::interpolation::InterpolationModel;
use crate::models::radiation::CoordinateKey;

/// Short-lived store keyed by rounded coordinates.
#[async_trait]
pub trait ExactCache: Send + Sync {
    async fn get(&self, key: &CoordinateKey) -> Result<Option<Arc<InterpolationModel>>, CacheError>;

    async fn set(&self, key: CoordinateKey, model: Arc<InterpolationModel>, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn invalidate(&self, key: &CoordinateKey) -> Result<bool, CacheError>;

    /// Drops every expired entry and returns how many went.
    async fn evict_expired(&self) -> Result<usize, CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CoordinateKey,
    pub model: Arc<InterpolationModel>,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process exact cache with lazy expiry and a bounded entry count.
pub struct MemoryExactCache {
    entries: RwLock<HashMap<CoordinateKey, CacheEntry>>,
    capacity: usize,
}

fn poisoned() -> CacheError {
    CacheError::Unavailable("exact cache lock poisoned".into())
}

impl MemoryExactCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl ExactCache for MemoryExactCache {
    async fn get(&self, key: &CoordinateKey) -> Result<Option<Arc<InterpolationModel>>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().map_err(|_| poisoned())?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.model.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            tracing::debug!(%key, "exact cache entry expired");
        }
        Ok(None)
    }

    async fn set(&self, key: CoordinateKey, model: Arc<InterpolationModel>, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, e| !e.is_expired(now));
            if entries.len() >= self.capacity {
                let oldest = entries
                    .values()
                    .min_by_key(|e| e.expires_at)
                    .map(|e| e.key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    tracing::debug!(key = %oldest, "exact cache full, evicted oldest entry");
                }
            }
        }

        entries.insert(
            key.clone(),
            CacheEntry {
                key,
                model,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, key: &CoordinateKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    async fn evict_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }
}
