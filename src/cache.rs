//! Opaque-key cache for encoded payloads.
//!
//! A miss is not an error: callers read the key itself as the payload.
//! Entries are evicted least-recently-used first once `max_entries` is
//! exceeded, and dropped once unused for longer than `max_idle`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::CacheBackendError;

/// Default LRU capacity; large enough to never matter for a single wiki.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000_000;
/// Default idle time after which an entry expires
pub const DEFAULT_MAX_IDLE_SECS: u64 = 3600;
/// Highest numeric suffix tried when the cache id is already taken
pub const MAX_CACHE_ID_SUFFIX: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Namespace of the cache identifier, e.g. "livetab" gives "livetab.cache"
    pub namespace: String,
    pub max_entries: usize,
    pub max_idle: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: crate::APP_NAME.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_idle: Duration::from_secs(DEFAULT_MAX_IDLE_SECS),
        }
    }
}

impl CacheSettings {
    /// Cache identifier for an initialization attempt: `<ns>.cache`, then `<ns>.cache.<n>`.
    pub fn cache_id(&self, attempt: usize) -> String {
        if attempt == 0 {
            format!("{}.cache", self.namespace)
        } else {
            format!("{}.cache.{}", self.namespace, attempt)
        }
    }
}

struct Slot {
    value: Arc<str>,
    last_access: Instant,
}

/// Bounded, expiring, thread-safe map from opaque keys to payloads.
pub struct PayloadCache {
    id: String,
    max_entries: usize,
    max_idle: Duration,
    entries: Mutex<LruCache<String, Slot>>,
}

impl PayloadCache {
    pub fn new(id: impl Into<String>, settings: &CacheSettings) -> Self {
        Self {
            id: id.into(),
            max_entries: settings.max_entries.max(1),
            max_idle: settings.max_idle,
            // Capacity is enforced on insert; `LruCache::new` would preallocate it.
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // A panic while holding the lock cannot leave the map half-updated in a
    // way that matters for a best-effort cache, so keep serving it.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, slot: &Slot, now: Instant) -> bool {
        now.saturating_duration_since(slot.last_access) > self.max_idle
    }

    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        let now = Instant::now();
        let mut entries = self.lock();
        let slot = entries.get_mut(key)?;
        if self.is_expired(slot, now) {
            entries.pop(key);
            debug!(cache = %self.id, "cache entry expired");
            return None;
        }
        slot.last_access = now;
        Some(Arc::clone(&slot.value))
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<Arc<str>>) {
        let now = Instant::now();
        let mut entries = self.lock();
        self.purge_locked(&mut entries, now);
        entries.put(
            key.into(),
            Slot {
                value: value.into(),
                last_access: now,
            },
        );
        while entries.len() > self.max_entries {
            entries.pop_lru();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry idle for longer than `max_idle`. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        self.purge_locked(&mut entries, Instant::now())
    }

    // Recency order is access order, so expired entries sit at the LRU end.
    fn purge_locked(&self, entries: &mut LruCache<String, Slot>, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((_, slot)) = entries.peek_lru() {
            if !self.is_expired(slot, now) {
                break;
            }
            entries.pop_lru();
            purged += 1;
        }
        if purged > 0 {
            debug!(cache = %self.id, purged, "purged expired cache entries");
        }
        purged
    }
}

/// Creates named caches. Creation fails when the identifier is taken.
pub trait CacheBackend {
    fn create_cache(
        &self,
        id: &str,
        settings: &CacheSettings,
    ) -> Result<Arc<PayloadCache>, CacheBackendError>;
}

/// In-process cache backend keeping every created cache by identifier.
#[derive(Default)]
pub struct CacheRegistry {
    caches: Mutex<HashMap<String, Arc<PayloadCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<PayloadCache>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheBackend for CacheRegistry {
    fn create_cache(
        &self,
        id: &str,
        settings: &CacheSettings,
    ) -> Result<Arc<PayloadCache>, CacheBackendError> {
        let mut caches = self.lock();
        if caches.contains_key(id) {
            return Err(CacheBackendError::AlreadyExists { id: id.to_string() });
        }
        let cache = Arc::new(PayloadCache::new(id, settings));
        caches.insert(id.to_string(), Arc::clone(&cache));
        Ok(cache)
    }
}

/// Create the payload cache, retrying with `.1`, `.2`, ... suffixes up to
/// [`MAX_CACHE_ID_SUFFIX`] when creation fails.
pub fn init_cache(
    backend: &dyn CacheBackend,
    settings: &CacheSettings,
) -> Result<Arc<PayloadCache>, CacheBackendError> {
    let mut last_error = None;
    for attempt in 0..=MAX_CACHE_ID_SUFFIX {
        let id = settings.cache_id(attempt);
        debug!(%id, attempt, "creating payload cache");
        match backend.create_cache(&id, settings) {
            Ok(cache) => {
                info!(
                    %id,
                    max_entries = settings.max_entries,
                    max_idle_secs = settings.max_idle.as_secs(),
                    "payload cache ready"
                );
                return Ok(cache);
            }
            Err(e) => {
                debug!(%id, error = %e, "failed to create payload cache");
                last_error = Some(e);
            }
        }
    }
    Err(CacheBackendError::Exhausted {
        base_id: settings.cache_id(0),
        attempts: MAX_CACHE_ID_SUFFIX + 1,
        last: Box::new(last_error.unwrap_or(CacheBackendError::Unavailable {
            reason: "no attempt made".to_string(),
        })),
    })
}

/// Bytes of the SHA-256 digest kept in a payload key
const KEY_DIGEST_BYTES: usize = 12;

/// Short opaque key for a payload: a truncated SHA-256 digest, base64url encoded.
pub fn payload_key(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..KEY_DIGEST_BYTES])
}
