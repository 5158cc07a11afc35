//! TTL object cache
//!
//! Objects are keyed by their hierarchical path (`/namespaces/hr/services/payroll`),
//! independent of any backend's native key format. Next to the object an
//! adapter may keep vendor identities (`<path>/id`, `<path>/arn`), which live
//! much longer than object content.
//!
//! The map is split into shards, each with its own lock, so callers working
//! on different keys do not contend on a single lock.

use crate::model::{Object, ResourcePath};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Lifetime of identity entries, whatever the object TTL
pub const IDENTITY_TTL: Duration = Duration::from_secs(12 * 60 * 60);

const SHARD_COUNT: usize = 16;

/// Secondary identity stored under `<path>/<suffix>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Id,
    Arn,
}

impl IdentityKind {
    const ALL: [IdentityKind; 2] = [IdentityKind::Id, IdentityKind::Arn];

    fn suffix(self) -> &'static str {
        match self {
            IdentityKind::Id => "id",
            IdentityKind::Arn => "arn",
        }
    }
}

#[derive(Clone)]
enum CachedValue {
    Object(Object),
    Identity(String),
}

struct Entry {
    value: CachedValue,
    expires_at: Instant,
}

impl Entry {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

type Shard = RwLock<HashMap<String, Entry>>;

/// Shared, cheaply clonable cache handle
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    /// `None` disables caching entirely
    ttl: Option<Duration>,
    shards: Vec<Shard>,
}

impl Cache {
    /// Cache objects for `ttl`; a zero TTL disables caching
    pub fn new(ttl: Duration) -> Self {
        Self::with_ttl(Some(ttl).filter(|ttl| !ttl.is_zero()))
    }

    /// Pass-through mode: every lookup misses and nothing is stored
    pub fn disabled() -> Self {
        Self::with_ttl(None)
    }

    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        let shards = if ttl.is_some() {
            (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect()
        } else {
            Vec::new()
        };

        Self {
            inner: Arc::new(CacheInner { ttl, shards }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.ttl.is_some()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.inner.ttl
    }

    fn shard(&self, key: &str) -> Option<&Shard> {
        if self.inner.shards.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.inner.shards.len();
        self.inner.shards.get(index)
    }

    fn insert(&self, key: String, value: CachedValue, ttl: Duration) {
        let Some(shard) = self.shard(&key) else {
            return;
        };
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        shard
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    fn lookup(&self, key: &str) -> Option<CachedValue> {
        let shard = self.shard(key)?;

        {
            let entries = shard.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if entry.is_valid() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict unless someone refreshed it in the meantime
        let mut entries = shard.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| !entry.is_valid()) {
            entries.remove(key);
        }
        None
    }

    fn remove(&self, key: &str) {
        if let Some(shard) = self.shard(key) {
            shard
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
        }
    }

    /// Store an object under its path
    pub fn put(&self, path: &ResourcePath, object: Object) {
        if let Some(ttl) = self.inner.ttl {
            tracing::trace!("cache put {}", path);
            self.insert(path.to_string(), CachedValue::Object(object), ttl);
        }
    }

    pub fn get(&self, path: &ResourcePath) -> Option<Object> {
        match self.lookup(&path.to_string())? {
            CachedValue::Object(object) => {
                tracing::trace!("cache hit {}", path);
                Some(object)
            }
            CachedValue::Identity(_) => None,
        }
    }

    /// Drop the object entry only; identities are kept
    pub fn delete(&self, path: &ResourcePath) {
        self.remove(&path.to_string());
    }

    pub fn put_identity(&self, path: &ResourcePath, kind: IdentityKind, value: impl Into<String>) {
        if self.is_enabled() {
            let key = format!("{}/{}", path, kind.suffix());
            self.insert(key, CachedValue::Identity(value.into()), IDENTITY_TTL);
        }
    }

    pub fn identity(&self, path: &ResourcePath, kind: IdentityKind) -> Option<String> {
        match self.lookup(&format!("{}/{}", path, kind.suffix()))? {
            CachedValue::Identity(value) => Some(value),
            CachedValue::Object(_) => None,
        }
    }

    /// Drop the object and every identity stored for `path`
    pub fn invalidate(&self, path: &ResourcePath) {
        let key = path.to_string();
        for kind in IdentityKind::ALL {
            self.remove(&format!("{}/{}", key, kind.suffix()));
        }
        self.remove(&key);
    }

    /// Drop everything at or below `path`
    pub fn invalidate_prefix(&self, path: &ResourcePath) {
        let key = path.to_string();
        let below = format!("{}/", key);
        for shard in &self.inner.shards {
            shard
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|k, _| k != &key && !k.starts_with(&below));
        }
    }

    /// Evict expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        for shard in &self.inner.shards {
            let mut entries = shard.write().unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            entries.retain(|_, entry| entry.is_valid());
            removed += before - entries.len();
        }
        removed
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("ttl", &self.inner.ttl)
            .field("entries", &self.len())
            .finish()
    }
}
