//! Remote actor caching
//!
//! Caches fetched Person documents to reduce remote requests. The cache is
//! lossy and race-tolerant: concurrent fetches may both populate an entry
//! and the last writer wins.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::types::Person;

/// Cached Person entry
#[derive(Debug, Clone)]
struct CachedPerson {
    person: Person,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedPerson {
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Process-local Person cache keyed by actor URL.
pub struct PersonCache {
    cache: RwLock<HashMap<String, CachedPerson>>,
    default_ttl: Duration,
}

impl PersonCache {
    /// Create new cache; `ttl` defaults to 1800 seconds.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            default_ttl: ttl.unwrap_or(Duration::from_secs(1800)),
        }
    }

    /// Look up a cached Person, ignoring expired entries.
    pub async fn get(&self, actor_url: &str) -> Option<Person> {
        let cache = self.cache.read().await;
        cache
            .get(actor_url)
            .filter(|cached| cached.is_valid())
            .map(|cached| cached.person.clone())
    }

    /// Insert or refresh an entry.
    pub async fn insert(&self, actor_url: &str, person: Person) {
        let mut cache = self.cache.write().await;
        cache.insert(
            actor_url.to_string(),
            CachedPerson {
                person,
                cached_at: Instant::now(),
                ttl: self.default_ttl,
            },
        );
    }

    /// Drop expired entries.
    pub async fn prune_expired(&self) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, cached| cached.is_valid());
    }
}
