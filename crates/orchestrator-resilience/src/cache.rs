//! Fingerprint-keyed response cache with TTL expiry.
//!
//! Entries are immutable once written. Concurrent writers for the same
//! fingerprint may race; last write wins, which is harmless because content
//! is deterministic for identical fingerprints.

use dashmap::DashMap;
use orchestrator_core::{Fingerprint, GenerationResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Response cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether lookups and writes are active.
    pub enabled: bool,
    /// TTL applied when the provider declares none.
    pub default_ttl: Duration,
    /// Capacity bound; writes beyond it evict the soonest-expiring entry.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

struct CacheEntry {
    response: GenerationResponse,
    expires_at: Instant,
}

/// In-memory response cache keyed by request fingerprint.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Look up a response by fingerprint. Expired entries are removed lazily.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<GenerationResponse> {
        if !self.config.enabled {
            return None;
        }

        let key = fingerprint.as_str();
        let found = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.response.clone())
            } else {
                None
            }
        });

        match found {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(response)
            }
            None => {
                // Drop the expired entry if that is what we found.
                self.entries
                    .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a response under its fingerprint.
    ///
    /// `ttl` is the provider-declared lifetime; `None` applies the default.
    pub fn insert(
        &self,
        fingerprint: &Fingerprint,
        response: GenerationResponse,
        ttl: Option<Duration>,
    ) {
        if !self.config.enabled {
            return;
        }

        if self.entries.len() >= self.config.max_entries {
            self.evict_one();
        }

        let ttl = ttl.unwrap_or(self.config.default_ttl);
        debug!(fingerprint = %fingerprint, ttl_secs = ttl.as_secs(), "caching response");
        self.entries.insert(
            fingerprint.as_str().to_string(),
            CacheEntry {
                response,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove expired entries; if none were expired, drop the entry closest
    /// to expiry to make room.
    fn evict_one(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        if self.entries.len() < before {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    /// Number of live entries (including not-yet-swept expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hit/miss statistics since startup.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    /// Lookups served from cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Current entry count.
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served from cache.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
