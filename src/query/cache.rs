//! Two-tier semantic cache: exact query-text match plus a fingerprint
//! match that's insensitive to literal values, both with TTL eviction
//! on top of an LRU capacity bound.
//!
//! Grounded on the `LruCache<NodeId, Node>`/`LruCache<EdgeId, Edge>`
//! pattern in the graph database core, generalized to a
//! string-keyed, TTL-aware cache shared by concurrent readers behind a
//! mutex.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

struct Tier {
    lru: LruCache<String, CacheEntry>,
    ttl: Duration,
}

impl Tier {
    fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self { lru: LruCache::new(capacity), ttl }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        let expired = match self.lru.peek(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            self.lru.pop(key);
            return None;
        }
        self.lru.get(key).map(|e| e.value.clone())
    }

    fn put(&mut self, key: String, value: String) {
        self.lru.put(key, CacheEntry { value, inserted_at: Instant::now() });
    }

    fn invalidate_all(&mut self) {
        self.lru.clear();
    }

    fn len(&self) -> usize {
        self.lru.len()
    }
}

/// Derives a fingerprint from a query string by stripping anything that
/// looks like a literal (quoted strings, bare numbers), so two queries
/// that differ only in their literal values share a cache entry.
pub fn fingerprint(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            out.push('?');
            while let Some(&next) = chars.peek() {
                chars.next();
                if next == c {
                    break;
                }
            }
        } else if c.is_ascii_digit() {
            out.push('#');
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit() || *d == '.') {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub exact_hits: u64,
    pub fingerprint_hits: u64,
    pub misses: u64,
    pub exact_entries: usize,
    pub fingerprint_entries: usize,
}

struct Inner {
    exact: Tier,
    fingerprint: Tier,
    stats: CacheStats,
}

/// A thread-safe cache mapping a query (and its value-stripped
/// fingerprint) to a serialized result, matching
/// [`crate::engine::CacheOptions`]'s `enable_exact_match`/
/// `enable_similarity_match` toggles.
pub struct SemanticCache {
    inner: Mutex<Inner>,
    enable_exact: bool,
    enable_fingerprint: bool,
}

impl SemanticCache {
    pub fn new(max_entries: usize, ttl_seconds: u64, enable_exact: bool, enable_fingerprint: bool) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        let ttl = Duration::from_secs(ttl_seconds);
        Self {
            inner: Mutex::new(Inner {
                exact: Tier::new(capacity, ttl),
                fingerprint: Tier::new(capacity, ttl),
                stats: CacheStats::default(),
            }),
            enable_exact,
            enable_fingerprint,
        }
    }

    /// Looks up `query` first by exact text, then by fingerprint.
    pub fn get(&self, query: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        if self.enable_exact {
            if let Some(v) = inner.exact.get(query) {
                inner.stats.exact_hits += 1;
                return Some(v);
            }
        }
        if self.enable_fingerprint {
            let fp = fingerprint(query);
            if let Some(v) = inner.fingerprint.get(&fp) {
                inner.stats.fingerprint_hits += 1;
                return Some(v);
            }
        }
        inner.stats.misses += 1;
        None
    }

    pub fn put(&self, query: &str, result: String) {
        let mut inner = self.inner.lock().unwrap();
        if self.enable_exact {
            inner.exact.put(query.to_string(), result.clone());
        }
        if self.enable_fingerprint {
            let fp = fingerprint(query);
            inner.fingerprint.put(fp, result);
        }
    }

    /// Drops every cached entry, e.g. after a mutation that could have
    /// invalidated cached reads.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.exact.invalidate_all();
        inner.fingerprint.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            exact_entries: inner.exact.len(),
            fingerprint_entries: inner.fingerprint.len(),
            ..inner.stats
        }
    }
}
