//! Duplicate message detection with content fingerprints and a temporal
//! window.
//!
//! Chat transports re-deliver webhooks and LLMs occasionally repeat
//! themselves; collapsing near-identical messages at the pipeline edges
//! keeps the conversation log clean. Fingerprints live only in memory.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use alyn_core::types::Role;

/// Fingerprint of a previously seen message.
#[derive(Debug, Clone)]
struct MessageFingerprint {
    seen_at: Instant,
    role: Role,
    /// Leading slice of the normalized content, kept for log output.
    preview: String,
}

/// LRU cache of recent message fingerprints keyed by content hash.
///
/// Ages are measured against the monotonic clock; wall-clock time never
/// enters the duplicate decision.
pub struct DuplicateDetector {
    cache_size: usize,
    window: Duration,
    min_content_len: usize,
    cache: HashMap<String, MessageFingerprint>,
    /// Access order, least recent first.
    order: Vec<String>,
}

impl DuplicateDetector {
    pub fn new(cache_size: usize, window: Duration) -> Self {
        Self {
            cache_size,
            window,
            min_content_len: 3,
            cache: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Collapse whitespace runs, trim, lowercase.
    fn normalize(content: &str) -> String {
        content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    fn content_hash(normalized: &str) -> String {
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    /// Drop entries older than the window, then LRU-evict down to capacity.
    fn evict(&mut self, now: Instant) {
        self.order.retain(|key| {
            let keep = self
                .cache
                .get(key)
                .is_some_and(|fp| now.duration_since(fp.seen_at) <= self.window);
            if !keep {
                self.cache.remove(key);
            }
            keep
        });

        while self.order.len() > self.cache_size {
            let oldest = self.order.remove(0);
            self.cache.remove(&oldest);
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(pos);
            self.order.push(key);
        }
    }

    /// Has substantially the same content been seen from `role` within the
    /// window? Does not record the message.
    pub fn is_duplicate(&mut self, content: &str, role: Role) -> bool {
        let normalized = Self::normalize(content);
        if normalized.len() < self.min_content_len {
            return false;
        }

        let now = Instant::now();
        self.evict(now);

        let hash = Self::content_hash(&normalized);
        let Some(cached) = self.cache.get(&hash) else {
            return false;
        };

        if cached.role != role {
            return false;
        }

        let age = now.duration_since(cached.seen_at);
        if age <= self.window {
            warn!(
                role = %role,
                age_secs = age.as_secs_f64(),
                preview = %cached.preview,
                "duplicate message detected"
            );
            return true;
        }
        false
    }

    /// Record a message fingerprint, refreshing LRU position if present.
    pub fn mark_seen(&mut self, content: &str, role: Role) {
        let normalized = Self::normalize(content);
        if normalized.len() < self.min_content_len {
            return;
        }

        let now = Instant::now();
        let hash = Self::content_hash(&normalized);
        let mut preview = normalized;
        preview.truncate(200);

        if self.cache.contains_key(&hash) {
            self.touch(&hash);
        } else {
            self.order.push(hash.clone());
        }
        self.cache.insert(
            hash,
            MessageFingerprint {
                seen_at: now,
                role,
                preview,
            },
        );

        self.evict(now);
        debug!(role = %role, cache_size = self.cache.len(), "message marked as seen");
    }

    /// Combined check: returns `true` for a duplicate; otherwise records
    /// the message and returns `false`.
    pub fn check_and_mark(&mut self, content: &str, role: Role) -> bool {
        if self.is_duplicate(content, role) {
            return true;
        }
        self.mark_seen(content, role);
        false
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    /// Snapshot of the cache state, for diagnostics.
    pub fn stats(&self) -> DetectorStats {
        let now = Instant::now();
        let ages: Vec<Duration> = self
            .cache
            .values()
            .map(|fp| now.duration_since(fp.seen_at))
            .collect();
        DetectorStats {
            cache_len: self.cache.len(),
            cache_capacity: self.cache_size,
            window: self.window,
            oldest_entry_age: ages.iter().max().copied(),
            newest_entry_age: ages.iter().min().copied(),
        }
    }
}

/// Point-in-time view of the detector cache.
#[derive(Debug, Clone)]
pub struct DetectorStats {
    pub cache_len: usize,
    pub cache_capacity: usize,
    pub window: Duration,
    pub oldest_entry_age: Option<Duration>,
    pub newest_entry_age: Option<Duration>,
}
