//! Thinking-signature memoization.
//!
//! Clients routinely replay conversations with the `signature` field
//! stripped from thinking blocks (resume after restart, history edits).
//! The upstream rejects unsigned thinking, so every signature seen on a
//! response is remembered here, keyed by a hash of the normalized thinking
//! text, both the full content and its first 500 characters, so a
//! truncated replay still hits.
//!
//! Entries live for two hours and the cache holds at most 500 of them;
//! the oldest entry is evicted first. Eviction is O(n) on the write path,
//! which is fine at this cap.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use slipstream_core::constants::{
    SIGNATURE_CACHE_MAX, SIGNATURE_MIN_LEN, SIGNATURE_PREFIX_LEN, SIGNATURE_TTL_MS,
};

#[derive(Debug)]
struct Entry {
    signature: String,
    inserted_at: i64,
    keys: [String; 2],
}

#[derive(Debug, Default)]
struct Inner {
    by_hash: HashMap<String, Arc<Entry>>,
    order: Vec<Arc<Entry>>,
}

/// Shared content→signature cache.
#[derive(Debug)]
pub struct SignatureCache {
    inner: Mutex<Inner>,
    ttl_ms: i64,
    max_entries: usize,
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureCache {
    /// Create with the default TTL and size cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl_ms: SIGNATURE_TTL_MS,
            max_entries: SIGNATURE_CACHE_MAX,
        }
    }

    /// Create with explicit TTL and cap (tests).
    #[must_use]
    pub fn with_limits(ttl_ms: i64, max_entries: usize) -> Self {
        Self { inner: Mutex::new(Inner::default()), ttl_ms, max_entries }
    }

    /// Remember `signature` for `text`.
    ///
    /// Rejects signatures below the minimum length and empty text.
    pub fn record(&self, text: &str, signature: &str) {
        if signature.len() < SIGNATURE_MIN_LEN {
            return;
        }
        let normalized = normalize(text);
        if normalized.is_empty() {
            return;
        }
        let full_key = hash(&normalized);
        let prefix_key = hash(&prefix(&normalized));
        let now = now_ms();

        let mut inner = self.inner.lock();

        // Re-recording the same content replaces the old entry.
        remove_entry(&mut inner, &full_key);
        remove_entry(&mut inner, &prefix_key);

        while !inner.order.is_empty() && inner.order.len() >= self.max_entries {
            let oldest = inner.order.remove(0);
            for key in &oldest.keys {
                remove_if_same(&mut inner.by_hash, key, &oldest);
            }
        }

        let entry = Arc::new(Entry {
            signature: signature.to_string(),
            inserted_at: now,
            keys: [full_key.clone(), prefix_key.clone()],
        });
        let _ = inner.by_hash.insert(full_key, Arc::clone(&entry));
        let _ = inner.by_hash.insert(prefix_key, Arc::clone(&entry));
        inner.order.push(entry);
    }

    /// Look up the signature for `text`: full-content hash first, then the
    /// prefix hash. Expired entries are dropped on the way out.
    #[must_use]
    pub fn lookup(&self, text: &str) -> Option<String> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return None;
        }
        let now = now_ms();
        let mut inner = self.inner.lock();

        for key in [hash(&normalized), hash(&prefix(&normalized))] {
            if let Some(entry) = inner.by_hash.get(&key).cloned() {
                if now - entry.inserted_at > self.ttl_ms {
                    drop_entry(&mut inner, &entry);
                    continue;
                }
                return Some(entry.signature.clone());
            }
        }
        None
    }

    /// Purge every TTL-expired entry. Called from the scheduler idle hook.
    pub fn sweep(&self) {
        let now = now_ms();
        let mut inner = self.inner.lock();
        let expired: Vec<Arc<Entry>> = inner
            .order
            .iter()
            .filter(|e| now - e.inserted_at > self.ttl_ms)
            .cloned()
            .collect();
        for entry in expired {
            drop_entry(&mut inner, &entry);
        }
    }

    /// Number of distinct cached signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}

fn drop_entry(inner: &mut Inner, entry: &Arc<Entry>) {
    for key in &entry.keys {
        remove_if_same(&mut inner.by_hash, key, entry);
    }
    inner.order.retain(|e| !Arc::ptr_eq(e, entry));
}

fn remove_entry(inner: &mut Inner, key: &str) {
    if let Some(entry) = inner.by_hash.get(key).cloned() {
        drop_entry(inner, &entry);
    }
}

fn remove_if_same(map: &mut HashMap<String, Arc<Entry>>, key: &str, entry: &Arc<Entry>) {
    if map.get(key).is_some_and(|e| Arc::ptr_eq(e, entry)) {
        let _ = map.remove(key);
    }
}

/// Trim and collapse all whitespace runs to single spaces.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The first [`SIGNATURE_PREFIX_LEN`] characters of normalized text.
fn prefix(normalized: &str) -> String {
    normalized.chars().take(SIGNATURE_PREFIX_LEN).collect()
}

fn hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
