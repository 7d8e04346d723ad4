// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Decoded batch cache
//!
//! Keyed by artifact fingerprint, so a rewritten artifact can never be
//! served from a stale entry. Bounded by a byte budget counted with
//! `RecordBatch::get_array_memory_size`; least recently used entries are
//! evicted first. A budget of zero disables caching.

use crate::fingerprint::{FileFingerprint, now_nanos};
use arrow::record_batch::RecordBatch;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;

/// Counters since construction (or the last `clear`, for `bytes`/`entries`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub bytes: usize,
    pub entries: usize,
}

#[derive(Debug)]
struct CacheEntry {
    payload: Arc<[RecordBatch]>,
    last_access_nanos: u64,
    size_bytes: usize,
}

#[derive(Debug)]
struct Inner {
    lru: LruCache<FileFingerprint, CacheEntry>,
    total_bytes: usize,
    stats: CacheStats,
}

#[derive(Debug)]
pub struct StorageCacheManager {
    max_bytes: usize,
    inner: Mutex<Inner>,
}

/// In-memory size of a set of batches
#[must_use]
pub fn batches_size(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::get_array_memory_size).sum()
}

impl StorageCacheManager {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                total_bytes: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max_bytes > 0
    }

    pub fn get(&self, fingerprint: &FileFingerprint) -> Option<Arc<[RecordBatch]>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.lru.get_mut(fingerprint) {
            Some(entry) => {
                entry.last_access_nanos = now_nanos();
                let payload = entry.payload.clone();
                inner.stats.hits += 1;
                Some(payload)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Cache `batches` under `fingerprint`. Entries larger than the whole
    /// budget are not cached.
    pub fn put(&self, fingerprint: FileFingerprint, batches: Arc<[RecordBatch]>) {
        let size_bytes = batches_size(&batches);
        let mut inner = self.inner.lock();

        if self.max_bytes == 0 || size_bytes > self.max_bytes {
            if let Some(prev) = inner.lru.pop(&fingerprint) {
                inner.total_bytes = inner.total_bytes.saturating_sub(prev.size_bytes);
            }
            return;
        }

        let entry = CacheEntry {
            payload: batches,
            last_access_nanos: now_nanos(),
            size_bytes,
        };
        if let Some(prev) = inner.lru.put(fingerprint, entry) {
            inner.total_bytes = inner.total_bytes.saturating_sub(prev.size_bytes);
        }
        inner.total_bytes = inner.total_bytes.saturating_add(size_bytes);
        inner.stats.inserts += 1;

        while inner.total_bytes > self.max_bytes {
            let Some((evicted, entry)) = inner.lru.pop_lru() else {
                inner.total_bytes = 0;
                break;
            };
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
            inner.stats.evictions += 1;
            let path = evicted.path.display().to_string();
            let idle_nanos = now_nanos().saturating_sub(entry.last_access_nanos);
            diagnostics::debug!("Evicted cached batches of {path} (idle {idle_nanos}ns)", path: path, idle_nanos: idle_nanos);
        }
    }

    pub fn invalidate(&self, fingerprint: &FileFingerprint) -> bool {
        let mut inner = self.inner.lock();
        match inner.lru.pop(fingerprint) {
            Some(entry) => {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
                inner.stats.invalidations += 1;
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.total_bytes = 0;
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            bytes: inner.total_bytes,
            entries: inner.lru.len(),
            ..inner.stats
        }
    }
}
