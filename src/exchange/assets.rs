// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Coin symbol to asset index resolution.
//!
//! A handful of major perpetuals have stable indices and are answered from a
//! static table. Everything else comes from the exchange's `meta` universe,
//! cached in an LRU with a TTL so listings and delistings are picked up.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Indices that never move on the perpetuals universe.
pub const SEEDED_ASSETS: &[(&str, u32)] = &[
    ("BTC", 0),
    ("ETH", 1),
    ("SOL", 5),
    ("AVAX", 6),
    ("BNB", 7),
    ("ARB", 11),
    ("DOGE", 12),
];

const DEFAULT_CAPACITY: usize = 512;

fn normalize(coin: &str) -> String {
    coin.trim().to_ascii_uppercase()
}

struct CachedAsset {
    index: u32,
    inserted_at: Instant,
}

pub struct AssetCache {
    cache: Mutex<LruCache<String, CachedAsset>>,
    ttl: Duration,
}

impl AssetCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, ttl)
    }

    pub fn with_capacity(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Static index for a major coin, if it has one.
    pub fn seeded(coin: &str) -> Option<u32> {
        let coin = normalize(coin);
        SEEDED_ASSETS
            .iter()
            .find(|(name, _)| *name == coin)
            .map(|(_, index)| *index)
    }

    /// Seeded table first, then unexpired cache entries.
    pub fn lookup(&self, coin: &str) -> Option<u32> {
        if let Some(index) = Self::seeded(coin) {
            return Some(index);
        }
        let key = normalize(coin);
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.index);
            }
            cache.pop(&key);
        }
        None
    }

    /// Cache a freshly fetched universe. Position in the list is the index.
    pub fn store_universe(&self, names: &[String]) {
        let now = Instant::now();
        if let Ok(mut cache) = self.cache.lock() {
            for (index, name) in names.iter().enumerate() {
                let Ok(index) = u32::try_from(index) else {
                    break;
                };
                cache.put(
                    normalize(name),
                    CachedAsset {
                        index,
                        inserted_at: now,
                    },
                );
            }
        }
    }
}
