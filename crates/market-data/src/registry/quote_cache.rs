//! In-memory TTL cache of the latest quote per symbol.
//!
//! Entries keep their own TTL and insertion instant. Expired entries are not
//! evicted on read: they stay around so the router can fall back to them
//! when every provider is down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use crate::clock::{Clock, SystemClock};
use crate::models::Quote;

/// Default freshness window.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
struct CacheEntry {
    quote: Quote,
    stored_at: Instant,
    ttl: Duration,
}

/// A cached quote along with its age at lookup time.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedQuote {
    pub quote: Quote,
    pub age: Duration,
    pub fresh: bool,
}

/// Hit/miss counters for fresh lookups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct QuoteCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QuoteCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh quote for `symbol`, if any. Expired entries count as a miss.
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.lookup(symbol, None)
    }

    /// Like [`get`](Self::get), but judges freshness against `ttl` instead
    /// of the TTL the entry was stored with.
    pub fn get_with_ttl(&self, symbol: &str, ttl: Duration) -> Option<Quote> {
        self.lookup(symbol, Some(ttl))
    }

    fn lookup(&self, symbol: &str, ttl: Option<Duration>) -> Option<Quote> {
        let now = self.clock.now();
        let fresh = self.entries.get(symbol).and_then(|entry| {
            let ttl = ttl.unwrap_or(entry.ttl);
            (now.duration_since(entry.stored_at) < ttl).then(|| entry.quote.clone())
        });

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Any cached quote for `symbol`, fresh or expired. Does not touch the
    /// hit/miss counters.
    pub fn peek(&self, symbol: &str) -> Option<CachedQuote> {
        let now = self.clock.now();
        self.entries.get(symbol).map(|entry| {
            let age = now.duration_since(entry.stored_at);
            CachedQuote {
                quote: entry.quote.clone(),
                age,
                fresh: age < entry.ttl,
            }
        })
    }

    pub fn is_fresh(&self, symbol: &str) -> bool {
        self.peek(symbol).is_some_and(|cached| cached.fresh)
    }

    /// Time since the entry for `symbol` was stored.
    pub fn age(&self, symbol: &str) -> Option<Duration> {
        self.peek(symbol).map(|cached| cached.age)
    }

    /// Store a quote under its own symbol with the default TTL.
    ///
    /// Returns the quote the cache holds afterwards. When the cache already
    /// has a quote with a newer provider timestamp, that quote is kept and
    /// returned, and its lifetime restarts: the provider answered, just with
    /// older data.
    pub fn put(&self, quote: Quote) -> Quote {
        self.put_with_ttl(quote, self.default_ttl)
    }

    pub fn put_with_ttl(&self, quote: Quote, ttl: Duration) -> Quote {
        let now = self.clock.now();

        match self.entries.entry(quote.symbol.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.quote.timestamp > quote.timestamp {
                    debug!(
                        "Quote cache: keeping {} from {}, {} sent an older quote",
                        quote.symbol, entry.quote.provider_id, quote.provider_id
                    );
                } else {
                    entry.quote = quote;
                }
                entry.stored_at = now;
                entry.ttl = ttl;
                entry.quote.clone()
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    quote: quote.clone(),
                    stored_at: now,
                    ttl,
                });
                quote
            }
        }
    }

    pub fn invalidate(&self, symbol: &str) -> bool {
        self.entries.remove(symbol).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
