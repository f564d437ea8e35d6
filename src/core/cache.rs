//! Single-flight content cache (C3): coalesces concurrent misses for the same
//! key into exactly one origin fetch, and bounds total cached bytes with LRU
//! eviction.
//!
//! Modeled on this codebase's own cache-stampede guard (a `dashmap` of
//! `Shared` futures keyed by the object being fetched): the first caller for a
//! missing key becomes the "leader" and performs the fetch; every other
//! concurrent caller for that key attaches to the same future and receives
//! the identical result.

use crate::core::envelope::Envelope;
use crate::core::errors::CdnError;
use crate::core::origin::OriginFetcher;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use reqwest::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Total cached-envelope-bytes budget: `2 * LARGE_OBJECT_THRESHOLD`.
pub const MEMORY_BUDGET_BYTES: usize = 128 * 1024 * 1024;

type FetchFuture = Shared<BoxFuture<'static, Result<Arc<Envelope>, Arc<CdnError>>>>;

struct Store {
    lru: LruCache<String, (Arc<Envelope>, usize)>,
    bytes: usize,
}

impl Store {
    fn new() -> Self {
        Self {
            // Capacity is governed by the byte budget, not entry count, so the
            // LRU's own count limit is effectively unbounded here.
            lru: LruCache::unbounded(),
            bytes: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Arc<Envelope>> {
        self.lru.get(key).map(|(envelope, _)| envelope.clone())
    }

    fn insert(&mut self, key: String, envelope: Arc<Envelope>, size: usize) {
        if let Some((_, (_, old_size))) = self.lru.push(key, (envelope, size)) {
            self.bytes = self.bytes.saturating_sub(old_size);
        }
        self.bytes += size;
        while self.bytes > MEMORY_BUDGET_BYTES {
            match self.lru.pop_lru() {
                Some((_, (_, evicted_size))) => self.bytes = self.bytes.saturating_sub(evicted_size),
                None => break,
            }
        }
    }
}

/// A mapping from request path to cached envelope, with single-flight misses
/// and an LRU-evicted byte budget.
pub struct ContentCache {
    fetcher: Arc<OriginFetcher>,
    fetch_locks: DashMap<String, FetchFuture>,
    store: Mutex<Store>,
    peer_client: Client,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ContentCache {
    pub fn new(fetcher: Arc<OriginFetcher>) -> Self {
        Self {
            fetcher,
            fetch_locks: DashMap::new(),
            store: Mutex::new(Store::new()),
            peer_client: Client::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fetches `key`, coalescing concurrent misses into one origin request.
    pub async fn get(&self, key: &str) -> Result<Arc<Envelope>, CdnError> {
        if let Some(envelope) = self.store.lock().await.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(envelope);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let fetcher = self.fetcher.clone();
        let owned_key = key.to_string();
        self.single_flight(key.to_string(), move || {
            let fetcher = fetcher.clone();
            let key = owned_key.clone();
            async move { fetcher.fetch(&key).await.map(Arc::new) }.boxed()
        })
        .await
    }

    /// Fetches `key` through another peer's HTTP surface rather than the
    /// origin, absorbing repeated local demand for a key this node does not
    /// own under a secondary "hot" slot distinct from locally-owned entries.
    pub async fn get_via_peer(&self, key: &str, peer_base: &str) -> Result<Arc<Envelope>, CdnError> {
        let hot_key = format!("hot:{peer_base}:{key}");
        if let Some(envelope) = self.store.lock().await.get(&hot_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(envelope);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let client = self.peer_client.clone();
        let url = format!("{}{}", peer_base.trim_end_matches('/'), key);
        self.single_flight(hot_key, move || {
            let client = client.clone();
            let url = url.clone();
            async move {
                let response = client.get(&url).send().await?;
                if response.status() != reqwest::StatusCode::OK {
                    let code = response.status().as_u16();
                    let body = response.bytes().await.unwrap_or_default();
                    return Err(CdnError::OriginStatus { code, body });
                }
                let headers: Vec<(String, String)> = response
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                    .collect();
                let body = response.bytes().await.map_err(|e| CdnError::OriginIo(e.to_string()))?;
                Ok(Arc::new(Envelope::inline(headers, body.to_vec())))
            }
            .boxed()
        })
        .await
    }

    /// Shared single-flight plumbing: runs `start_fetch` at most once per
    /// `store_key` across all concurrent callers, installing the result into
    /// the store only on success.
    async fn single_flight<F>(&self, store_key: String, start_fetch: F) -> Result<Arc<Envelope>, CdnError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Arc<Envelope>, CdnError>> + Send + 'static,
    {
        let future = match self.fetch_locks.entry(store_key.clone()) {
            Entry::Occupied(occupied) => {
                debug!(key = %store_key, "attaching to in-flight fetch");
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                debug!(key = %store_key, "leading fetch for key");
                let fetch: BoxFuture<'static, Result<Arc<Envelope>, Arc<CdnError>>> =
                    async move { start_fetch().await.map_err(Arc::new) }.boxed();
                let shared = fetch.shared();
                vacant.insert(shared.clone());
                shared
            }
        };

        let result = future.await;
        self.fetch_locks.remove(&store_key);

        match result {
            Ok(envelope) => {
                let size = envelope.encode().len();
                self.store.lock().await.insert(store_key, envelope.clone(), size);
                Ok(envelope)
            }
            Err(arc_err) => Err((*arc_err).clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::origin::OriginFetcher;
    use std::path::PathBuf;
    use url::Url;

    fn fetcher() -> Arc<OriginFetcher> {
        Arc::new(OriginFetcher::new(
            Url::parse("http://127.0.0.1:1").unwrap(),
            PathBuf::from("/tmp/minicdn-test-cache"),
        ))
    }

    #[tokio::test]
    async fn second_call_for_same_key_reuses_first_result() {
        let cache = Arc::new(ContentCache::new(fetcher()));
        // Neither call can reach a real origin; both should fail identically
        // and, crucially, neither should panic or deadlock.
        let (a, b) = tokio::join!(cache.get("/missing"), cache.get("/missing"));
        assert!(a.is_err());
        assert!(b.is_err());
    }

    #[tokio::test]
    async fn store_evicts_oldest_when_over_budget() {
        let mut store = Store::new();
        for i in 0..5 {
            let envelope = Arc::new(Envelope::inline(vec![], vec![0u8; 40 * 1024 * 1024]));
            store.insert(format!("/k{i}"), envelope, 40 * 1024 * 1024);
        }
        assert!(store.bytes <= MEMORY_BUDGET_BYTES);
        assert!(store.get("/k0").is_none(), "oldest entry should have been evicted");
    }
}
