use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::gutendex::{Book, FetchFailure, GutendexClient, SearchParams, SearchResult};

/// Default freshness window for catalog responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Upper bound on entries per store. Expired entries are dropped lazily by
/// moka; this only caps memory if a very wide key space is hit within one TTL.
const MAX_ENTRIES_PER_STORE: u64 = 10_000;

/// Time-to-live keyed store with hit/miss accounting.
#[derive(Clone)]
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    entries: Cache<String, V>,
    stats: Arc<CacheCounters>,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Aggregate counters reported on `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub keys: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            keys: self.keys + other.keys,
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
        }
    }

    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64 * 100.0)
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(MAX_ENTRIES_PER_STORE)
            .time_to_live(ttl)
            .build();
        Self {
            entries,
            stats: Arc::new(CacheCounters::default()),
        }
    }

    async fn lookup(&self, key: &str) -> Option<V> {
        let cached = self.entries.get(key).await;
        if cached.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache_key = key, "cache hit");
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache_key = key, "cache miss");
        }
        cached
    }

    /// Returns the live value for `key`, or runs `fetch` and stores its
    /// result. Errors are passed through without being stored, so the next
    /// call goes back upstream.
    pub async fn get_or_fetch<E, Fut>(&self, key: &str, fetch: Fut) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(cached) = self.lookup(key).await {
            return Ok(cached);
        }

        let value = fetch.await?;
        self.entries.insert(key.to_string(), value.clone()).await;
        Ok(value)
    }

    /// Like [`TtlCache::get_or_fetch`], for lookups that can come back empty.
    /// An absent result is not stored.
    pub async fn get_or_fetch_optional<E, Fut>(
        &self,
        key: &str,
        fetch: Fut,
    ) -> Result<Option<V>, E>
    where
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        if let Some(cached) = self.lookup(key).await {
            return Ok(Some(cached));
        }

        let fetched = fetch.await?;
        if let Some(value) = &fetched {
            self.entries.insert(key.to_string(), value.clone()).await;
        }
        Ok(fetched)
    }

    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        CacheStats {
            keys: self.entries.entry_count(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
        }
    }
}

/// Builds `"<tag>:<sha256 of canonical JSON>"`. Serialization follows the
/// struct's field order, so equal parameter sets always map to one key.
pub fn cache_key<P: Serialize>(tag: &str, params: &P) -> String {
    let canonical = serde_json::to_vec(params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{tag}:{}", hex::encode(hasher.finalize()))
}

#[derive(Serialize)]
struct BookKey {
    id: u64,
}

/// Catalog client with a TTL cache in front of both operations.
#[derive(Clone)]
pub struct CachedGutendexClient {
    client: GutendexClient,
    search_cache: TtlCache<Arc<SearchResult>>,
    book_cache: TtlCache<Arc<Book>>,
}

impl CachedGutendexClient {
    pub fn new(client: GutendexClient, ttl: Duration) -> Self {
        Self {
            client,
            search_cache: TtlCache::new(ttl),
            book_cache: TtlCache::new(ttl),
        }
    }

    pub async fn search(&self, params: &SearchParams) -> Result<Arc<SearchResult>, FetchFailure> {
        let key = cache_key("search", params);
        self.search_cache
            .get_or_fetch(&key, async { self.client.search(params).await.map(Arc::new) })
            .await
    }

    pub async fn get_by_id(&self, id: u64) -> Result<Option<Arc<Book>>, FetchFailure> {
        let key = cache_key("book", &BookKey { id });
        self.book_cache
            .get_or_fetch_optional(&key, async {
                self.client
                    .get_by_id(id)
                    .await
                    .map(|book| book.map(Arc::new))
            })
            .await
    }

    pub async fn stats(&self) -> CacheStats {
        let search = self.search_cache.stats().await;
        let book = self.book_cache.stats().await;
        search.merge(book)
    }

    pub async fn log_cache_info(&self) {
        let stats = self.stats().await;
        match stats.hit_rate() {
            Some(rate) => tracing::info!(
                keys = stats.keys,
                hits = stats.hits,
                misses = stats.misses,
                "catalog cache: {rate:.1}% hit rate"
            ),
            None => tracing::info!(keys = stats.keys, "catalog cache: no lookups yet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gutendex::test_support::{make_book, spawn_catalog};
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Default)]
    struct Counters {
        searches: Arc<AtomicUsize>,
        books: Arc<AtomicUsize>,
    }

    async fn search_handler(State(counters): State<Counters>) -> Json<SearchResult> {
        counters.searches.fetch_add(1, Ordering::Relaxed);
        Json(SearchResult {
            count: 2,
            next: None,
            previous: None,
            results: vec![make_book(1, 50), make_book(2, 70)],
        })
    }

    async fn book_handler(
        State(counters): State<Counters>,
        Path(id): Path<u64>,
    ) -> Result<Json<Book>, StatusCode> {
        counters.books.fetch_add(1, Ordering::Relaxed);
        match id {
            404 => Err(StatusCode::NOT_FOUND),
            500 => Err(StatusCode::INTERNAL_SERVER_ERROR),
            _ => Ok(Json(make_book(id, 1))),
        }
    }

    async fn cached_client(
        ttl: Duration,
    ) -> (CachedGutendexClient, Counters, tokio::task::JoinHandle<()>) {
        let counters = Counters::default();
        let app = Router::new()
            .route("/books/", get(search_handler))
            .route("/books/{id}", get(book_handler))
            .with_state(counters.clone());
        let (base, server) = spawn_catalog(app).await;
        let client = GutendexClient::new(&base).expect("test base url");
        (CachedGutendexClient::new(client, ttl), counters, server)
    }

    #[test]
    fn equal_params_produce_equal_keys() {
        let a = SearchParams {
            page: Some(1),
            search: Some("dickens".to_string()),
            ..Default::default()
        };
        let b = SearchParams {
            search: Some("dickens".to_string()),
            page: Some(1),
            ..Default::default()
        };
        let c = SearchParams::page(1);

        assert_eq!(cache_key("search", &a), cache_key("search", &b));
        assert_ne!(cache_key("search", &a), cache_key("search", &c));
        assert!(cache_key("search", &a).starts_with("search:"));
        assert_ne!(
            cache_key("book", &BookKey { id: 1 }),
            cache_key("search", &BookKey { id: 1 })
        );
    }

    #[tokio::test]
    async fn repeated_search_within_ttl_hits_upstream_once() {
        let (cached, counters, server) = cached_client(DEFAULT_TTL).await;
        let params = SearchParams {
            page: Some(1),
            topic: Some("poetry".to_string()),
            ..Default::default()
        };

        let first = cached.search(&params).await.unwrap();
        let second = cached.search(&params.clone()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counters.searches.load(Ordering::Relaxed), 1);

        let stats = cached.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.keys, 1);

        server.abort();
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (cached, counters, server) = cached_client(Duration::from_millis(200)).await;

        cached.search(&SearchParams::page(1)).await.unwrap();
        cached.search(&SearchParams::page(1)).await.unwrap();
        assert_eq!(counters.searches.load(Ordering::Relaxed), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;

        cached.search(&SearchParams::page(1)).await.unwrap();
        assert_eq!(counters.searches.load(Ordering::Relaxed), 2);

        server.abort();
    }

    #[tokio::test]
    async fn not_found_and_failures_are_not_cached() {
        let (cached, counters, server) = cached_client(DEFAULT_TTL).await;

        assert!(cached.get_by_id(404).await.unwrap().is_none());
        assert!(cached.get_by_id(404).await.unwrap().is_none());
        assert!(cached.get_by_id(500).await.is_err());
        assert!(cached.get_by_id(500).await.is_err());
        assert_eq!(counters.books.load(Ordering::Relaxed), 4);
        assert_eq!(cached.stats().await.keys, 0);

        let book = cached.get_by_id(7).await.unwrap().expect("book 7");
        assert_eq!(book.id, 7);
        cached.get_by_id(7).await.unwrap();
        assert_eq!(counters.books.load(Ordering::Relaxed), 5);

        server.abort();
    }

    #[tokio::test]
    async fn fetcher_is_skipped_on_hit() {
        let cache: TtlCache<u32> = TtlCache::new(DEFAULT_TTL);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .get_or_fetch("k", async {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok::<_, std::convert::Infallible>(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_entry() {
        let cache: TtlCache<u32> = TtlCache::new(DEFAULT_TTL);

        let err = cache
            .get_or_fetch("k", async { Err::<u32, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");

        let value = cache
            .get_or_fetch("k", async { Ok::<_, &str>(9) })
            .await
            .unwrap();
        assert_eq!(value, 9);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.keys), (0, 2, 1));
    }
}
