//! "Top books by downloads" ranking, rebuilt from the first few catalog pages
//! whenever it is read after going stale.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::gutendex::{Book, FetchFailure, SearchParams};
use crate::gutendex_cache::CachedGutendexClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularBook {
    #[serde(flatten)]
    pub book: Book,
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct PopularConfig {
    pub refresh_interval: Duration,
    pub page_window: u32,
    pub top_n: usize,
}

impl Default for PopularConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60 * 60),
            page_window: 5,
            top_n: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    books: Arc<Vec<PopularBook>>,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularStats {
    pub popular_books_count: usize,
    pub last_popular_update: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct PopularBooks {
    catalog: CachedGutendexClient,
    config: PopularConfig,
    snapshot: Arc<RwLock<Snapshot>>,
    // Held for the duration of a refresh so stale readers share one attempt.
    refresh_guard: Arc<Mutex<()>>,
    // Completed refresh attempts, successful or not.
    attempts: Arc<AtomicU64>,
}

impl PopularBooks {
    pub fn new(catalog: CachedGutendexClient, config: PopularConfig) -> Self {
        Self {
            catalog,
            config,
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
            refresh_guard: Arc::new(Mutex::new(())),
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    fn is_fresh(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        let Some(last) = snapshot.last_updated else {
            return false;
        };
        match (now - last).to_std() {
            Ok(age) => age <= self.config.refresh_interval,
            // Last update is in the future (clock skew).
            Err(_) => true,
        }
    }

    /// Up to `limit` books from the current ranking, refreshing it first if
    /// it is stale. A failed refresh keeps serving the previous ranking.
    pub async fn get(&self, limit: usize) -> Vec<PopularBook> {
        let attempts_seen = self.attempts.load(Ordering::Acquire);
        let snapshot = self.snapshot.read().await.clone();
        if self.is_fresh(&snapshot, Utc::now()) {
            return prefix(&snapshot.books, limit);
        }

        let _guard = self.refresh_guard.lock().await;

        // Another reader finished an attempt (good or bad) while we waited.
        if self.attempts.load(Ordering::Acquire) != attempts_seen {
            return prefix(&self.snapshot.read().await.books, limit);
        }

        let outcome = self.fetch_ranking().await;
        let books = match outcome {
            Ok(ranked) => {
                tracing::info!(count = ranked.len(), "popular books cache updated");
                let mut snapshot = self.snapshot.write().await;
                *snapshot = Snapshot {
                    books: Arc::new(ranked),
                    last_updated: Some(Utc::now()),
                };
                prefix(&snapshot.books, limit)
            }
            Err(err) => {
                tracing::error!(error = %err, "error updating popular books cache");
                prefix(&self.snapshot.read().await.books, limit)
            }
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);
        books
    }

    async fn fetch_ranking(&self) -> Result<Vec<PopularBook>, FetchFailure> {
        tracing::info!(pages = self.config.page_window, "updating popular books cache");

        let mut all_books = Vec::new();
        for page in 1..=self.config.page_window {
            let response = self.catalog.search(&SearchParams::page(page)).await?;
            all_books.extend(response.results.iter().cloned());
            if response.next.is_none() {
                break;
            }
        }

        Ok(rank_books(all_books, self.config.top_n))
    }

    pub async fn stats(&self) -> PopularStats {
        let snapshot = self.snapshot.read().await;
        PopularStats {
            popular_books_count: snapshot.books.len(),
            last_popular_update: snapshot.last_updated,
        }
    }
}

fn prefix(books: &[PopularBook], limit: usize) -> Vec<PopularBook> {
    books.iter().take(limit).cloned().collect()
}

/// Sorts by download count descending (stable, so ties keep fetch order),
/// keeps the first `top_n` and numbers them from 1.
pub fn rank_books(mut books: Vec<Book>, top_n: usize) -> Vec<PopularBook> {
    books.sort_by(|a, b| b.download_count.cmp(&a.download_count));
    books
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(index, book)| PopularBook {
            book,
            rank: index + 1,
        })
        .collect()
}
