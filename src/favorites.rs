use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::gutendex::Book;
use crate::gutendex_cache::CachedGutendexClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: i64,
    pub user_id: String,
    pub book_id: u64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FavoriteError {
    #[error("Book already in favorites")]
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteCounts {
    pub total_users: usize,
    pub total_favorites: usize,
}

/// Per-user favorite books, held in memory for the life of the process.
#[derive(Clone)]
pub struct FavoritesStore {
    by_user: Arc<RwLock<HashMap<String, Vec<Favorite>>>>,
    last_id: Arc<AtomicI64>,
    catalog: CachedGutendexClient,
}

impl FavoritesStore {
    pub fn new(catalog: CachedGutendexClient) -> Self {
        Self {
            by_user: Arc::new(RwLock::new(HashMap::new())),
            last_id: Arc::new(AtomicI64::new(0)),
            catalog,
        }
    }

    // Millisecond timestamp, bumped past the previous id when two favorites
    // land in the same millisecond.
    fn next_id(&self, now: DateTime<Utc>) -> i64 {
        let candidate = now.timestamp_millis();
        let mut current = self.last_id.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(current + 1);
            match self.last_id.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub async fn add(&self, user_id: &str, book_id: u64) -> Result<Favorite, FavoriteError> {
        // Check and insert under one write guard so a pair can't be added twice.
        let mut by_user = self.by_user.write().await;
        let favorites = by_user.entry(user_id.to_string()).or_default();

        if favorites.iter().any(|fav| fav.book_id == book_id) {
            return Err(FavoriteError::Duplicate);
        }

        let added_at = Utc::now();
        let favorite = Favorite {
            id: self.next_id(added_at),
            user_id: user_id.to_string(),
            book_id,
            added_at,
        };
        favorites.push(favorite.clone());
        tracing::info!(user_id, book_id, "added book to favorites");

        Ok(favorite)
    }

    pub async fn remove(&self, user_id: &str, book_id: u64) -> bool {
        let mut by_user = self.by_user.write().await;
        let Some(favorites) = by_user.get_mut(user_id) else {
            return false;
        };
        let Some(index) = favorites.iter().position(|fav| fav.book_id == book_id) else {
            return false;
        };

        favorites.remove(index);
        if favorites.is_empty() {
            by_user.remove(user_id);
        }
        tracing::info!(user_id, book_id, "removed book from favorites");

        true
    }

    /// Favorites in insertion order; unknown users get an empty list.
    pub async fn list(&self, user_id: &str) -> Vec<Favorite> {
        self.by_user
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Resolves each favorite through the cached catalog. Lookups that fail
    /// or come back empty are skipped.
    pub async fn list_with_details(&self, user_id: &str) -> Vec<Book> {
        let favorites = self.list(user_id).await;

        let lookups = favorites.iter().map(|fav| async move {
            match self.catalog.get_by_id(fav.book_id).await {
                Ok(Some(book)) => Some(book.as_ref().clone()),
                Ok(None) => {
                    tracing::warn!(user_id, book_id = fav.book_id, "favorite book not in catalog");
                    None
                }
                Err(err) => {
                    tracing::error!(
                        user_id,
                        book_id = fav.book_id,
                        error = %err,
                        "error fetching favorite book details"
                    );
                    None
                }
            }
        });

        join_all(lookups).await.into_iter().flatten().collect()
    }

    pub async fn counts(&self) -> FavoriteCounts {
        let by_user = self.by_user.read().await;
        FavoriteCounts {
            total_users: by_user.len(),
            total_favorites: by_user.values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gutendex::GutendexClient;
    use crate::gutendex::test_support::{make_book, spawn_catalog};
    use crate::gutendex_cache::DEFAULT_TTL;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    fn offline_store() -> FavoritesStore {
        // Port 9 (discard) is never served in tests; nothing here hits the catalog.
        let client = GutendexClient::new("http://127.0.0.1:9/books").unwrap();
        FavoritesStore::new(CachedGutendexClient::new(client, DEFAULT_TTL))
    }

    #[tokio::test]
    async fn adding_same_pair_twice_conflicts() {
        let store = offline_store();

        let fav = store.add("u1", 42).await.unwrap();
        assert_eq!(fav.user_id, "u1");
        assert_eq!(fav.book_id, 42);

        assert_eq!(store.add("u1", 42).await, Err(FavoriteError::Duplicate));
        // Same book for another user is fine.
        assert!(store.add("u2", 42).await.is_ok());
    }

    #[tokio::test]
    async fn remove_then_re_add_succeeds() {
        let store = offline_store();

        store.add("u1", 42).await.unwrap();
        assert!(store.remove("u1", 42).await);
        assert!(!store.remove("u1", 42).await);
        assert!(!store.remove("nobody", 42).await);

        assert!(store.add("u1", 42).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_user_has_no_favorites() {
        let store = offline_store();
        assert!(store.list("ghost").await.is_empty());
        assert!(store.list_with_details("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let store = offline_store();
        let mut ids = Vec::new();
        for book_id in 1..=20 {
            ids.push(store.add("u1", book_id).await.unwrap().id);
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let listed: Vec<u64> = store.list("u1").await.iter().map(|f| f.book_id).collect();
        assert_eq!(listed, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn counts_track_users_and_favorites() {
        let store = offline_store();
        store.add("u1", 1).await.unwrap();
        store.add("u1", 2).await.unwrap();
        store.add("u2", 1).await.unwrap();
        assert_eq!(
            store.counts().await,
            FavoriteCounts {
                total_users: 2,
                total_favorites: 3
            }
        );

        store.remove("u2", 1).await;
        assert_eq!(store.counts().await.total_users, 1);
    }

    #[tokio::test]
    async fn concurrent_adds_of_one_pair_yield_a_single_record() {
        let store = offline_store();
        let attempts = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.add("u1", 7).await })
        });

        let results = join_all(attempts).await;
        let created = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(created, 1);
        assert_eq!(store.list("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn details_skip_missing_and_failing_books() {
        let app = Router::new().route(
            "/books/{id}",
            get(|Path(id): Path<u64>| async move {
                match id {
                    2 => Err(StatusCode::NOT_FOUND),
                    3 => Err(StatusCode::INTERNAL_SERVER_ERROR),
                    _ => Ok(Json(make_book(id, 100))),
                }
            }),
        );
        let (base, server) = spawn_catalog(app).await;
        let client = GutendexClient::new(&base).unwrap();
        let store = FavoritesStore::new(CachedGutendexClient::new(client, DEFAULT_TTL));

        for book_id in [1, 2, 3, 4] {
            store.add("reader", book_id).await.unwrap();
        }

        let books = store.list_with_details("reader").await;
        let ids: Vec<u64> = books.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 4]);

        server.abort();
    }

    #[test]
    fn favorite_serializes_in_camel_case() {
        let fav = Favorite {
            id: 1_700_000_000_000,
            user_id: "u1".to_string(),
            book_id: 42,
            added_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };
        let json = serde_json::to_value(&fav).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["bookId"], 42);
        assert_eq!(json["addedAt"], "2023-11-14T22:13:20Z");
    }
}
