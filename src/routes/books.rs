use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use crate::gutendex::{Book, SearchParams, SearchResult};
use crate::popular::PopularBook;
use crate::types::AppState;

const DEFAULT_POPULAR_LIMIT: usize = 10;

/// Raw query strings; numeric fields are parsed leniently below.
#[derive(Debug, Default, Deserialize)]
pub struct BooksQuery {
    page: Option<String>,
    search: Option<String>,
    author: Option<String>,
    title: Option<String>,
    languages: Option<String>,
    topic: Option<String>,
}

impl BooksQuery {
    fn into_params(self) -> SearchParams {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<u32>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1);

        SearchParams {
            page: Some(page),
            search: self.search,
            author: self.author,
            title: self.title,
            languages: self.languages,
            topic: self.topic,
        }
        .normalized()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PopularQuery {
    limit: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<BooksQuery>,
) -> ApiResult<Json<SearchResult>> {
    let params = query.into_params();
    tracing::info!(?params, "books search request");

    let result = state
        .catalog
        .search(&params)
        .await
        .map_err(|err| ApiError::internal(state.environment, "Failed to fetch books", &err))?;

    Ok(Json(result.as_ref().clone()))
}

pub async fn get_book(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Book>> {
    let book_id: u64 = raw_id
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation("Invalid book ID"))?;
    tracing::info!(book_id, "single book request");

    let book = state
        .catalog
        .get_by_id(book_id)
        .await
        .map_err(|err| ApiError::internal(state.environment, "Failed to fetch book", &err))?
        .ok_or(ApiError::NotFound("Book not found"))?;

    Ok(Json(book.as_ref().clone()))
}

pub async fn popular(
    State(state): State<AppState>,
    Query(query): Query<PopularQuery>,
) -> Json<Vec<PopularBook>> {
    let limit = popular_limit(query.limit.as_deref());
    tracing::info!(limit, "popular books request");

    Json(state.popular.get(limit).await)
}

/// Negative limits clamp to zero; anything unparseable falls back to the default.
fn popular_limit(raw: Option<&str>) -> usize {
    raw.and_then(|l| l.trim().parse::<i64>().ok())
        .map(|l| usize::try_from(l.max(0)).unwrap_or(usize::MAX))
        .unwrap_or(DEFAULT_POPULAR_LIMIT)
}
