use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use crate::favorites::{Favorite, FavoriteError};
use crate::types::AppState;

const MISSING_FIELDS: &str = "userId and bookId are required";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRequest {
    user_id: Option<String>,
    book_id: Option<u64>,
}

impl FavoriteRequest {
    /// Both fields must be present and non-empty; a book id of 0 counts as missing.
    fn validate(body: Result<Json<FavoriteRequest>, JsonRejection>) -> ApiResult<(String, u64)> {
        let Ok(Json(request)) = body else {
            return Err(ApiError::Validation(MISSING_FIELDS));
        };
        match (request.user_id, request.book_id) {
            (Some(user_id), Some(book_id)) if !user_id.is_empty() && book_id != 0 => {
                Ok((user_id, book_id))
            }
            _ => Err(ApiError::Validation(MISSING_FIELDS)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Message {
    message: &'static str,
}

pub async fn add(
    State(state): State<AppState>,
    body: Result<Json<FavoriteRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Favorite>)> {
    let (user_id, book_id) = FavoriteRequest::validate(body)?;
    tracing::info!(user_id = %user_id, book_id, "add to favorites request");

    let favorite = state
        .favorites
        .add(&user_id, book_id)
        .await
        .map_err(|err| match err {
            FavoriteError::Duplicate => ApiError::Conflict("Book already in favorites"),
        })?;

    Ok((StatusCode::CREATED, Json(favorite)))
}

pub async fn remove(
    State(state): State<AppState>,
    body: Result<Json<FavoriteRequest>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    let (user_id, book_id) = FavoriteRequest::validate(body)?;
    tracing::info!(user_id = %user_id, book_id, "remove from favorites request");

    if !state.favorites.remove(&user_id, book_id).await {
        return Err(ApiError::NotFound("Favorite not found"));
    }

    Ok(Json(Message {
        message: "Removed from favorites",
    }))
}

pub async fn list(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Response {
    let include_details = query.details.as_deref() == Some("true");
    tracing::info!(user_id = %user_id, include_details, "get user favorites request");

    if include_details {
        Json(state.favorites.list_with_details(&user_id).await).into_response()
    } else {
        Json(state.favorites.list(&user_id).await).into_response()
    }
}
