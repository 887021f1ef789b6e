use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::favorites::FavoriteCounts;
use crate::gutendex_cache::CacheStats;
use crate::popular::PopularStats;
use crate::types::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    #[serde(flatten)]
    pub favorites: FavoriteCounts,
    #[serde(flatten)]
    pub popular: PopularStats,
    pub cache_stats: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub stats: ServiceStats,
}

pub async fn collect_stats(state: &AppState) -> ServiceStats {
    ServiceStats {
        favorites: state.favorites.counts().await,
        popular: state.popular.stats().await,
        cache_stats: state.catalog.stats().await,
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        timestamp: Utc::now(),
        stats: collect_stats(&state).await,
    })
}
