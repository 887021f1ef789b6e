mod config;
mod favorites;
mod gutendex;
mod gutendex_cache;
mod logging;
mod popular;
mod routes;
mod server;
mod types;

use anyhow::Context;
use types::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load()?;
    logging::init(&config.environment_name);

    let state = AppState::from_config(&config).context("failed to build catalog client")?;

    // Periodically log cache statistics (disabled with STATS_LOG_SECS=0)
    let stats_interval = config.stats_log_interval;
    if !stats_interval.is_zero() {
        let catalog_stats = state.catalog.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(stats_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                catalog_stats.log_cache_info().await;
            }
        });
    }

    let router = routes::router(state, &config.cors_origins);

    tracing::info!(
        catalog = %config.catalog_base_url,
        environment = %config.environment_name,
        "endpoints: GET /health, GET /api/books, GET /api/books/{{id}}, \
         GET /api/books/popular/top, POST|DELETE /api/favorites, GET /api/favorites/{{userId}}"
    );

    server::serve(config.addr, router).await
}
