use crate::config::{Config, Environment};
use crate::favorites::FavoritesStore;
use crate::gutendex::GutendexClient;
use crate::gutendex_cache::CachedGutendexClient;
use crate::popular::PopularBooks;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: CachedGutendexClient,
    pub favorites: FavoritesStore,
    pub popular: PopularBooks,
    pub environment: Environment,
}

impl AppState {
    pub fn new(catalog: CachedGutendexClient, config: &Config) -> Self {
        Self {
            favorites: FavoritesStore::new(catalog.clone()),
            popular: PopularBooks::new(catalog.clone(), config.popular.clone()),
            catalog,
            environment: config.environment,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = GutendexClient::new(&config.catalog_base_url)?;
        let catalog = CachedGutendexClient::new(client, config.cache_ttl);
        Ok(Self::new(catalog, config))
    }
}
