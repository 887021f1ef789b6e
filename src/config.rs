use anyhow::{Context, Result, anyhow};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::gutendex::GUTENDEX_API_BASE;
use crate::popular::PopularConfig;

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://localhost:5174",
    "http://localhost:4173",
    "https://book-explorer-green.vercel.app",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Other,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            _ => Environment::Other,
        }
    }

    /// Whether 500 responses may carry the underlying error text.
    pub fn exposes_error_details(self) -> bool {
        self == Environment::Development
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub environment_name: String,
    pub addr: SocketAddr,
    pub catalog_base_url: String,
    pub cache_ttl: Duration,
    pub popular: PopularConfig,
    pub cors_origins: Vec<String>,
    pub stats_log_interval: Duration,
}

/// Name of the running mode, read before the mode-specific dotenv file.
pub fn environment_name(lookup: impl Fn(&str) -> Option<String>) -> String {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    non_empty("APP_ENV")
        .or_else(|| non_empty("NODE_ENV"))
        .unwrap_or_else(|| "production".to_string())
}

/// Loads `.env`, then `.env.<mode>.local`, then reads the process environment.
pub fn load() -> Result<Config> {
    // Missing dotenv files are fine; real env vars always win.
    let _ = dotenvy::dotenv();
    let mode = environment_name(|key| std::env::var(key).ok());
    let _ = dotenvy::from_filename(format!(".env.{mode}.local"));

    Config::from_lookup(|key| std::env::var(key).ok())
}

impl Config {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let environment_name = environment_name(&lookup);

        let port: u16 = parse_or(&lookup, "PORT", 3001)?;
        let ip: IpAddr = parse_or(&lookup, "BIND_ADDR", IpAddr::from([0, 0, 0, 0]))?;

        let catalog_base_url =
            lookup("CATALOG_BASE_URL").unwrap_or_else(|| GUTENDEX_API_BASE.to_string());

        let cache_ttl = Duration::from_secs(parse_or(&lookup, "CACHE_TTL_SECS", 600)?);

        let popular = PopularConfig {
            refresh_interval: Duration::from_secs(parse_or(
                &lookup,
                "POPULAR_REFRESH_SECS",
                3600,
            )?),
            page_window: parse_or(&lookup, "POPULAR_PAGES", 5)?,
            top_n: parse_or(&lookup, "POPULAR_TOP", 50)?,
        };
        if popular.page_window == 0 {
            return Err(anyhow!("POPULAR_PAGES must be at least 1"));
        }

        let cors_origins = match lookup("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect(),
        };

        let stats_log_interval = Duration::from_secs(parse_or(&lookup, "STATS_LOG_SECS", 300)?);

        Ok(Config {
            environment: Environment::parse(&environment_name),
            environment_name,
            addr: SocketAddr::new(ip, port),
            catalog_base_url,
            cache_ttl,
            popular,
            cors_origins,
            stats_log_interval,
        })
    }
}

fn parse_or<T>(lookup: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
