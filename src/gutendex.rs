use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const GUTENDEX_API_BASE: &str = "https://gutendex.com/books";

const MAX_BODY_SNIPPET: usize = 900;

#[derive(Debug, Clone)]
pub struct GutendexClient {
    client: Client,
    base_url: Url,
}

/// Failure talking to the catalog. `operation` is the cache tag of the call
/// ("search" or "book") so log lines and cache keys line up.
#[derive(Debug, Error)]
#[error("catalog {operation} request failed: {cause}")]
pub struct FetchFailure {
    pub operation: &'static str,
    #[source]
    pub cause: FetchCause,
}

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("invalid request url: {0}")]
    Url(String),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed JSON: {source}; body: {body}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl FetchFailure {
    fn new(operation: &'static str, cause: impl Into<FetchCause>) -> Self {
        Self {
            operation,
            cause: cause.into(),
        }
    }
}

impl GutendexClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid catalog base URL {base_url:?}: {e}"))?;
        Ok(Self {
            client: Client::new(),
            base_url: Self::normalize_base_url(base_url),
        })
    }

    fn normalize_base_url(mut base_url: Url) -> Url {
        if !base_url.path().ends_with('/') {
            let mut path = base_url.path().to_owned();
            path.push('/');
            base_url.set_path(&path);
        }
        base_url
    }

    fn search_url(&self, params: &SearchParams) -> Url {
        let mut url = self.base_url.clone();
        let pairs = params.query_pairs();
        if !pairs.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (key, value) in &pairs {
                qp.append_pair(key, value);
            }
        }
        url
    }

    fn book_url(&self, id: u64) -> Result<Url, FetchFailure> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchFailure::new("book", FetchCause::Url(self.base_url.to_string())))?
            .pop_if_empty()
            .push(&id.to_string());
        Ok(url)
    }

    pub async fn search(&self, params: &SearchParams) -> Result<SearchResult, FetchFailure> {
        let url = self.search_url(params);
        tracing::info!(%url, "fetching from catalog");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchFailure::new("search", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::new("search", e))?;

        if !status.is_success() {
            return Err(FetchFailure::new(
                "search",
                FetchCause::Status {
                    status,
                    body: truncate(&body, MAX_BODY_SNIPPET),
                },
            ));
        }

        decode("search", &body)
    }

    /// Fetch a single book. A 404 from the catalog is `Ok(None)`.
    pub async fn get_by_id(&self, id: u64) -> Result<Option<Book>, FetchFailure> {
        let url = self.book_url(id)?;
        tracing::info!(%url, "fetching book from catalog");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchFailure::new("book", e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::new("book", e))?;

        if !status.is_success() {
            return Err(FetchFailure::new(
                "book",
                FetchCause::Status {
                    status,
                    body: truncate(&body, MAX_BODY_SNIPPET),
                },
            ));
        }

        decode("book", &body).map(Some)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    body: &str,
) -> Result<T, FetchFailure> {
    serde_json::from_str(body).map_err(|source| {
        FetchFailure::new(
            operation,
            FetchCause::Decode {
                source,
                body: truncate(body, MAX_BODY_SNIPPET),
            },
        )
    })
}

/// Search filters. Field order is the canonical order used for both the
/// upstream query string and cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl SearchParams {
    pub fn page(page: u32) -> Self {
        Self {
            page: Some(page),
            ..Default::default()
        }
    }

    /// Drops values the catalog would treat as unset (page 0, empty strings)
    /// so equal requests share a cache key.
    pub fn normalized(self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }
        Self {
            page: self.page.filter(|p| *p > 0),
            search: keep(self.search),
            author: keep(self.author),
            title: keep(self.title),
            languages: keep(self.languages),
            topic: keep(self.topic),
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page.filter(|p| *p > 0) {
            pairs.push(("page", page.to_string()));
        }
        let text = [
            ("search", &self.search),
            ("author", &self.author),
            ("title", &self.title),
            ("languages", &self.languages),
            ("topic", &self.topic),
        ];
        for (key, value) in text {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                pairs.push((key, v.to_string()));
            }
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<Book>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<Person>,
    #[serde(default)]
    pub translators: Vec<Person>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub bookshelves: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<bool>,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub formats: BTreeMap<String, String>,
    #[serde(default)]
    pub download_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_year: Option<i32>,
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} bytes truncated)", &s[..end], s.len() - end)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::Router;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    pub fn make_book(id: u64, download_count: u64) -> Book {
        Book {
            id,
            title: format!("Test Book {id}"),
            authors: vec![Person {
                name: "Tester, Ada".to_string(),
                birth_year: Some(1815),
                death_year: Some(1852),
            }],
            translators: vec![],
            subjects: vec!["Fiction".to_string()],
            bookshelves: vec![],
            languages: vec!["en".to_string()],
            copyright: Some(false),
            media_type: "Text".to_string(),
            formats: BTreeMap::from([(
                "text/html".to_string(),
                format!("https://www.gutenberg.org/ebooks/{id}.html.images"),
            )]),
            download_count,
        }
    }

    /// Serves `app` on an ephemeral port, returning the catalog base URL.
    pub async fn spawn_catalog(app: Router) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service()).await;
        });
        (format!("http://{addr}/books"), handle)
    }
}
