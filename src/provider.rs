use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

// ── Constants ────────────────────────────────────────────────────────────────

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const DDG_BASE: &str = "https://duckduckgo.com";
const SERPAPI_BASE: &str = "https://serpapi.com";
const MAX_PAGES: usize = 5;

static VQD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"vqd=["']?([\d-]+)["']?"#).unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    Request(String),
    #[error("provider returned HTTP {0}")]
    Upstream(u16),
    #[error("search token not found in provider response")]
    MissingToken,
    #[error("unexpected provider payload: {0}")]
    Decode(String),
    #[error("no SerpAPI key available")]
    NoApiKey,
    #[error("SerpAPI error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Request(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            ProviderError::Request(format!("ConnectError: {}", e))
        } else if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Request(format!("RequestError: {}", e))
        }
    }
}

// ── Provider capability ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub max_results: usize,
    pub region: String,
    pub safesearch: String,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub proxy: Option<String>,
    /// Caller-supplied key; wins over any key the backend was built with.
    pub api_key: Option<String>,
}

/// One image as reported by the provider. Every field may be missing.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawImage {
    pub image: Option<String>,
    pub title: Option<String>,
    pub source: Option<String>,
    pub thumbnail: Option<String>,
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[async_trait]
pub trait ImageSearchProvider: Send + Sync {
    /// Ordered raw records for `query`, at most `options.max_results` of them.
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RawImage>, ProviderError>;
}

// ── HTTP client ──────────────────────────────────────────────────────────────

pub fn build_http_client(
    timeout: Duration,
    verify_tls: bool,
    proxy: Option<&str>,
) -> Result<reqwest::Client, ProviderError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(
            "text/html,application/json,application/xhtml+xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
    );

    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5).min(timeout))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(USER_AGENT)
        .default_headers(headers);

    if !verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| ProviderError::Request(format!("ProxyError: {}", e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ProviderError::Request(e.to_string()))
}

// ── DuckDuckGo backend ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    results: Vec<RawImage>,
    next: Option<String>,
}

/// Image search against DuckDuckGo's JSON image endpoint.
#[derive(Debug, Clone)]
pub struct DuckDuckGo {
    base_url: String,
}

impl Default for DuckDuckGo {
    fn default() -> Self {
        Self::new()
    }
}

impl DuckDuckGo {
    pub fn new() -> Self {
        Self {
            base_url: DDG_BASE.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_token(
        &self,
        client: &reqwest::Client,
        query: &str,
    ) -> Result<String, ProviderError> {
        let response = client
            .get(&self.base_url)
            .query(&[("q", query), ("iax", "images"), ("ia", "images")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Upstream(response.status().as_u16()));
        }

        let body = response.text().await?;
        extract_vqd(&body).ok_or(ProviderError::MissingToken)
    }
}

#[async_trait]
impl ImageSearchProvider for DuckDuckGo {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RawImage>, ProviderError> {
        let client = build_http_client(
            options.timeout,
            options.verify_tls,
            options.proxy.as_deref(),
        )?;
        let vqd = self.fetch_token(&client, query).await?;
        debug!(query = %query, "obtained search token");

        let safesearch = safesearch_code(&options.safesearch);
        let mut url = format!("{}/i.js", self.base_url);
        let mut first_page = true;
        let mut images: Vec<RawImage> = Vec::new();

        for _ in 0..MAX_PAGES {
            let mut request = client
                .get(&url)
                .header(reqwest::header::REFERER, format!("{}/", self.base_url));
            if first_page {
                request = request.query(&[
                    ("l", options.region.as_str()),
                    ("o", "json"),
                    ("q", query),
                    ("vqd", vqd.as_str()),
                    ("f", ",,,,,"),
                    ("p", safesearch),
                ]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(ProviderError::Upstream(response.status().as_u16()));
            }
            let page: ImagePage = response.json().await?;

            images.extend(page.results);
            if images.len() >= options.max_results {
                break;
            }

            match page.next.filter(|n| !n.is_empty()) {
                Some(next) => {
                    url = next_page_url(&self.base_url, &next, &vqd);
                    first_page = false;
                }
                None => break,
            }
        }

        images.truncate(options.max_results);
        Ok(images)
    }
}

// ── SerpAPI backend ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct SerpApiResponse {
    error: Option<String>,
    #[serde(default)]
    images_results: Vec<SerpApiImage>,
    search_information: Option<SearchInformation>,
}

#[derive(Debug, Default, Deserialize)]
struct SerpApiImage {
    original: Option<String>,
    title: Option<String>,
    source: Option<String>,
    thumbnail: Option<String>,
    original_width: Option<u32>,
    original_height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchInformation {
    image_results_state: Option<String>,
}

/// Google Images through SerpAPI's `search.json`.
///
/// Server-side keys are used round-robin; a key in [`SearchOptions::api_key`]
/// takes precedence for that call.
#[derive(Debug)]
pub struct SerpApi {
    base_url: String,
    keys: Vec<String>,
    next_key: AtomicUsize,
}

impl SerpApi {
    pub fn new(keys: Vec<String>) -> Self {
        Self::with_base_url(SERPAPI_BASE, keys)
    }

    pub fn with_base_url(base_url: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            keys,
            next_key: AtomicUsize::new(0),
        }
    }

    fn pick_key(&self, requested: Option<&str>) -> Option<String> {
        if let Some(key) = requested.filter(|k| !k.is_empty()) {
            return Some(key.to_string());
        }
        if self.keys.is_empty() {
            return None;
        }
        let index = self.next_key.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(self.keys[index].clone())
    }
}

#[async_trait]
impl ImageSearchProvider for SerpApi {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RawImage>, ProviderError> {
        let api_key = self
            .pick_key(options.api_key.as_deref())
            .ok_or(ProviderError::NoApiKey)?;
        let client = build_http_client(
            options.timeout,
            options.verify_tls,
            options.proxy.as_deref(),
        )?;

        let num = options.max_results.to_string();
        let response = client
            .get(format!("{}/search.json", self.base_url))
            .query(&[
                ("engine", "google_images"),
                ("q", query),
                ("api_key", api_key.as_str()),
                ("num", num.as_str()),
                ("safe", serpapi_safe(&options.safesearch)),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: SerpApiResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(ProviderError::Upstream(status.as_u16())),
            Err(e) => return Err(e.into()),
        };
        let images = serpapi_images(body)?;
        debug!(query = %query, count = images.len(), "serpapi page decoded");

        Ok(images.into_iter().take(options.max_results).collect())
    }
}

/// Maps a decoded SerpAPI body to raw records. An "empty results" answer is
/// an empty list, any other reported error is [`ProviderError::Api`].
fn serpapi_images(body: SerpApiResponse) -> Result<Vec<RawImage>, ProviderError> {
    let fully_empty = body
        .search_information
        .and_then(|info| info.image_results_state)
        .is_some_and(|state| state.eq_ignore_ascii_case("fully empty"));
    if let Some(error) = body.error {
        if fully_empty || error.to_lowercase().contains("hasn't returned any results") {
            return Ok(Vec::new());
        }
        return Err(ProviderError::Api(error));
    }
    if fully_empty {
        return Ok(Vec::new());
    }

    Ok(body
        .images_results
        .into_iter()
        .map(|img| RawImage {
            image: img.original.or_else(|| img.thumbnail.clone()),
            title: img.title,
            source: img.source,
            thumbnail: img.thumbnail,
            url: None,
            width: img.original_width,
            height: img.original_height,
        })
        .collect())
}

fn serpapi_safe(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "off" => "off",
        _ => "active",
    }
}

fn extract_vqd(body: &str) -> Option<String> {
    VQD_RE.captures(body).map(|cap| cap[1].to_string())
}

fn safesearch_code(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "off" => "-1",
        _ => "1",
    }
}

fn next_page_url(base_url: &str, next: &str, vqd: &str) -> String {
    let path = next.trim_start_matches('/');
    if path.contains("vqd=") {
        format!("{}/{}", base_url, path)
    } else {
        format!("{}/{}&vqd={}", base_url, path, vqd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_vqd_from_script_assignments() {
        assert_eq!(
            extract_vqd(r#"...;vqd="4-123456789012345678901234567890";..."#).as_deref(),
            Some("4-123456789012345678901234567890")
        );
        assert_eq!(
            extract_vqd("nrj('/d.js?q=cats&vqd=4-42&p=1')").as_deref(),
            Some("4-42")
        );
        assert!(extract_vqd("<html>nothing here</html>").is_none());
    }

    #[test]
    fn maps_safesearch_levels() {
        assert_eq!(safesearch_code("moderate"), "1");
        assert_eq!(safesearch_code("on"), "1");
        assert_eq!(safesearch_code("OFF"), "-1");
    }

    #[test]
    fn next_page_keeps_or_appends_token() {
        assert_eq!(
            next_page_url(DDG_BASE, "i.js?q=cat&s=100&vqd=4-1", "4-9"),
            "https://duckduckgo.com/i.js?q=cat&s=100&vqd=4-1"
        );
        assert_eq!(
            next_page_url(DDG_BASE, "/i.js?q=cat&s=100", "4-9"),
            "https://duckduckgo.com/i.js?q=cat&s=100&vqd=4-9"
        );
    }

    #[test]
    fn decodes_image_page_with_missing_fields() {
        let page: ImagePage = serde_json::from_str(
            r#"{"results":[{"image":"https://x/1.jpg","title":"One","width":640},{"title":"no image"}],"next":null}"#,
        )
        .unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].image.as_deref(), Some("https://x/1.jpg"));
        assert_eq!(page.results[0].width, Some(640));
        assert!(page.results[0].source.is_none());
        assert!(page.results[1].image.is_none());
        assert!(page.next.is_none());
    }

    fn serpapi_body(json: &str) -> SerpApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn serpapi_maps_original_then_thumbnail() {
        let images = serpapi_images(serpapi_body(
            r#"{"images_results":[
                {"original":"https://x/full.jpg","title":"Full","source":"x.com","thumbnail":"https://t/1.jpg","original_width":800},
                {"title":"Thumb only","thumbnail":"https://t/2.jpg"},
                {"title":"Nothing"}
            ]}"#,
        ))
        .unwrap();

        assert_eq!(images.len(), 3);
        assert_eq!(images[0].image.as_deref(), Some("https://x/full.jpg"));
        assert_eq!(images[0].source.as_deref(), Some("x.com"));
        assert_eq!(images[0].thumbnail.as_deref(), Some("https://t/1.jpg"));
        assert_eq!(images[0].width, Some(800));
        assert_eq!(images[1].image.as_deref(), Some("https://t/2.jpg"));
        assert!(images[2].image.is_none());
    }

    #[test]
    fn serpapi_empty_state_is_not_an_error() {
        let body = serpapi_body(r#"{"search_information":{"image_results_state":"Fully empty"}}"#);
        assert!(serpapi_images(body).unwrap().is_empty());

        let body = serpapi_body(r#"{"error":"Google hasn't returned any results for this query."}"#);
        assert!(serpapi_images(body).unwrap().is_empty());
    }

    #[test]
    fn serpapi_reports_other_errors() {
        let err = serpapi_images(serpapi_body(r#"{"error":"Invalid API key."}"#)).unwrap_err();
        assert!(matches!(err, ProviderError::Api(msg) if msg == "Invalid API key."));
    }

    #[test]
    fn serpapi_prefers_request_key_and_rotates_configured_ones() {
        let serpapi = SerpApi::new(vec!["one".into(), "two".into()]);
        assert_eq!(serpapi.pick_key(Some("mine")).as_deref(), Some("mine"));
        assert_eq!(serpapi.pick_key(None).as_deref(), Some("one"));
        assert_eq!(serpapi.pick_key(None).as_deref(), Some("two"));
        assert_eq!(serpapi.pick_key(Some("")).as_deref(), Some("one"));

        assert!(SerpApi::new(Vec::new()).pick_key(None).is_none());
    }

    #[tokio::test]
    async fn serpapi_without_any_key_fails_before_sending() {
        let options = SearchOptions {
            max_results: 3,
            region: "us-en".into(),
            safesearch: "moderate".into(),
            timeout: Duration::from_secs(1),
            verify_tls: true,
            proxy: None,
            api_key: None,
        };
        let err = SerpApi::with_base_url("http://127.0.0.1:9", Vec::new())
            .search("cat", &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoApiKey));
    }

    #[test]
    fn maps_serpapi_safe_levels() {
        assert_eq!(serpapi_safe("moderate"), "active");
        assert_eq!(serpapi_safe("Off"), "off");
    }

    #[test]
    fn rejects_malformed_proxy() {
        let err = build_http_client(Duration::from_secs(1), true, Some("::not a proxy::"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Request(msg) if msg.starts_with("ProxyError")));
    }

    #[test]
    fn builds_client_with_proxy_and_insecure_tls() {
        assert!(build_http_client(Duration::from_secs(1), false, Some("http://127.0.0.1:9")).is_ok());
    }
}
