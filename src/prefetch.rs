use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::models::ImageRecord;
use crate::provider::{build_http_client, ProviderError};

const SCRAPERAPI_ENDPOINT: &str = "https://api.scraperapi.com/";
const SEARCH_PAGE: &str = "https://duckduckgo.com/";
const IMAGE_PROXY_HOST: &str = "external-content.duckduckgo.com";

/// Fetches a page's HTML by some route other than the provider API.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, target_url: &str) -> Result<String, ProviderError>;
}

/// Fetches pages through ScraperAPI's rendering endpoint.
#[derive(Debug, Clone)]
pub struct ScraperApi {
    api_key: String,
    timeout: Duration,
    verify_tls: bool,
}

impl ScraperApi {
    pub fn new(api_key: impl Into<String>, timeout: Duration, verify_tls: bool) -> Self {
        Self {
            api_key: api_key.into(),
            timeout,
            verify_tls,
        }
    }
}

#[async_trait]
impl PageFetcher for ScraperApi {
    async fn fetch_page(&self, target_url: &str) -> Result<String, ProviderError> {
        let client = build_http_client(self.timeout, self.verify_tls, None)?;
        let response = client
            .get(SCRAPERAPI_ENDPOINT)
            .query(&[("api_key", self.api_key.as_str()), ("url", target_url)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Upstream(response.status().as_u16()));
        }

        Ok(response.text().await?)
    }
}

pub fn search_page_url(query: &str) -> String {
    match Url::parse_with_params(SEARCH_PAGE, &[("q", query), ("iax", "images"), ("ia", "images")])
    {
        Ok(url) => url.to_string(),
        Err(_) => SEARCH_PAGE.to_string(),
    }
}

// ── HTML image scraping ──────────────────────────────────────────────────────

/// Collects up to `limit` distinct image URLs from a rendered search page.
pub fn extract_page_images(html: &str, page_url: &str, limit: usize) -> Vec<ImageRecord> {
    let document = Html::parse_document(html);
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let page_host = base.host_str().unwrap_or("").to_lowercase();
    let img_sel = Selector::parse("img").unwrap();

    let mut images: Vec<ImageRecord> = Vec::new();
    for el in document.select(&img_sel) {
        if images.len() >= limit {
            break;
        }
        let Some(src) = resolve_img_src(el, &base) else {
            continue;
        };
        let Some(url) = unwrap_image_proxy(&src) else {
            continue;
        };
        if !is_content_image(&url, &page_host) || images.iter().any(|i| i.url == url) {
            continue;
        }

        let mut record = ImageRecord::new(url.clone());
        record.title = el
            .value()
            .attr("alt")
            .map(|a| a.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        record.source = Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        if src != url {
            record.thumbnail = Some(src);
        }
        images.push(record);
    }
    images
}

fn resolve_img_src(el: ElementRef<'_>, base_url: &Url) -> Option<String> {
    let v = el.value();

    // Priority: data-src → src → srcset.
    let src: Option<String> = v
        .attr("data-src")
        .or_else(|| v.attr("src"))
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
        .or_else(|| {
            v.attr("srcset")
                .or_else(|| v.attr("data-srcset"))
                .and_then(best_src_from_srcset)
        });

    let src = src?;
    if src.starts_with("data:") {
        return None;
    }
    base_url.join(&src).ok().map(|u| u.to_string())
}

fn best_src_from_srcset(srcset: &str) -> Option<String> {
    let mut candidates: Vec<(f64, usize, String)> = Vec::new();

    for (index, part) in srcset.split(',').enumerate() {
        let pieces: Vec<&str> = part.split_whitespace().collect();
        let Some(url) = pieces.first() else {
            continue;
        };
        let score: f64 = match pieces.get(1) {
            Some(desc) if desc.ends_with('w') || desc.ends_with('x') => {
                desc[..desc.len() - 1].parse().unwrap_or(0.0)
            }
            _ => 0.0,
        };
        candidates.push((score, index, url.to_string()));
    }

    candidates.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
    candidates.last().map(|(_, _, url)| url.clone())
}

/// DuckDuckGo serves thumbnails through its image proxy with the original
/// location in the `u` parameter.
fn unwrap_image_proxy(src: &str) -> Option<String> {
    let url = Url::parse(src).ok()?;
    if url.host_str() == Some(IMAGE_PROXY_HOST) {
        return url
            .query_pairs()
            .find(|(k, _)| k == "u")
            .map(|(_, v)| v.into_owned())
            .filter(|v| v.starts_with("http"));
    }
    Some(src.to_string())
}

fn is_content_image(url: &str, page_host: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let host = parsed.host_str().unwrap_or("").to_lowercase();
    if host.is_empty() || host == page_host || host.ends_with(&format!(".{page_host}")) {
        return false;
    }
    !parsed.path().to_lowercase().ends_with(".svg")
}
