use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{Config, ProviderChoice, ProxyConfig, REGION, SAFESEARCH};
use crate::models::{ImageRecord, SearchResult};
use crate::prefetch::{self, PageFetcher, ScraperApi};
use crate::provider::{DuckDuckGo, ImageSearchProvider, RawImage, SearchOptions, SerpApi};
use crate::strategy::{default_ladder, Jitter, Route, Strategy};

/// Everything an [`ImageSearchClient`] needs besides its backends.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub proxies: ProxyConfig,
    pub ladder: Vec<Strategy>,
    pub jitter: Jitter,
    pub timeout: Duration,
    pub verify_tls: bool,
    pub region: String,
    pub safesearch: String,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ladder: default_ladder(&config.proxies),
            proxies: config.proxies.clone(),
            jitter: Jitter::default(),
            timeout: config.timeout,
            verify_tls: config.verify_tls,
            region: REGION.to_string(),
            safesearch: SAFESEARCH.to_string(),
        }
    }
}

/// Searches one query through the strategy ladder, never failing outright.
#[derive(Clone)]
pub struct ImageSearchClient {
    provider: Arc<dyn ImageSearchProvider>,
    prefetcher: Option<Arc<dyn PageFetcher>>,
    settings: ClientSettings,
}

impl ImageSearchClient {
    pub fn new(provider: Arc<dyn ImageSearchProvider>, settings: ClientSettings) -> Self {
        Self {
            provider,
            prefetcher: None,
            settings,
        }
    }

    /// Client backed by the configured provider, with the ScraperAPI pre-pass
    /// enabled when a premium key is configured.
    pub fn from_config(config: &Config) -> Self {
        let settings = ClientSettings::from_config(config);
        let prefetcher = config.proxies.scraperapi_key.as_ref().map(|key| {
            Arc::new(ScraperApi::new(key.clone(), config.timeout, config.verify_tls))
                as Arc<dyn PageFetcher>
        });
        let provider: Arc<dyn ImageSearchProvider> = match config.provider {
            ProviderChoice::DuckDuckGo => Arc::new(DuckDuckGo::new()),
            ProviderChoice::SerpApi => Arc::new(SerpApi::new(config.serpapi_keys.clone())),
        };
        Self {
            provider,
            prefetcher,
            settings,
        }
    }

    pub fn with_prefetcher(mut self, prefetcher: Arc<dyn PageFetcher>) -> Self {
        self.prefetcher = Some(prefetcher);
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub async fn search(&self, query: &str, max_results: usize) -> SearchResult {
        self.search_with_key(query, max_results, None).await
    }

    /// Like [`search`](Self::search), handing `api_key` to the provider on
    /// every attempt.
    pub async fn search_with_key(
        &self,
        query: &str,
        max_results: usize,
        api_key: Option<&str>,
    ) -> SearchResult {
        info!(
            query = %query,
            max_results,
            caller_key = api_key.is_some(),
            "image search started"
        );

        if let Some(images) = self.prefetch(query, max_results).await {
            info!(query = %query, count = images.len(), "pre-pass found images");
            return SearchResult::found(query, images, 0);
        }

        let mut tried = 0;
        for (index, strategy) in self.settings.ladder.iter().enumerate() {
            let attempt = index + 1;

            let proxy = match strategy.resolve_proxy(&self.settings.proxies) {
                Route::Direct => None,
                Route::Proxy(url) => Some(url),
                Route::Unavailable => {
                    debug!(attempt, ?strategy, "no proxy available, skipping");
                    continue;
                }
            };

            if strategy.delay {
                let pause = self.settings.jitter.sample();
                debug!(attempt, pause_ms = pause.as_millis() as u64, "pacing before attempt");
                tokio::time::sleep(pause).await;
            }

            tried += 1;
            let options = self.options(max_results, proxy, api_key);
            match self.provider.search(query, &options).await {
                Ok(raw) => {
                    let images = normalize(raw);
                    if !images.is_empty() {
                        info!(query = %query, attempt, count = images.len(), "image search succeeded");
                        return SearchResult::found(query, images, attempt);
                    }
                    warn!(query = %query, attempt, ?strategy, "provider returned no images");
                }
                Err(e) => {
                    warn!(query = %query, attempt, ?strategy, error = %e, "provider attempt failed");
                }
            }
        }

        warn!(query = %query, tried, "all strategies exhausted");
        SearchResult::failed(
            query,
            format!(
                "No images found for '{}' after {} attempts (the provider may be blocking requests)",
                query, tried
            ),
        )
    }

    async fn prefetch(&self, query: &str, max_results: usize) -> Option<Vec<ImageRecord>> {
        let fetcher = self.prefetcher.as_ref()?;
        let page_url = prefetch::search_page_url(query);
        match fetcher.fetch_page(&page_url).await {
            Ok(html) => {
                let images = prefetch::extract_page_images(&html, &page_url, max_results);
                if images.is_empty() {
                    debug!(query = %query, "pre-pass page had no parsable images");
                    None
                } else {
                    Some(images)
                }
            }
            Err(e) => {
                warn!(query = %query, error = %e, "pre-pass fetch failed");
                None
            }
        }
    }

    fn options(
        &self,
        max_results: usize,
        proxy: Option<String>,
        api_key: Option<&str>,
    ) -> SearchOptions {
        SearchOptions {
            max_results,
            region: self.settings.region.clone(),
            safesearch: self.settings.safesearch.clone(),
            timeout: self.settings.timeout,
            verify_tls: self.settings.verify_tls,
            proxy,
            api_key: api_key.map(str::to_string),
        }
    }
}

/// Keeps records with a usable image URL, in provider order.
fn normalize(raw: Vec<RawImage>) -> Vec<ImageRecord> {
    raw.into_iter()
        .filter_map(|r| {
            let url = r.image.filter(|u| !u.trim().is_empty())?;
            Some(ImageRecord {
                url,
                title: r.title.unwrap_or_default(),
                source: r.source.unwrap_or_default(),
                thumbnail: r.thumbnail.filter(|t| !t.is_empty()),
                width: r.width,
                height: r.height,
            })
        })
        .collect()
}
