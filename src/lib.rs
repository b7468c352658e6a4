//! Keyword → image URL search over DuckDuckGo or SerpAPI, with a fixed
//! fallback ladder of proxied and paced attempts.
//!
//! [`client::ImageSearchClient`] searches one query, [`batch::BatchOrchestrator`]
//! runs it over a keyword list, and [`handler::router`] exposes both over HTTP.

pub mod batch;
pub mod client;
pub mod config;
pub mod handler;
pub mod models;
pub mod prefetch;
pub mod provider;
pub mod strategy;

pub use batch::BatchOrchestrator;
pub use client::{ClientSettings, ImageSearchClient};
pub use config::Config;
pub use models::{BatchResult, ImageRecord, SearchResult};
pub use provider::{ImageSearchProvider, ProviderError, SearchOptions};

/// Installs the fmt subscriber, honoring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
