use std::sync::Arc;

use keyword_image_search::{
    handler::{self, AppState},
    init_tracing, BatchOrchestrator, Config, ImageSearchClient,
};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        provider = ?config.provider,
        serpapi_keys = config.serpapi_keys.len(),
        premium_proxy = config.proxies.has_premium(),
        plain_proxies = config.proxies.proxy_urls.len(),
        timeout_secs = config.timeout.as_secs(),
        verify_tls = config.verify_tls,
        "configuration loaded"
    );

    let client = ImageSearchClient::from_config(&config);
    let state = Arc::new(AppState {
        orchestrator: BatchOrchestrator::new(client),
    });
    let app = handler::router(state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("listening on {}", addr);
    }
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}
