use std::time::Duration;

use tracing::info;

use crate::client::ImageSearchClient;
use crate::models::{BatchResult, KeywordResults};

pub const DEFAULT_MAX_KEYWORDS: usize = 10;
pub const DEFAULT_MAX_RESULTS: usize = 3;
const DEFAULT_KEYWORD_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the client over a keyword list, one keyword at a time.
#[derive(Clone)]
pub struct BatchOrchestrator {
    client: ImageSearchClient,
    interval: Duration,
}

impl BatchOrchestrator {
    pub fn new(client: ImageSearchClient) -> Self {
        Self {
            client,
            interval: DEFAULT_KEYWORD_INTERVAL,
        }
    }

    /// Pause between consecutive keywords.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn client(&self) -> &ImageSearchClient {
        &self.client
    }

    /// Batch `success` is always true; per-keyword failures live in `results`.
    pub async fn run<S: AsRef<str>>(
        &self,
        keywords: &[S],
        max_keywords: usize,
        max_results_per_keyword: usize,
    ) -> BatchResult {
        self.run_with_key(keywords, max_keywords, max_results_per_keyword, None)
            .await
    }

    pub async fn run_with_key<S: AsRef<str>>(
        &self,
        keywords: &[S],
        max_keywords: usize,
        max_results_per_keyword: usize,
        api_key: Option<&str>,
    ) -> BatchResult {
        let keywords = if keywords.len() > max_keywords {
            info!(
                requested = keywords.len(),
                max_keywords, "keyword list truncated, processing only the first entries"
            );
            &keywords[..max_keywords]
        } else {
            keywords
        };

        let mut results = KeywordResults::default();
        for (index, keyword) in keywords.iter().enumerate() {
            if index > 0 && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
            let keyword = keyword.as_ref();
            let result = self
                .client
                .search_with_key(keyword, max_results_per_keyword, api_key)
                .await;
            results.insert(keyword.to_string(), result);
        }

        let batch = BatchResult {
            success: true,
            total_keywords: keywords.len(),
            results,
        };
        info!(
            keywords = batch.total_keywords,
            images = batch.total_images(),
            "batch finished"
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{test_settings, StubProvider};
    use crate::config::ProxyConfig;
    use std::sync::Arc;

    fn orchestrator(provider: Arc<StubProvider>) -> BatchOrchestrator {
        let client = ImageSearchClient::new(provider, test_settings(ProxyConfig::default()));
        BatchOrchestrator::new(client).with_interval(Duration::ZERO)
    }

    #[tokio::test]
    async fn truncates_to_max_keywords() {
        let provider = Arc::new(StubProvider::returning(1));
        let batch = orchestrator(provider.clone()).run(&["a", "b", "c"], 2, 3).await;

        assert_eq!(batch.total_keywords, 2);
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(batch.results.get("c").is_none());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn preserves_input_order() {
        let provider = Arc::new(StubProvider::returning(2));
        let keywords = vec!["zucchini".to_string(), "apple".to_string(), "mango".to_string()];
        let batch = orchestrator(provider).run(&keywords[..], 10, 3).await;

        assert_eq!(batch.results.len(), 3);
        assert_eq!(
            batch.results.keys().collect::<Vec<_>>(),
            vec!["zucchini", "apple", "mango"]
        );
        assert_eq!(batch.total_images(), 6);
        for (keyword, result) in batch.results.iter() {
            assert_eq!(result.query, keyword);
            assert_eq!(result.count, 2);
        }
    }

    #[tokio::test]
    async fn batch_succeeds_even_when_every_keyword_fails() {
        // The batch-level flag does not reflect per-keyword outcomes.
        let provider = Arc::new(StubProvider::failing());
        let batch = orchestrator(provider).run(&["a", "b"], 10, 3).await;

        assert!(batch.success);
        assert!(batch.results.iter().all(|(_, r)| !r.success));
        assert_eq!(batch.total_images(), 0);
    }

    #[tokio::test]
    async fn empty_keyword_list_yields_empty_batch() {
        let provider = Arc::new(StubProvider::returning(1));
        let batch = orchestrator(provider.clone()).run::<&str>(&[], 10, 3).await;

        assert!(batch.success);
        assert_eq!(batch.total_keywords, 0);
        assert!(batch.results.is_empty());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_keywords_keep_first_position() {
        let provider = Arc::new(StubProvider::returning(1));
        let batch = orchestrator(provider.clone()).run(&["a", "b", "a"], 10, 3).await;

        assert_eq!(batch.total_keywords, 3);
        assert_eq!(batch.results.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn api_key_is_used_for_every_keyword() {
        let provider = Arc::new(StubProvider::returning(1));
        orchestrator(provider.clone())
            .run_with_key(&["a", "b"], 10, 1, Some("caller"))
            .await;

        assert_eq!(
            provider.api_keys(),
            vec![Some("caller".to_string()), Some("caller".to_string())]
        );
    }

    #[tokio::test]
    async fn serializes_results_as_ordered_object() {
        let provider = Arc::new(StubProvider::returning(1));
        let batch = orchestrator(provider).run(&["b", "a"], 10, 1).await;

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["total_keywords"], 2);
        assert_eq!(value["results"]["b"]["count"], 1);
        assert_eq!(
            value["results"]["a"]["images"][0]["url"],
            "https://img.example/a/0.jpg"
        );
    }
}
