use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ImageRecord {
    pub url: String,
    pub title: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ImageRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            source: String::new(),
            thumbnail: None,
            width: None,
            height: None,
        }
    }
}

/// Outcome of searching a single query.
///
/// Build it with [`SearchResult::found`] or [`SearchResult::failed`] so that
/// `count` always matches `images` and `error` is only set on failure.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SearchResult {
    pub success: bool,
    pub query: String,
    pub count: usize,
    pub images: Vec<ImageRecord>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<usize>,
}

impl SearchResult {
    pub fn found(query: &str, images: Vec<ImageRecord>, attempt: usize) -> Self {
        Self {
            success: true,
            query: query.to_string(),
            count: images.len(),
            images,
            error: None,
            attempt: Some(attempt),
        }
    }

    pub fn failed(query: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            query: query.to_string(),
            count: 0,
            images: Vec::new(),
            error: Some(error.into()),
            attempt: None,
        }
    }
}

/// Per-keyword results in first-seen keyword order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordResults {
    entries: Vec<(String, SearchResult)>,
}

impl KeywordResults {
    /// Insert or replace. A replaced keyword keeps its original position.
    pub fn insert(&mut self, keyword: String, result: SearchResult) {
        match self.entries.iter_mut().find(|(k, _)| *k == keyword) {
            Some(entry) => entry.1 = result,
            None => self.entries.push((keyword, result)),
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&SearchResult> {
        self.entries
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, r)| r)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SearchResult)> {
        self.entries.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for KeywordResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (keyword, result) in &self.entries {
            map.serialize_entry(keyword, result)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct BatchResult {
    pub success: bool,
    pub total_keywords: usize,
    pub results: KeywordResults,
}

impl BatchResult {
    pub fn total_images(&self) -> usize {
        self.results.iter().map(|(_, r)| r.count).sum()
    }
}
