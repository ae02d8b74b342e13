//! Finds a product's TikTok account by searching the web.
//!
//! One search is issued per product. Hits are scanned in the order the search
//! service ranked them, link before snippet, and the first handle whose
//! lowercase form contains the lowercase product name wins. A later hit is
//! never preferred over an earlier one even if it looks like a closer match;
//! callers rely on this first-match policy being stable.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ScoutError, ScoutResult};
use crate::model::Handle;

pub const PLATFORM_NAME: &str = "TikTok";
pub const PROFILE_MARKER: &str = "tiktok.com/@";
pub const SEARCH_RESULT_LIMIT: usize = 50;

const SEARCH_SERVICE: &str = "search";

/// A single organic search result.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SearchHit {
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Web search provider. Implementations block until the provider answers.
pub trait SearchBackend: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> ScoutResult<Vec<SearchHit>>;
}

pub struct HandleResolver {
    backend: Box<dyn SearchBackend>,
}

impl HandleResolver {
    pub fn new(backend: impl SearchBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// `Ok(None)` means no account was found, which is a normal outcome.
    /// `Err` is reserved for the search service failing.
    pub fn resolve(&self, name: &str, description: &str) -> ScoutResult<Option<Handle>> {
        let query = search_query(name, description);
        let hits = self.backend.search(&query, SEARCH_RESULT_LIMIT)?;
        debug!(product = name, hits = hits.len(), "search returned");

        let handle = first_matching_handle(name, &hits);
        match &handle {
            Some(handle) => info!(product = name, %handle, "resolved handle"),
            None => info!(product = name, "no matching handle"),
        }
        Ok(handle)
    }
}

pub fn search_query(name: &str, description: &str) -> String {
    format!("{name} {description} {PLATFORM_NAME}")
}

/// Applies the first-match policy over hits in rank order.
///
/// A handle is accepted when it contains the product name, ignoring case. This
/// accepts fan or reseller accounts that embed the name and rejects official
/// accounts that abbreviate it.
pub fn first_matching_handle(name: &str, hits: &[SearchHit]) -> Option<Handle> {
    let needle = name.to_lowercase();
    let accepts = |handle: &Handle| handle.as_str().to_lowercase().contains(&needle);

    for hit in hits {
        if let Some(handle) = extract_handle(&hit.link).filter(accepts) {
            return Some(handle);
        }
        let Some(snippet) = hit.snippet.as_deref() else {
            continue;
        };
        if let Some(handle) = snippet
            .split_whitespace()
            .filter_map(extract_handle)
            .find(accepts)
        {
            return Some(handle);
        }
    }
    None
}

/// Pulls the handle out of text containing `tiktok.com/@<handle>`.
pub fn extract_handle(text: &str) -> Option<Handle> {
    let (_, rest) = text.split_once(PROFILE_MARKER)?;
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(rest.len());
    Handle::parse(rest[..end].trim_end_matches('.'))
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    organic_results: Vec<SearchHit>,
}

/// Google search through a SerpApi-compatible JSON endpoint.
pub struct SerpApiClient {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

impl SearchBackend for SerpApiClient {
    fn search(&self, query: &str, limit: usize) -> ScoutResult<Vec<SearchHit>> {
        let response = self
            .agent
            .get(&self.endpoint)
            .query("engine", "google")
            .query("q", query)
            .query("num", &limit.to_string())
            .query("api_key", &self.api_key)
            .call()
            .map_err(|err| ScoutError::from_ureq(SEARCH_SERVICE, err))?;
        let page: SearchPage = response
            .into_json()
            .map_err(|err| ScoutError::decode(SEARCH_SERVICE, err))?;
        Ok(page.organic_results)
    }
}
