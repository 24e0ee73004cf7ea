//! Endpoint resolution for a dataset key.
//!
//! Configured endpoints come first; an optional catalog-backed resolver can
//! contribute discovered candidates, ranked by token overlap against the
//! dataset's title and aliases. Composition happens here rather than inside
//! the sync engine so either side can be swapped out independently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::rules::{DatasetRule, RuleRegistry};

/// Hard cap on how many endpoints one dataset may resolve to.
pub const MAX_ENDPOINTS: usize = 5;

#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Ordered, deduplicated candidate endpoints for `dataset`. Empty means
    /// "no source available".
    async fn resolve(&self, dataset: &str) -> Vec<String>;
}

/// Serves the endpoints configured in the rule registry.
pub struct StaticResolver {
    registry: Arc<RuleRegistry>,
}

impl StaticResolver {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self, dataset: &str) -> Vec<String> {
        self.registry.endpoints(dataset).to_vec()
    }
}

/// Discovers candidate endpoints from a Socrata-style catalog and ranks
/// them against the dataset's title/aliases.
pub struct CatalogResolver {
    client: reqwest::Client,
    catalog_url: String,
    registry: Arc<RuleRegistry>,
}

impl CatalogResolver {
    pub fn new(catalog_url: String, registry: Arc<RuleRegistry>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            catalog_url,
            registry,
        }
    }

    async fn discover(&self, rule: &DatasetRule) -> Vec<String> {
        let payload: serde_json::Value = match self
            .client
            .get(&self.catalog_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(dataset = %rule.key, "catalog payload unparseable: {e}");
                    return Vec::new();
                }
            },
            Err(e) => {
                warn!(dataset = %rule.key, "catalog request failed: {e}");
                return Vec::new();
            }
        };

        let Some(results) = payload.get("results").and_then(|v| v.as_array()) else {
            return Vec::new();
        };

        let mut scored: Vec<(u32, String)> = Vec::new();
        for entry in results {
            let resource = &entry["resource"];
            let (Some(id), Some(name)) = (resource["id"].as_str(), resource["name"].as_str())
            else {
                continue;
            };
            let domain = entry["metadata"]["domain"].as_str().unwrap_or("data.ny.gov");
            let score = score_candidate(name, rule);
            if score == 0 {
                continue;
            }
            let endpoint =
                format!("https://{domain}/api/views/{id}/rows.json?accessType=DOWNLOAD");
            debug!(dataset = %rule.key, %endpoint, score, "catalog candidate");
            scored.push((score, endpoint));
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        let mut out = Vec::new();
        for (_, endpoint) in scored {
            if !out.contains(&endpoint) {
                out.push(endpoint);
            }
            if out.len() >= MAX_ENDPOINTS {
                break;
            }
        }
        out
    }
}

#[async_trait]
impl EndpointResolver for CatalogResolver {
    async fn resolve(&self, dataset: &str) -> Vec<String> {
        match self.registry.get(dataset) {
            Some(rule) => self.discover(rule).await,
            None => Vec::new(),
        }
    }
}

/// Token-overlap ranking of a catalog entry's name against a dataset rule.
/// Favors domain keyword matches, a full-title substring match, and region
/// keyword matches.
pub fn score_candidate(name: &str, rule: &DatasetRule) -> u32 {
    let name = name.to_lowercase();
    let mut score = 0;

    let mut vocabulary: Vec<String> = rule
        .title
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    for alias in &rule.aliases {
        vocabulary.extend(alias.split_whitespace().map(|t| t.to_lowercase()));
    }
    vocabulary.sort();
    vocabulary.dedup();

    for token in &vocabulary {
        if token.len() > 2 && name.contains(token.as_str()) {
            score += 1;
        }
    }

    for keyword in ["lottery", "winning", "numbers", "draw"] {
        if name.contains(keyword) {
            score += 1;
        }
    }

    if name.contains(&rule.title.to_lowercase()) {
        score += 3;
    }

    if name.contains("new york") || name.contains("ny ") {
        score += 2;
    }

    score
}

/// Configured endpoints first; discovered candidates appended when the
/// static side comes up empty and discovery is enabled.
pub struct CompositeResolver {
    primary: Arc<dyn EndpointResolver>,
    discovery: Option<Arc<CatalogResolver>>,
}

impl CompositeResolver {
    pub fn new(primary: Arc<dyn EndpointResolver>, discovery: Option<Arc<CatalogResolver>>) -> Self {
        Self { primary, discovery }
    }

    /// Discovery candidates not already in `exclude`. Used by the sync
    /// engine's zero-row fallback pass.
    pub async fn discover_untried(&self, dataset: &str, exclude: &[String]) -> Vec<String> {
        let Some(catalog) = &self.discovery else {
            return Vec::new();
        };
        catalog
            .resolve(dataset)
            .await
            .into_iter()
            .filter(|e| !exclude.contains(e))
            .collect()
    }
}

#[async_trait]
impl EndpointResolver for CompositeResolver {
    async fn resolve(&self, dataset: &str) -> Vec<String> {
        let mut endpoints: Vec<String> = Vec::new();
        for candidate in self.primary.resolve(dataset).await {
            if !endpoints.contains(&candidate) {
                endpoints.push(candidate);
            }
        }
        if endpoints.is_empty() {
            if let Some(catalog) = &self.discovery {
                for candidate in catalog.resolve(dataset).await {
                    if !endpoints.contains(&candidate) {
                        endpoints.push(candidate);
                    }
                }
            }
        }
        endpoints.truncate(MAX_ENDPOINTS);
        endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take5_rule() -> DatasetRule {
        RuleRegistry::builtin().get("take5").unwrap().clone()
    }

    #[test]
    fn full_title_match_outranks_partial() {
        let rule = take5_rule();
        let exact = score_candidate("Lottery Take 5 Winning Numbers", &rule);
        let partial = score_candidate("Take 5 results archive", &rule);
        let unrelated = score_candidate("Motor Vehicle Crashes", &rule);
        assert!(exact > partial, "{exact} vs {partial}");
        assert_eq!(unrelated, 0);
    }

    #[test]
    fn region_keyword_bumps_score() {
        let rule = take5_rule();
        let with_region = score_candidate("New York Lottery Take 5", &rule);
        let without = score_candidate("Lottery Take 5", &rule);
        assert!(with_region > without);
    }

    struct FixedResolver(Vec<String>);

    #[async_trait]
    impl EndpointResolver for FixedResolver {
        async fn resolve(&self, _dataset: &str) -> Vec<String> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn composite_prefers_configured_endpoints() {
        let primary = Arc::new(FixedResolver(vec![
            "https://a.example/rows.json".to_string(),
            "https://a.example/rows.json".to_string(),
            "https://b.example/rows.json".to_string(),
        ]));
        let composite = CompositeResolver::new(primary, None);

        let endpoints = composite.resolve("take5").await;
        assert_eq!(
            endpoints,
            vec![
                "https://a.example/rows.json".to_string(),
                "https://b.example/rows.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn composite_empty_without_sources() {
        let composite = CompositeResolver::new(Arc::new(FixedResolver(vec![])), None);
        assert!(composite.resolve("take5").await.is_empty());
        assert!(composite.discover_untried("take5", &[]).await.is_empty());
    }
}
