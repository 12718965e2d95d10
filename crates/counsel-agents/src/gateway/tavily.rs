//! Tavily web search restricted to legal source domains.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{FactSearch, SearchHit};
use crate::config::FactSearchConfig;
use crate::errors::GatewayError;

pub struct TavilyFactSearch {
    client: reqwest::Client,
    config: FactSearchConfig,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilyFactSearch {
    pub fn new(config: FactSearchConfig) -> Result<Self, GatewayError> {
        if config.api_key.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "fact search api key is not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn allowed(&self, url: &str) -> bool {
        if self.config.allowed_domains.is_empty() {
            return true;
        }
        let host = url
            .split("://")
            .nth(1)
            .unwrap_or(url)
            .split(['/', '?', '#'])
            .next()
            .unwrap_or("");
        self.config
            .allowed_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }
}

#[async_trait]
impl FactSearch for TavilyFactSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, GatewayError> {
        let body = json!({
            "api_key": self.config.api_key,
            "query": query,
            "max_results": self.config.max_results,
            "include_domains": self.config.allowed_domains,
            "search_depth": "basic",
        });
        let response = self.client.post(&self.config.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status, body });
        }
        let parsed: TavilyResponse = response.json().await?;
        let hits: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .filter(|r| self.allowed(&r.url))
            .map(|r| SearchHit {
                url: r.url,
                content: r.content,
            })
            .collect();
        debug!(hits = hits.len(), "fact search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(domains: &[&str]) -> TavilyFactSearch {
        TavilyFactSearch::new(FactSearchConfig {
            api_key: "k".into(),
            allowed_domains: domains.iter().map(|d| d.to_string()).collect(),
            ..FactSearchConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn allow_list_matches_host_and_subdomains() {
        let s = search(&["law.go.kr"]);
        assert!(s.allowed("https://law.go.kr/precedent/1"));
        assert!(s.allowed("https://www.law.go.kr/x?y"));
        assert!(!s.allowed("https://evil-law.go.kr.example.com/"));
        assert!(!s.allowed("https://example.com/law.go.kr"));
    }

    #[test]
    fn empty_allow_list_accepts_all() {
        assert!(search(&[]).allowed("https://anything.example/"));
    }

    #[test]
    fn missing_key_rejected() {
        let cfg = FactSearchConfig {
            api_key: String::new(),
            ..FactSearchConfig::default()
        };
        assert!(TavilyFactSearch::new(cfg).is_err());
    }
}
