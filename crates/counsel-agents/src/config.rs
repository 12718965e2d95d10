//! Runtime configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Values in the TOML file passed to [`CounselConfig::load`]
//! 2. Environment variables (`COUNSEL_*`, plus `OPENAI_API_KEY` /
//!    `TAVILY_API_KEY` / `DATABASE_URL` for the keys every deployment
//!    already has)
//! 3. Built-in defaults
//!
//! Every section is `#[serde(default)]`, so a config file only needs the
//! keys it overrides.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use counsel_coordination::escalation::{SentinelMarkers, DEFAULT_ADVANCED_PHRASES};
use counsel_coordination::BusyPolicy;
use serde::{Deserialize, Serialize};

use crate::prompts::PromptTemplates;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TRIAGE_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_STAGE_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_GENERATION_MODEL: &str = "gpt-4o";
const DEFAULT_FACT_SEARCH_ENDPOINT: &str = "https://api.tavily.com/search";
const DEFAULT_DATABASE_URL: &str = "postgres://postgres@localhost:5432/counsel";

const ENV_BASE_URL: &str = "COUNSEL_LLM_BASE_URL";
const ENV_API_KEY: &str = "COUNSEL_LLM_API_KEY";
const ENV_TRIAGE_MODEL: &str = "COUNSEL_TRIAGE_MODEL";
const ENV_STAGE_MODEL: &str = "COUNSEL_STAGE_MODEL";
const ENV_GENERATION_MODEL: &str = "COUNSEL_GENERATION_MODEL";
const ENV_FACT_SEARCH_KEY: &str = "COUNSEL_FACT_SEARCH_API_KEY";
const ENV_DATABASE_URL: &str = "COUNSEL_DATABASE_URL";
const ENV_AFFIRM_THRESHOLD: &str = "COUNSEL_AFFIRM_THRESHOLD";
const ENV_CACHE_TTL_SECS: &str = "COUNSEL_CACHE_TTL_SECS";
const ENV_BUSY_POLICY: &str = "COUNSEL_BUSY_POLICY";

fn env_or(keys: &[&str], default: &str) -> String {
    keys.iter()
        .find_map(|k| env::var(k).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// OpenAI-compatible chat completion endpoint and per-role models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    /// Cheap model used for triage.
    pub triage_model: String,
    /// Model for qualify / template / strategy / critique calls.
    pub stage_model: String,
    /// Model for the final deep answer.
    pub generation_model: String,
    pub triage_temperature: f32,
    pub stage_temperature: f32,
    pub generation_temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: env_or(&[ENV_BASE_URL], DEFAULT_BASE_URL),
            api_key: env_or(&[ENV_API_KEY, "OPENAI_API_KEY"], ""),
            triage_model: env_or(&[ENV_TRIAGE_MODEL], DEFAULT_TRIAGE_MODEL),
            stage_model: env_or(&[ENV_STAGE_MODEL], DEFAULT_STAGE_MODEL),
            generation_model: env_or(&[ENV_GENERATION_MODEL], DEFAULT_GENERATION_MODEL),
            triage_temperature: 0.6,
            stage_temperature: 0.2,
            generation_temperature: 0.4,
            max_tokens: 2048,
        }
    }
}

/// Fact-check search API restricted to an allow-list of domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactSearchConfig {
    pub endpoint: String,
    pub api_key: String,
    pub allowed_domains: Vec<String>,
    pub max_results: usize,
}

impl Default for FactSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_FACT_SEARCH_ENDPOINT.to_string(),
            api_key: env_or(&[ENV_FACT_SEARCH_KEY, "TAVILY_API_KEY"], ""),
            allowed_domains: vec!["law.go.kr".to_string(), "casenote.kr".to_string()],
            max_results: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordStoreConfig {
    /// libpq-style connection string.
    pub database_url: String,
    /// Maximum rows returned by each search.
    pub max_rows: i64,
    /// Documents returned by the trigram similarity search.
    pub similarity_k: usize,
    /// Keywords extracted per text.
    pub keyword_top_k: usize,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            database_url: env_or(&[ENV_DATABASE_URL, "DATABASE_URL"], DEFAULT_DATABASE_URL),
            max_rows: 10,
            similarity_k: 15,
            keyword_top_k: 5,
        }
    }
}

/// Triage and escalation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
    /// Affirm verdicts needed to escalate.
    pub affirm_threshold: u32,
    pub markers: SentinelMarkers,
    /// Trailing characters inspected for an early negative marker.
    pub negative_window: usize,
    pub advanced_phrases: Vec<String>,
    /// Keyword overlap below which a query is out of scope.
    pub in_scope_threshold: f64,
    /// Conversation turns kept per session.
    pub history_turns: usize,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            affirm_threshold: env_parse(ENV_AFFIRM_THRESHOLD).unwrap_or(3),
            markers: SentinelMarkers::default(),
            negative_window: 16,
            advanced_phrases: DEFAULT_ADVANCED_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            in_scope_threshold: 0.3,
            history_turns: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// How often expired sessions, entries and idle locks are swept.
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: env_parse(ENV_CACHE_TTL_SECS).unwrap_or(3600),
            purge_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Upper bounds on external calls, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub triage_secs: u64,
    pub stage_secs: u64,
    pub generation_secs: u64,
    pub search_secs: u64,
    pub lock_wait_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            triage_secs: 30,
            stage_secs: 60,
            generation_secs: 180,
            search_secs: 20,
            lock_wait_secs: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn triage(&self) -> Duration {
        Duration::from_secs(self.triage_secs)
    }

    pub fn stage(&self) -> Duration {
        Duration::from_secs(self.stage_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first failure of a retriable call.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles each attempt.
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_backoff_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CounselConfig {
    pub completion: CompletionConfig,
    pub fact_search: FactSearchConfig,
    pub record_store: RecordStoreConfig,
    pub escalation: EscalationSettings,
    pub cache: CacheConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    #[serde(default = "busy_policy_from_env")]
    pub busy_policy: BusyPolicy,
    pub prompts: PromptTemplates,
}

fn busy_policy_from_env() -> BusyPolicy {
    env_parse(ENV_BUSY_POLICY).unwrap_or_default()
}

impl CounselConfig {
    /// Build from environment variables and defaults only.
    pub fn from_env() -> Self {
        Self {
            busy_policy: busy_policy_from_env(),
            ..Self::default()
        }
    }

    /// Parse a TOML file; missing keys fall back to env/defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Validate the config; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.escalation.affirm_threshold == 0 {
            return Err("escalation.affirm_threshold must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.escalation.in_scope_threshold) {
            return Err(format!(
                "escalation.in_scope_threshold must be in [0, 1], got {}",
                self.escalation.in_scope_threshold
            ));
        }
        if self.escalation.negative_window < self.escalation.markers.negative.chars().count() {
            return Err(format!(
                "escalation.negative_window ({}) is shorter than the negative marker",
                self.escalation.negative_window
            ));
        }
        self.escalation.markers.validate()?;
        if self.cache.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".to_string());
        }
        if self.cache.purge_interval_secs == 0 {
            return Err("cache.purge_interval_secs must be > 0".to_string());
        }
        let t = &self.timeouts;
        if [t.triage_secs, t.stage_secs, t.generation_secs, t.search_secs]
            .contains(&0)
        {
            return Err("timeouts must be > 0".to_string());
        }
        if self.completion.base_url.trim().is_empty() {
            return Err("completion.base_url must not be empty".to_string());
        }
        self.prompts.validate()?;
        Ok(())
    }
}
