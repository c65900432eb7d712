//! Source configuration, loaded from YAML.
//!
//! Every field has a default matching the Italian Wiktionary/Wikipedia setup,
//! so a config file only needs to name what it changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DefsError, Result};
use crate::http::{RateLimiter, RetryPolicy};

const DEFAULT_CONFIG_PATH: &str = "schema/sources.yaml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub statuses: Vec<u16>,
    /// Longest `Retry-After` honored; larger values are cut down to this
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        RetryConfig {
            max_attempts: policy.max_attempts,
            backoff_base_ms: policy.backoff_base.as_millis() as u64,
            statuses: policy.retryable_statuses,
            max_retry_after_secs: policy.max_retry_after.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    /// MediaWiki action API of the dictionary
    pub wiktionary_api: String,
    /// REST summary endpoint of the encyclopedia; the page title is appended
    pub wikipedia_summary: String,
    pub user_agent: String,
    /// Level-2 heading of the language section, e.g. "Italiano"
    pub language_section: String,
    /// Language code used by `{{-xx-}}` headings, e.g. "it"
    pub language_code: String,
    pub requests_per_sec: u32,
    pub timeout_secs: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub retry: RetryConfig,
    pub min_definition_len: usize,
    pub sentence_min_len: usize,
    /// Regexes removed from the start of every definition
    pub lead_in_patterns: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            wiktionary_api: "https://it.wiktionary.org/w/api.php".to_string(),
            wikipedia_summary: "https://it.wikipedia.org/api/rest_v1/page/summary/".to_string(),
            user_agent: "EreditaGame/1.0 (you@example.com)".to_string(),
            language_section: "Italiano".to_string(),
            language_code: "it".to_string(),
            requests_per_sec: 4,
            timeout_secs: 30,
            jitter_min_ms: 100,
            jitter_max_ms: 300,
            retry: RetryConfig::default(),
            min_definition_len: 12,
            sentence_min_len: crate::normalize::DEFAULT_SENTENCE_MIN,
            lead_in_patterns: vec![
                r"(?i)^In\s+\w+istica,\s*".to_string(),
                r"(?i)^(?:È|E'|E)\s+".to_string(),
            ],
        }
    }
}

impl SourcesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| DefsError::io(path, e))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.requests_per_sec,
            Duration::from_millis(self.jitter_min_ms),
            Duration::from_millis(self.jitter_max_ms),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
            retryable_statuses: self.retry.statuses.clone(),
            max_retry_after: Duration::from_secs(self.retry.max_retry_after_secs),
        }
    }
}

/// Explicit path if given, else `schema/sources.yaml` when present, else defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<SourcesConfig> {
    if let Some(path) = explicit {
        return SourcesConfig::load(path);
    }
    let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
    if fallback.exists() {
        return SourcesConfig::load(&fallback);
    }
    Ok(SourcesConfig::default())
}
