//! Fallback source: the REST page summary of the encyclopedia.

use serde_json::Value;
use tracing::debug;

use crate::config::SourcesConfig;
use crate::fetch::DefinitionSource;
use crate::http::JsonGet;
use crate::normalize::{char_len, first_sentence, strip_markup};

pub struct WikipediaSummary {
    endpoint: String,
    min_len: usize,
    sentence_min: usize,
}

impl WikipediaSummary {
    pub fn new(endpoint: &str, min_len: usize, sentence_min: usize) -> Self {
        WikipediaSummary {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            min_len,
            sentence_min,
        }
    }

    pub fn from_config(config: &SourcesConfig) -> Self {
        Self::new(&config.wikipedia_summary, config.min_definition_len, config.sentence_min_len)
    }

    /// Page titles use underscores for spaces.
    fn summary_url(&self, term: &str) -> String {
        format!("{}/{}", self.endpoint, urlencoding::encode(&term.replace(' ', "_")))
    }
}

fn is_disambiguation(summary: &Value) -> bool {
    summary["type"].as_str() == Some("disambiguation")
}

fn non_empty_field<'a>(summary: &'a Value, field: &str) -> Option<&'a str> {
    summary[field].as_str().filter(|s| !s.is_empty())
}

impl DefinitionSource for WikipediaSummary {
    fn name(&self) -> &'static str {
        "wikipedia"
    }

    fn define(&self, http: &mut dyn JsonGet, term: &str) -> Option<String> {
        let url = self.summary_url(term);
        let summary = match http.get_json(&url, &[]) {
            Ok(summary) => summary,
            Err(e) => {
                debug!(term, error = %e, "wikipedia summary request failed");
                return None;
            }
        };
        if is_disambiguation(&summary) {
            debug!(term, "wikipedia page is a disambiguation page");
            return None;
        }
        let text = non_empty_field(&summary, "extract").or_else(|| non_empty_field(&summary, "description"))?;
        let candidate = first_sentence(&strip_markup(text), self.sentence_min);
        (char_len(&candidate) >= self.min_len).then_some(candidate)
    }
}
