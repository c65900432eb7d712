//! Primary source: the first definition line of a Wiktionary entry.
//!
//! Stage 1 parses the page wikitext, narrows it to the configured language
//! section and takes the first `# ...` definition line. Stage 2 falls back to
//! the plain-text extract of the same page.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::config::SourcesConfig;
use crate::error::{DefsError, Result};
use crate::fetch::DefinitionSource;
use crate::http::JsonGet;
use crate::normalize::{char_len, first_sentence, normalize_space, strip_markup};

lazy_static! {
    // Any level-2 heading: "== Inglese ==" but not "=== Sostantivo ==="
    static ref LEVEL2_HEADING: Regex = Regex::new(r"(?m)^==[^=].*==[ \t]*$").unwrap();
}

pub struct Wiktionary {
    api: String,
    section_header: Regex,
    min_len: usize,
    sentence_min: usize,
}

impl Wiktionary {
    pub fn new(api: &str, language_section: &str, language_code: &str, min_len: usize, sentence_min: usize) -> Result<Self> {
        // "== Italiano ==" or "== {{-it-}} =="
        let pattern = format!(
            r"(?mi)^==[ \t]*(?:{}|\{{\{{-{}-\}}\}})[ \t]*==[ \t]*$",
            regex::escape(language_section),
            regex::escape(language_code),
        );
        let section_header = Regex::new(&pattern).map_err(|source| DefsError::Regex { pattern, source })?;
        Ok(Wiktionary {
            api: api.to_string(),
            section_header,
            min_len,
            sentence_min,
        })
    }

    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        Self::new(
            &config.wiktionary_api,
            &config.language_section,
            &config.language_code,
            config.min_definition_len,
            config.sentence_min_len,
        )
    }

    /// Body of the language section, up to the next level-2 heading.
    fn extract_language_section<'a>(&self, wikitext: &'a str) -> Option<&'a str> {
        let header = self.section_header.find(wikitext)?;
        let start = header.end();
        let end = LEVEL2_HEADING
            .find(&wikitext[start..])
            .map(|m| start + m.start())
            .unwrap_or(wikitext.len());
        Some(&wikitext[start..end])
    }

    /// First `#` line (not `#:`, `#*` or `##`) that cleans up to a usable definition.
    fn first_definition(&self, body: &str) -> Option<String> {
        body.lines()
            .map(str::trim)
            .filter(|line| is_definition_line(line))
            .map(|line| first_sentence(&strip_markup(line.trim_start_matches('#').trim()), self.sentence_min))
            .find(|candidate| char_len(candidate) >= self.min_len)
    }

    fn from_wikitext(&self, http: &mut dyn JsonGet, term: &str) -> Option<String> {
        let query = [
            ("action", "parse"),
            ("format", "json"),
            ("prop", "wikitext|sections"),
            ("redirects", "1"),
            ("page", term),
        ];
        let data = match http.get_json(&self.api, &query) {
            Ok(data) => data,
            Err(e) => {
                debug!(term, error = %e, "wiktionary parse request failed");
                return None;
            }
        };
        if data.get("error").is_some() {
            debug!(term, "wiktionary parse returned an API error");
            return None;
        }
        let wikitext = data["parse"]["wikitext"]["*"].as_str().filter(|t| !t.is_empty())?;
        let body = self.extract_language_section(wikitext).unwrap_or(wikitext);
        self.first_definition(body)
    }

    fn from_extract(&self, http: &mut dyn JsonGet, term: &str) -> Option<String> {
        let query = [
            ("action", "query"),
            ("format", "json"),
            ("prop", "extracts"),
            ("explaintext", "1"),
            ("redirects", "1"),
            ("titles", term),
        ];
        let data = match http.get_json(&self.api, &query) {
            Ok(data) => data,
            Err(e) => {
                debug!(term, error = %e, "wiktionary extract request failed");
                return None;
            }
        };
        let pages = data["query"]["pages"].as_object()?;
        pages
            .values()
            .filter_map(|page| page.get("extract").and_then(Value::as_str))
            .filter(|extract| !extract.is_empty())
            .find_map(|extract| {
                let line = extract
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty() && !line.starts_with('='))?;
                let candidate = normalize_space(&first_sentence(line, self.sentence_min));
                (char_len(&candidate) >= self.min_len).then_some(candidate)
            })
    }
}

fn is_definition_line(line: &str) -> bool {
    line.starts_with('#') && !(line.starts_with("#:") || line.starts_with("#*") || line.starts_with("##"))
}

impl DefinitionSource for Wiktionary {
    fn name(&self) -> &'static str {
        "wiktionary"
    }

    fn define(&self, http: &mut dyn JsonGet, term: &str) -> Option<String> {
        self.from_wikitext(http, term)
            .or_else(|| self.from_extract(http, term))
    }
}
