//! Build a word → definition dictionary from Wiktionary, with Wikipedia
//! summaries as fallback.

pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod normalize;
pub mod pipeline;
pub mod store;

pub use config::{resolve_config, SourcesConfig};
pub use error::{DefsError, Result};
pub use fetch::{default_sources, DefinitionSource, WikipediaSummary, Wiktionary};
pub use http::{HttpClient, JsonGet, RateLimiter, RetryPolicy};
pub use pipeline::{Pipeline, PostFix, RunOutcome, RunStats};
pub use store::{load_existing, load_terms, save_definitions, Definitions};
