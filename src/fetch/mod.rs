//! Definition sources, tried in priority order by the pipeline.

pub mod wikipedia;
pub mod wiktionary;

pub use wikipedia::WikipediaSummary;
pub use wiktionary::Wiktionary;

use crate::config::SourcesConfig;
use crate::error::Result;
use crate::http::JsonGet;

pub trait DefinitionSource {
    /// Short label used in logs and run statistics.
    fn name(&self) -> &'static str;

    /// Look up `term`. Any failure along the way is reported as `None`.
    fn define(&self, http: &mut dyn JsonGet, term: &str) -> Option<String>;
}

/// Dictionary first, encyclopedia summary as fallback.
pub fn default_sources(config: &SourcesConfig) -> Result<Vec<Box<dyn DefinitionSource>>> {
    let sources: Vec<Box<dyn DefinitionSource>> = vec![
        Box::new(Wiktionary::from_config(config)?),
        Box::new(WikipediaSummary::from_config(config)),
    ];
    Ok(sources)
}
