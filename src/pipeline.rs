//! Sequential batch over the term list.
//!
//! Each term is either skipped (already defined), or looked up through the
//! sources in priority order, cleaned up and stored. The mapping is
//! snapshotted every `save_every` input positions and once at the end.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{DefsError, Result};
use crate::fetch::DefinitionSource;
use crate::http::JsonGet;
use crate::normalize::normalize_space;
use crate::store::{save_definitions, Definitions};

/// Strips redundant lead-ins such as "In linguistica," from a definition.
pub struct PostFix {
    lead_ins: Vec<Regex>,
}

impl PostFix {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let lead_ins = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| DefsError::Regex {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PostFix { lead_ins })
    }

    pub fn apply(&self, definition: &str) -> String {
        let mut text = definition.to_string();
        for lead_in in &self.lead_ins {
            text = lead_in.replace(&text, "").into_owned();
        }
        normalize_space(&text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stop flag raised; the last checkpoint on disk is the recovery point.
    Interrupted,
}

#[derive(Debug)]
pub struct RunStats {
    pub outcome: RunOutcome,
    pub terms_seen: usize,
    pub updated: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub source_hits: BTreeMap<&'static str, usize>,
    pub snapshots: usize,
    pub total_entries: usize,
    pub elapsed: Duration,
}

impl RunStats {
    fn new() -> Self {
        RunStats {
            outcome: RunOutcome::Completed,
            terms_seen: 0,
            updated: 0,
            unresolved: 0,
            skipped: 0,
            source_hits: BTreeMap::new(),
            snapshots: 0,
            total_entries: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// What happened to one input term.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TermOutcome {
    Skipped,
    Resolved { source: &'static str },
    Unresolved,
}

pub struct Pipeline<H: JsonGet> {
    http: H,
    sources: Vec<Box<dyn DefinitionSource>>,
    post_fix: PostFix,
    output: PathBuf,
    save_every: usize,
}

impl<H: JsonGet> Pipeline<H> {
    pub fn new(
        http: H,
        sources: Vec<Box<dyn DefinitionSource>>,
        post_fix: PostFix,
        output: PathBuf,
        save_every: usize,
    ) -> Self {
        Pipeline { http, sources, post_fix, output, save_every }
    }

    /// First source with an answer wins.
    fn lookup(&mut self, term: &str) -> Option<(&'static str, String)> {
        for source in &self.sources {
            if let Some(definition) = source.define(&mut self.http, term) {
                debug!(term, source = source.name(), "resolved");
                return Some((source.name(), definition));
            }
            debug!(term, source = source.name(), "no definition");
        }
        None
    }

    fn process_term(&mut self, raw: &str, defs: &mut Definitions) -> TermOutcome {
        let term = raw.trim();
        if term.is_empty() {
            return TermOutcome::Skipped;
        }
        if defs.get(term).is_some_and(|existing| !existing.is_empty()) {
            return TermOutcome::Skipped;
        }

        let resolved = self
            .lookup(term)
            .map(|(source, definition)| (source, self.post_fix.apply(&definition)))
            .filter(|(_, definition)| !definition.is_empty());

        match resolved {
            Some((source, definition)) => {
                defs.insert(term.to_string(), definition);
                TermOutcome::Resolved { source }
            }
            None => {
                defs.insert(term.to_string(), String::new());
                TermOutcome::Unresolved
            }
        }
    }

    fn checkpoint(&self, defs: &Definitions, stats: &mut RunStats) -> Result<()> {
        save_definitions(&self.output, defs)?;
        stats.snapshots += 1;
        info!(path = %self.output.display(), entries = defs.len(), "checkpoint written");
        Ok(())
    }

    /// Process `terms` into `defs`. Returns early, without a final snapshot,
    /// once `stop` is raised.
    pub fn run(
        &mut self,
        terms: &[String],
        defs: &mut Definitions,
        stop: &AtomicBool,
        progress: &ProgressBar,
    ) -> Result<RunStats> {
        let started = Instant::now();
        let mut stats = RunStats::new();

        for (index, term) in terms.iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                stats.outcome = RunOutcome::Interrupted;
                break;
            }
            progress.set_message(term.trim().to_string());

            match self.process_term(term, defs) {
                TermOutcome::Skipped => stats.skipped += 1,
                TermOutcome::Resolved { source } => {
                    stats.updated += 1;
                    *stats.source_hits.entry(source).or_insert(0) += 1;
                }
                TermOutcome::Unresolved => stats.unresolved += 1,
            }
            stats.terms_seen += 1;
            progress.inc(1);

            if self.save_every > 0 && (index + 1) % self.save_every == 0 {
                self.checkpoint(defs, &mut stats)?;
            }
        }

        if stats.outcome == RunOutcome::Completed {
            self.checkpoint(defs, &mut stats)?;
        }
        stats.total_entries = defs.len();
        stats.elapsed = started.elapsed();
        Ok(stats)
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use crate::config::SourcesConfig;
    use crate::http::FnHttp;
    use crate::store::load_existing;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::tempdir;

    /// Answers from a fixed table and records every lookup.
    struct TableSource {
        name: &'static str,
        table: HashMap<&'static str, &'static str>,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl TableSource {
        fn new(name: &'static str, entries: &[(&'static str, &'static str)]) -> Self {
            TableSource {
                name,
                table: entries.iter().copied().collect(),
                calls: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl DefinitionSource for TableSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn define(&self, _http: &mut dyn JsonGet, term: &str) -> Option<String> {
            self.calls.borrow_mut().push(term.to_string());
            self.table.get(term).map(|d| d.to_string())
        }
    }

    /// Reads the output file when it sees `trigger`.
    struct SnapshotProbe {
        output: PathBuf,
        trigger: &'static str,
        seen: Rc<RefCell<Option<Value>>>,
    }

    impl DefinitionSource for SnapshotProbe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn define(&self, _http: &mut dyn JsonGet, term: &str) -> Option<String> {
            if term == self.trigger {
                let contents = fs::read_to_string(&self.output).ok()?;
                *self.seen.borrow_mut() = serde_json::from_str(&contents).ok();
            }
            Some(format!("definizione di {}", term))
        }
    }

    fn offline() -> impl JsonGet {
        FnHttp::new(|url: &str, _: &[(&str, &str)]| {
            Err(DefsError::Http { url: url.to_string(), message: "offline".into() })
        })
    }

    fn post_fix() -> PostFix {
        PostFix::new(&SourcesConfig::default().lead_in_patterns).unwrap()
    }

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn run_once(
        sources: Vec<Box<dyn DefinitionSource>>,
        words: &[&str],
        defs: &mut Definitions,
        output: &Path,
        save_every: usize,
    ) -> RunStats {
        let mut pipeline = Pipeline::new(offline(), sources, post_fix(), output.to_path_buf(), save_every);
        pipeline
            .run(&terms(words), defs, &AtomicBool::new(false), &ProgressBar::hidden())
            .unwrap()
    }

    // ─────────────────────────────────────────────────────────────
    // PostFix
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn post_fix_strips_register_lead_in() {
        assert_eq!(
            post_fix().apply("In linguistica, è un  morfema che precede la radice."),
            "un morfema che precede la radice."
        );
    }

    #[test]
    fn post_fix_strips_copula() {
        assert_eq!(post_fix().apply("È un animale domestico."), "un animale domestico.");
        assert_eq!(post_fix().apply("E' un animale domestico."), "un animale domestico.");
    }

    #[test]
    fn post_fix_strips_lowercase_conjunction() {
        assert_eq!(post_fix().apply("e un gioco di carte."), "un gioco di carte.");
    }

    #[test]
    fn post_fix_leaves_inner_text() {
        assert_eq!(post_fix().apply("animale che è domestico"), "animale che è domestico");
        assert_eq!(post_fix().apply("Edificio adibito ad abitazione"), "Edificio adibito ad abitazione");
    }

    #[test]
    fn invalid_lead_in_pattern_is_an_error() {
        assert!(matches!(PostFix::new(&["(".to_string()]), Err(DefsError::Regex { .. })));
    }

    // ─────────────────────────────────────────────────────────────
    // Source priority
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn fallback_only_consulted_when_primary_misses() {
        let dir = tempdir().unwrap();
        let primary = TableSource::new("primary", &[("casa", "edificio adibito ad abitazione")]);
        let fallback = TableSource::new("fallback", &[("casa", "mai usato"), ("Roma", "capitale d'Italia")]);
        let fallback_calls = fallback.calls.clone();

        let mut defs = Definitions::new();
        let stats = run_once(
            vec![Box::new(primary), Box::new(fallback)],
            &["casa", "Roma", "xyz"],
            &mut defs,
            &dir.path().join("defs.json"),
            0,
        );

        assert_eq!(defs["casa"], "edificio adibito ad abitazione");
        assert_eq!(defs["Roma"], "capitale d'Italia");
        assert_eq!(defs["xyz"], "");
        assert_eq!(*fallback_calls.borrow(), vec!["Roma", "xyz"]);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.source_hits.get("primary"), Some(&1));
        assert_eq!(stats.source_hits.get("fallback"), Some(&1));
    }

    #[test]
    fn definition_emptied_by_post_fix_is_unresolved() {
        let dir = tempdir().unwrap();
        let primary = TableSource::new("primary", &[("e", "E ")]);
        let mut defs = Definitions::new();
        let stats = run_once(vec![Box::new(primary)], &["e"], &mut defs, &dir.path().join("d.json"), 0);
        assert_eq!(defs["e"], "");
        assert_eq!(stats.unresolved, 1);
    }

    // ─────────────────────────────────────────────────────────────
    // Mapping invariants
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn one_entry_per_distinct_trimmed_term() {
        let dir = tempdir().unwrap();
        let primary = TableSource::new("primary", &[("cane", "animale domestico")]);
        let mut defs = Definitions::new();
        let stats = run_once(
            vec![Box::new(primary)],
            &["cane", " cane ", "gatto", "gatto", "   "],
            &mut defs,
            &dir.path().join("defs.json"),
            0,
        );
        assert_eq!(defs.keys().collect::<Vec<_>>(), vec!["cane", "gatto"]);
        // second "cane" skipped, "   " skipped, unresolved "gatto" looked up twice
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.unresolved, 2);
        assert_eq!(stats.total_entries, 2);
    }

    #[test]
    fn existing_definitions_are_never_refetched() {
        let dir = tempdir().unwrap();
        let primary = TableSource::new("primary", &[("casa", "nuova definizione")]);
        let calls = primary.calls.clone();
        let mut defs = Definitions::new();
        defs.insert("casa".into(), "vecchia definizione".into());

        run_once(vec![Box::new(primary)], &["casa"], &mut defs, &dir.path().join("d.json"), 0);

        assert_eq!(defs["casa"], "vecchia definizione");
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn append_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("defs.json");
        let table = [("casa", "edificio adibito ad abitazione"), ("cane", "animale domestico")];
        let words = ["casa", "cane", "ignoto"];

        let mut first = Definitions::new();
        run_once(vec![Box::new(TableSource::new("primary", &table))], &words, &mut first, &output, 2);
        let after_first = fs::read_to_string(&output).unwrap();

        let second_source = TableSource::new("primary", &table);
        let second_calls = second_source.calls.clone();
        let mut second = load_existing(&output).unwrap();
        run_once(vec![Box::new(second_source)], &words, &mut second, &output, 2);

        assert_eq!(second, first);
        assert_eq!(fs::read_to_string(&output).unwrap(), after_first);
        // only the unresolved term is looked up again
        assert_eq!(*second_calls.borrow(), vec!["ignoto"]);
    }

    // ─────────────────────────────────────────────────────────────
    // Checkpoints
    // ─────────────────────────────────────────────────────────────

    #[test]
    fn checkpoint_reflects_processed_terms() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("defs.json");
        let seen = Rc::new(RefCell::new(None));
        let probe = SnapshotProbe { output: output.clone(), trigger: "c", seen: seen.clone() };

        let mut defs = Definitions::new();
        let stats = run_once(vec![Box::new(probe)], &["a", "b", "c"], &mut defs, &output, 2);

        let snapshot = seen.borrow().clone().expect("checkpoint readable as JSON");
        let keys: Vec<&String> = snapshot.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&&"a".to_string()));
        assert!(keys.contains(&&"b".to_string()));
        // one periodic snapshot plus the final one
        assert_eq!(stats.snapshots, 2);
        assert_eq!(load_existing(&output).unwrap().len(), 3);
    }

    #[test]
    fn blank_input_positions_count_towards_checkpoints() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("defs.json");
        let seen = Rc::new(RefCell::new(None));
        let probe = SnapshotProbe { output: output.clone(), trigger: "c", seen: seen.clone() };

        // "" stands where load_terms put a non-string item
        let mut defs = Definitions::new();
        let stats = run_once(vec![Box::new(probe)], &["a", "", "c"], &mut defs, &output, 2);

        let snapshot = seen.borrow().clone().expect("checkpoint written before \"c\"");
        assert_eq!(snapshot.as_object().unwrap().keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.snapshots, 2);
    }

    #[test]
    fn zero_save_every_only_writes_final_snapshot() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("defs.json");
        let mut defs = Definitions::new();
        let stats = run_once(
            vec![Box::new(TableSource::new("primary", &[]))],
            &["a", "b", "c", "d"],
            &mut defs,
            &output,
            0,
        );
        assert_eq!(stats.snapshots, 1);
        assert!(output.exists());
    }

    #[test]
    fn raised_stop_flag_interrupts_without_final_snapshot() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("defs.json");
        let mut pipeline = Pipeline::new(
            offline(),
            vec![Box::new(TableSource::new("primary", &[])) as Box<dyn DefinitionSource>],
            post_fix(),
            output.clone(),
            1,
        );
        let mut defs = Definitions::new();
        let stats = pipeline
            .run(&terms(&["a", "b"]), &mut defs, &AtomicBool::new(true), &ProgressBar::hidden())
            .unwrap();
        assert_eq!(stats.outcome, RunOutcome::Interrupted);
        assert_eq!(stats.terms_seen, 0);
        assert!(!output.exists());
    }
}
