use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use wikt_defs::{
    default_sources, load_existing, load_terms, resolve_config, Definitions, HttpClient, Pipeline,
    PostFix, RunOutcome, RunStats,
};

#[derive(Parser)]
#[command(name = "wikt-defs")]
#[command(about = "Build a word -> definition map from Wiktionary, falling back to Wikipedia summaries")]
struct Args {
    /// JSON array of words (.json or .json.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Output JSON map (word -> definition)
    #[arg(short, long, default_value = "defs.json")]
    output: PathBuf,

    /// Keep entries already defined in the output file
    #[arg(long)]
    append: bool,

    /// Write a checkpoint every N words (0 to disable)
    #[arg(long, default_value_t = 50)]
    save_every: usize,

    /// Source configuration YAML (default: schema/sources.yaml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only process the first N words (for testing)
    #[arg(long)]
    limit: Option<usize>,

    /// Quiet mode - no progress bar or report
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn progress_bar(len: usize, quiet: bool) -> anyhow::Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .context("invalid progress template")?,
    );
    Ok(pb)
}

fn print_stats(stats: &RunStats) {
    println!();
    println!("============================================================");
    println!("Words processed: {}", stats.terms_seen);
    println!("Definitions added: {}", stats.updated);
    for (source, hits) in &stats.source_hits {
        println!("  from {}: {}", source, hits);
    }
    println!("Unresolved: {}", stats.unresolved);
    println!("Already defined / skipped: {}", stats.skipped);
    println!("Total entries: {}", stats.total_entries);
    println!("Snapshots written: {}", stats.snapshots);
    println!("Time: {}m {}s", stats.elapsed.as_secs() / 60, stats.elapsed.as_secs() % 60);
    println!("============================================================");
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = resolve_config(args.config.as_deref()).context("Error loading source config")?;

    // Bad input fails here, before any request goes out
    let mut terms = load_terms(&args.input)
        .with_context(|| format!("Error reading words from {}", args.input.display()))?;
    if let Some(limit) = args.limit {
        terms.truncate(limit);
    }

    let mut defs = if args.append {
        load_existing(&args.output)
            .with_context(|| format!("Error loading existing definitions from {}", args.output.display()))?
    } else {
        Definitions::new()
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        // A second Ctrl+C does not wait for the word in flight
        if stop_handler.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted. Last checkpoint kept; rerun with --append to resume.");
            std::process::exit(1);
        }
        eprintln!("\nCtrl+C received, stopping after the current word (press again to quit now)...");
    })
    .context("Error installing Ctrl+C handler")?;

    if !args.quiet {
        println!("Input: {}", args.input.display());
        println!("Output: {}", args.output.display());
        println!("Words: {}", terms.len());
        if args.append {
            println!("Append: {} existing entries", defs.len());
        }
        println!();
    }

    let sources = default_sources(&config)?;
    let post_fix = PostFix::new(&config.lead_in_patterns)?;
    let http = HttpClient::from_config(&config);
    let mut pipeline = Pipeline::new(http, sources, post_fix, args.output.clone(), args.save_every);

    let pb = progress_bar(terms.len(), args.quiet)?;
    let stats = pipeline.run(&terms, &mut defs, &stop, &pb)?;
    pb.finish_and_clear();

    if stats.outcome == RunOutcome::Interrupted {
        eprintln!(
            "Interrupted. Last checkpoint kept at {}; rerun with --append to resume.",
            args.output.display()
        );
        std::process::exit(1);
    }

    if !args.quiet {
        print_stats(&stats);
    }

    Ok(())
}
