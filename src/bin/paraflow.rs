//! CLI binary for paraflow.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig`,
//! prints chunk plans, and drives rehearsal runs.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paraflow::{
    chunk, read_document, read_jsonl_records, transform_text, CancelToken, ChunkMode, JsonlSink,
    LoopbackProcessor, MemorySink, ProcessFailure, ProgressCallback, RunConfig, RunProgress,
    RunReport, StaticSessionProvider, TextFileSink, Unit,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the unit queue, a log line per
/// retry so session rotations stay visible without scrolling the bar away.
struct CliRunProgress {
    bar: ProgressBar,
}

impl CliRunProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} units  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("Transforming");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RunProgress for CliRunProgress {
    fn on_run_start(&self, pending_units: usize) {
        self.bar.set_length(pending_units as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {pending_units} units…"))
        ));
    }

    fn on_unit_start(&self, ordinal: usize, _total: usize) {
        self.bar.set_message(format!("unit {ordinal}"));
    }

    fn on_unit_complete(&self, ordinal: usize, total: usize) {
        self.bar
            .println(format!("  {} Unit {:>3}/{:<3} persisted", green("✓"), ordinal, total));
        self.bar.inc(1);
    }

    fn on_unit_retry(&self, ordinal: usize, attempt: u32, failure: &ProcessFailure) {
        let msg = failure.to_string();
        let msg = if msg.chars().count() > 80 {
            let head: String = msg.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            msg
        };
        self.bar.println(format!(
            "  {} Unit {:>3} retry #{attempt}  {}",
            yellow("↻"),
            ordinal,
            yellow(&msg),
        ));
    }

    fn on_run_complete(&self, report: &RunReport) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}/{} units persisted  ({} sessions, {} retries, {}ms)",
            green("✔"),
            bold(&report.completed_units.to_string()),
            report.total_units - report.resumed_units,
            report.sessions_acquired,
            report.unit_retries,
            report.duration_ms,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Show the chunk plan for a document
  paraflow article.txt

  # Sentence-aligned units of at most 200 words
  paraflow article.txt --preserve-sentences --max-words 200

  # Document statistics only (no unit texts)
  paraflow article.txt --inspect-only
  paraflow article.txt --inspect-only --json

  # Persist the plan as JSONL (one unit per line)
  paraflow article.txt --write-plan -o plan.jsonl

  # Rehearse the full pipeline: session rotation, durable appends, resume.
  # Re-running against the same output continues where it stopped.
  paraflow article.txt --rehearse -o article.out.jsonl

  # Chunk a document straight off the web
  paraflow https://example.com/article.txt --inspect-only

MODES:
  default          print the chunk plan (ordinal, words, preview per unit)
  --inspect-only   document/plan statistics, human or --json
  --write-plan     write the units to -o as JSONL
  --rehearse       drive the real pipeline through the built-in loopback
                   channel; useful for validating chunking, durability and
                   resume before spending real session quota

ENVIRONMENT VARIABLES:
  PARAFLOW_MAX_WORDS     Default for --max-words
  PARAFLOW_OUTPUT        Default for --output
  RUST_LOG               Overrides the log filter (tracing_subscriber EnvFilter)
"#;

/// Split documents into bounded units and drive them through a resumable
/// transformation pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "paraflow",
    version,
    about = "Resumable, chunked document transformation",
    long_about = "Split a long document into bounded-word units and process them through a \
session-rotating, crash-resumable pipeline. The chunk plan is deterministic, so the plan you \
inspect is the plan a run executes.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local text file path or HTTP/HTTPS URL.
    input: String,

    /// Write output to this file (plan JSONL, or rehearsal records).
    #[arg(short, long, env = "PARAFLOW_OUTPUT")]
    output: Option<PathBuf>,

    /// Maximum words per unit.
    #[arg(long, env = "PARAFLOW_MAX_WORDS", default_value_t = 250)]
    max_words: usize,

    /// Never split a sentence across units (a sentence longer than
    /// --max-words gets its own oversized unit).
    #[arg(long)]
    preserve_sentences: bool,

    /// Print document/plan statistics only.
    #[arg(long)]
    inspect_only: bool,

    /// Write the chunk plan to --output as JSONL.
    #[arg(long, conflicts_with = "inspect_only")]
    write_plan: bool,

    /// Drive the full pipeline through the built-in loopback channel.
    #[arg(long, conflicts_with_all = ["inspect_only", "write_plan"])]
    rehearse: bool,

    /// Abandon a unit after this many failed submissions (default: retry forever).
    #[arg(long)]
    max_retries: Option<u32>,

    /// Consecutive failed session acquisitions tolerated before giving up.
    #[arg(long, default_value_t = 5)]
    session_attempts: u32,

    /// Structured JSON output instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(serde::Serialize)]
struct InspectReport<'a> {
    input: &'a str,
    format: paraflow::SourceFormat,
    bytes: usize,
    words: usize,
    sentences: usize,
    max_words: usize,
    mode: ChunkMode,
    units: usize,
    largest_unit_words: usize,
    resumable_records: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active; the
    // bar provides all the feedback that matters to the user.
    let show_progress = cli.rehearse && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mode = if cli.preserve_sentences {
        ChunkMode::PreserveSentences
    } else {
        ChunkMode::FixedWindow
    };

    let document = read_document(&cli.input, cli.download_timeout)
        .await
        .context("Failed to read input document")?;
    let units = chunk(&document.text, cli.max_words, mode);

    if cli.inspect_only {
        return inspect(&cli, &document, &units, mode).await;
    }
    if cli.write_plan {
        return write_plan(&cli, &units).await;
    }
    if cli.rehearse {
        return rehearse(&cli, &document.text, mode, show_progress).await;
    }

    print_plan(&cli, &units);
    Ok(())
}

/// Default mode: a human-readable chunk plan.
fn print_plan(cli: &Cli, units: &[Unit]) {
    if units.is_empty() {
        eprintln!("{}", yellow("Nothing to do: the document is empty."));
        return;
    }
    println!(
        "{}",
        bold(&format!(
            "{} units (max {} words{})",
            units.len(),
            cli.max_words,
            if cli.preserve_sentences {
                ", sentence-aligned"
            } else {
                ""
            }
        ))
    );
    for unit in units {
        let preview: String = unit.text.chars().take(60).collect();
        let ellipsis = if unit.text.chars().count() > 60 { "…" } else { "" };
        println!(
            "  {:>4}  {:>4} words  {}{}",
            unit.ordinal,
            unit.word_count(),
            dim(&preview),
            dim(ellipsis),
        );
    }
}

/// --inspect-only: statistics, human or JSON.
async fn inspect(cli: &Cli, document: &paraflow::Document, units: &[Unit], mode: ChunkMode) -> Result<()> {
    let resumable_records = match cli.output {
        Some(ref path) if path.extension().is_some_and(|e| e == "jsonl") && path.exists() => {
            Some(read_jsonl_records(path).await?.len())
        }
        _ => None,
    };

    let report = InspectReport {
        input: &cli.input,
        format: document.format,
        bytes: document.text.len(),
        words: document.word_count(),
        sentences: paraflow::sentences(&document.text).len(),
        max_words: cli.max_words,
        mode,
        units: units.len(),
        largest_unit_words: units.iter().map(Unit::word_count).max().unwrap_or(0),
        resumable_records,
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else {
        println!("Input:        {}", report.input);
        println!("Format:       {:?}", report.format);
        println!("Bytes:        {}", report.bytes);
        println!("Words:        {}", report.words);
        println!("Sentences:    {}", report.sentences);
        println!("Units:        {} (max {} words, {:?})", report.units, report.max_words, report.mode);
        println!("Largest unit: {} words", report.largest_unit_words);
        if let Some(done) = report.resumable_records {
            println!("Resumable:    {done}/{} units already persisted", report.units);
        }
    }
    Ok(())
}

/// --write-plan: persist the unit sequence as JSONL.
async fn write_plan(cli: &Cli, units: &[Unit]) -> Result<()> {
    let path = cli
        .output
        .as_ref()
        .context("--write-plan requires --output")?;
    let mut lines = String::new();
    for unit in units {
        lines.push_str(&serde_json::to_string(unit).context("Failed to serialise unit")?);
        lines.push('\n');
    }
    tokio::fs::write(path, lines)
        .await
        .with_context(|| format!("Failed to write plan to {}", path.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} {} units  →  {}",
            green("✔"),
            units.len(),
            bold(&path.display().to_string())
        );
    }
    Ok(())
}

/// --rehearse: drive the real pipeline through the loopback channel.
async fn rehearse(cli: &Cli, text: &str, mode: ChunkMode, show_progress: bool) -> Result<()> {
    let cancel = CancelToken::new();
    {
        // Ctrl-C takes effect between units; completed appends stay on disk.
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{}", yellow("Cancellation requested; finishing current unit…"));
                cancel.cancel();
            }
        });
    }

    let mut builder = RunConfig::builder()
        .max_words(cli.max_words)
        .chunk_mode(mode)
        .max_session_attempts(cli.session_attempts)
        .download_timeout_secs(cli.download_timeout)
        .cancel_token(cancel);
    if let Some(n) = cli.max_retries {
        builder = builder.max_retries_per_unit(n);
    }
    if show_progress {
        let bar: ProgressCallback = CliRunProgress::new();
        builder = builder.progress_callback(bar);
    }
    let config = builder.build().context("Invalid configuration")?;

    let provider = Arc::new(StaticSessionProvider::new());
    let processor = Arc::new(LoopbackProcessor::new());

    // Without an output target the records are collected in memory and
    // printed afterwards; progress output goes to stderr, so stdout stays
    // clean for piping.
    let (report, collected) = match cli.output {
        Some(ref path) if path.extension().is_some_and(|e| e == "jsonl") => {
            let mut sink = JsonlSink::open(path).await?;
            let report = transform_text(text, provider, processor, &mut sink, &config)
                .await
                .context("Run failed")?;
            (report, None)
        }
        Some(ref path) => {
            let mut sink = TextFileSink::open(path).await?;
            let report = transform_text(text, provider, processor, &mut sink, &config)
                .await
                .context("Run failed")?;
            (report, None)
        }
        None => {
            let mut sink = MemorySink::new();
            let report = transform_text(text, provider, processor, &mut sink, &config)
                .await
                .context("Run failed")?;
            (report, Some(sink.joined("\n\n")))
        }
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if let Some(joined) = collected {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(joined.as_bytes()).context("Failed to write to stdout")?;
        if !joined.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Processed {}/{} units in {}ms",
            report.completed_units,
            report.total_units - report.resumed_units,
            report.duration_ms
        );
    }

    Ok(())
}
