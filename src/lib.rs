//! # paraflow
//!
//! Resumable, chunked document transformation over a rationed external
//! channel.
//!
//! ## Why this crate?
//!
//! Pushing a long document through a rate-limited transformation service
//! fails in predictable ways: the session's allowance runs out mid-document,
//! the transport hiccups, the process dies. Naive scripts lose everything
//! already transformed and start over. paraflow splits the document into
//! bounded-size units, submits one unit per session, rotates the session on
//! any failure, and durably appends each result *before* advancing - so
//! interruption or per-unit failure never costs completed work, and a killed
//! run resumes exactly where it stopped.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Chunk    sanitise + partition into ≤ max_words units
//!  ├─ 3. Acquire  fresh session per submission attempt (injected provider)
//!  ├─ 4. Submit   one unit on one session (injected processor)
//!  │               ├─ quota gone / transient / invalid ──▶ rotate, retry unit
//!  │               └─ success ──▶ 5
//!  └─ 5. Persist  durable append, then dequeue; crash-safe resume point
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paraflow::{transform_file, JsonlSink, LoopbackProcessor, RunConfig, StaticSessionProvider};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::default();
//!     // Swap these two for implementations backed by a real channel.
//!     let provider = Arc::new(StaticSessionProvider::new());
//!     let processor = Arc::new(LoopbackProcessor::new());
//!
//!     let mut sink = JsonlSink::open("article.out.jsonl").await?;
//!     let report = transform_file("article.txt", provider, processor, &mut sink, &config).await?;
//!     eprintln!("{}/{} units done", report.completed_units, report.total_units);
//!     Ok(())
//! }
//! ```
//!
//! ## The collaborator seams
//!
//! The environment-specific machinery stays outside the crate, behind three
//! traits:
//!
//! | Trait | Responsibility |
//! |-------|----------------|
//! | [`SessionProvider`] | open/close one authenticated window on the channel |
//! | [`UnitProcessor`]   | submit one unit on one session, classify the outcome |
//! | [`PersistenceSink`] | durably append one record, report resume progress |
//!
//! [`StaticSessionProvider`] and [`LoopbackProcessor`] are in-process stand-ins
//! used for rehearsal runs and tests.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paraflow` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paraflow = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod chunk;
pub mod config;
pub mod driver;
pub mod error;
pub mod input;
pub mod process;
pub mod progress;
pub mod session;
pub mod sink;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use chunk::{chunk, sanitize, sentences, Unit};
pub use config::{ChunkMode, RunConfig, RunConfigBuilder};
pub use driver::{run_pipeline, transform_file, transform_text, CancelToken, RunReport, RunStatus};
pub use error::{AcquisitionError, PipelineError, ProcessFailure, SinkError};
pub use input::{read_document, Document, SourceFormat};
pub use process::{LoopbackProcessor, UnitProcessor};
pub use progress::{NoopRunProgress, ProgressCallback, RunProgress};
pub use session::{IdentityLedger, Session, SessionProvider, StaticSessionProvider};
pub use sink::{read_jsonl_records, JsonlSink, MemorySink, PersistenceSink, ResultRecord, TextFileSink};
pub use stream::{run_stream, RunEvent, RunStream};
