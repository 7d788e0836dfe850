//! The pipeline driver: sequence chunk submission, session rotation, and
//! durable persistence.
//!
//! ## The loop
//!
//! ```text
//! ┌─▶ AcquiringSession ──failure (bounded)──▶ retry with new identity
//! │        │ session
//! │        ▼
//! │    Submitting ──Quota/Transient/Invalid──▶ rotate session, same unit ─┐
//! │        │ success                                                      │
//! │        ▼                                                              │
//! │    append (durable) ──▶ dequeue ──▶ next unit                         │
//! └────────────────────────────────────────────────────────────◀─────────┘
//! ```
//!
//! The ordering guarantee falls out of the structure: the queue is FIFO, one
//! unit is in flight at a time, and a unit is dequeued only after its record
//! is durably appended - so records land in strict ordinal order no matter
//! how many sessions any single unit burned.
//!
//! ## Session hygiene
//!
//! Every acquired session is torn down exactly once, before the submission
//! outcome is even examined. Success, quota exhaustion, transport error,
//! fatal sink error - the session never outlives the attempt it served.
//!
//! ## Why strictly sequential?
//!
//! Each unit consumes one session's quota and sessions are the scarce,
//! rate-limited resource. Concurrency across units would need a pool of
//! independent sessions and a quota-aware scheduler; the channel this design
//! targets offers neither.

use crate::chunk::{chunk, Unit};
use crate::config::RunConfig;
use crate::error::{AcquisitionError, PipelineError, ProcessFailure};
use crate::input::read_document;
use crate::process::UnitProcessor;
use crate::session::SessionProvider;
use crate::sink::{PersistenceSink, ResultRecord};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Cooperative cancellation handle.
///
/// Cheap to clone; all clones observe the same flag. The driver checks it at
/// the top of the per-unit loop: an in-flight submission finishes (and is
/// persisted if it succeeded), but no further session is acquired after the
/// flag is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal state of a run that did not end in a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every pending unit was transformed and persisted.
    Completed,
    /// The queue was empty at start (empty document, or everything was
    /// already persisted by a previous run). Not an error.
    NothingToDo,
    /// Cancellation was observed between units; completed work is persisted.
    Cancelled,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// Units in the full chunk sequence, including ones skipped by resume.
    pub total_units: usize,
    /// Units skipped at start because the sink already held their records.
    pub resumed_units: usize,
    /// Units completed and persisted by this run.
    pub completed_units: usize,
    /// Sessions successfully acquired (one per submission attempt).
    pub sessions_acquired: u64,
    /// Failed acquisition attempts, across all identities.
    pub acquisition_failures: u64,
    /// Failed submissions that led to a session rotation.
    pub unit_retries: u64,
    pub duration_ms: u64,
}

impl RunReport {
    /// A zeroed report with the given status.
    pub fn empty(status: RunStatus) -> Self {
        Self {
            status,
            total_units: 0,
            resumed_units: 0,
            completed_units: 0,
            sessions_acquired: 0,
            acquisition_failures: 0,
            unit_retries: 0,
            duration_ms: 0,
        }
    }

    /// Units still unprocessed when the run ended.
    pub fn remaining_units(&self) -> usize {
        self.total_units - self.resumed_units - self.completed_units
    }
}

/// Exponential backoff factor, capped at 32× the base delay.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(5);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Drive the unit queue to completion.
///
/// This is the core state machine; [`transform_text`] and [`transform_file`]
/// are thin wrappers that chunk first. Units whose ordinal is below
/// `sink.completed_units()` are skipped - that is the resume path, and the
/// reason completed units are never re-submitted after a crash.
///
/// # Errors
/// Fatal only: sink I/O failure, exhaustion of the consecutive
/// session-acquisition budget, or (when a per-unit retry cap is configured)
/// a unit exceeding that cap. Per-unit failures are retried internally and
/// surface only through the progress hooks.
pub async fn run_pipeline(
    units: Vec<Unit>,
    provider: Arc<dyn SessionProvider>,
    processor: Arc<dyn UnitProcessor>,
    sink: &mut dyn PersistenceSink,
    config: &RunConfig,
) -> Result<RunReport, PipelineError> {
    let start = Instant::now();
    let total_units = units.len();
    let resumed = sink.completed_units().min(total_units);

    let mut queue: VecDeque<Unit> = units.into_iter().skip(resumed).collect();
    let mut report = RunReport::empty(RunStatus::Completed);
    report.total_units = total_units;
    report.resumed_units = resumed;

    if queue.is_empty() {
        info!("Nothing to process ({total_units} units, {resumed} already persisted)");
        report.status = RunStatus::NothingToDo;
        report.duration_ms = start.elapsed().as_millis() as u64;
        if let Some(ref cb) = config.progress_callback {
            cb.on_run_complete(&report);
        }
        return Ok(report);
    }

    info!(
        "Starting run: {} pending units ({} resumed), max {} words each",
        queue.len(),
        resumed,
        config.max_words
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(queue.len());
    }

    // Consecutive failed acquisitions; resets on every successful acquire.
    let mut acquisition_streak: u32 = 0;
    // Failed submissions of the unit currently at the front of the queue.
    let mut unit_attempts: u32 = 0;

    while let Some(unit) = queue.front() {
        let ordinal = unit.ordinal;

        if config.cancel.is_cancelled() {
            info!("Cancellation observed before unit {ordinal}; stopping");
            report.status = RunStatus::Cancelled;
            break;
        }

        // ── Acquire a fresh session for this attempt ─────────────────────
        let acquired = match timeout(
            Duration::from_secs(config.acquire_timeout_secs),
            provider.acquire(config.identity_hint.as_deref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AcquisitionError::Timeout {
                secs: config.acquire_timeout_secs,
            }),
        };

        let session = match acquired {
            Ok(session) => {
                acquisition_streak = 0;
                session
            }
            Err(e) => {
                acquisition_streak += 1;
                report.acquisition_failures += 1;
                warn!(
                    "Session acquisition failed ({acquisition_streak}/{}): {e}",
                    config.max_session_attempts
                );
                if acquisition_streak >= config.max_session_attempts {
                    return Err(PipelineError::AcquisitionBudgetExhausted {
                        attempts: acquisition_streak,
                        last: e,
                    });
                }
                sleep(backoff_delay(config.retry_backoff_ms, acquisition_streak)).await;
                continue;
            }
        };

        report.sessions_acquired += 1;
        debug!(
            "Session {} (identity '{}') acquired for unit {ordinal}",
            session.id(),
            session.identity()
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_unit_start(ordinal, total_units);
        }

        // ── Submit the front unit, bounded ───────────────────────────────
        let outcome = match timeout(
            Duration::from_secs(config.submit_timeout_secs),
            processor.process(unit, &session),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProcessFailure::Transient {
                detail: format!(
                    "submission timed out after {}s",
                    config.submit_timeout_secs
                ),
            }),
        };

        // The session is done either way; release it before acting on the
        // outcome so even a fatal sink error below cannot leak it.
        provider.teardown(session).await;

        match outcome {
            Ok(text) => {
                let record = ResultRecord { ordinal, text };
                sink.append(&record).await?;
                queue.pop_front();
                report.completed_units += 1;
                unit_attempts = 0;
                info!(
                    "Unit {ordinal} persisted ({}/{} done)",
                    resumed + report.completed_units,
                    total_units
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_unit_complete(ordinal, total_units);
                }
            }
            Err(failure) => {
                unit_attempts += 1;
                report.unit_retries += 1;
                match failure {
                    ProcessFailure::QuotaExhausted => {
                        info!("Unit {ordinal}: session quota exhausted; rotating session")
                    }
                    ref other => {
                        warn!("Unit {ordinal}: attempt {unit_attempts} failed - {other}")
                    }
                }
                if let Some(ref cb) = config.progress_callback {
                    cb.on_unit_retry(ordinal, unit_attempts, &failure);
                }
                if let Some(cap) = config.max_retries_per_unit {
                    if unit_attempts >= cap {
                        return Err(PipelineError::UnitAbandoned {
                            ordinal,
                            retries: unit_attempts,
                            last: failure,
                        });
                    }
                }
                sleep(backoff_delay(config.retry_backoff_ms, unit_attempts)).await;
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Run {:?}: {}/{} units this run, {} sessions, {} retries, {}ms",
        report.status,
        report.completed_units,
        total_units,
        report.sessions_acquired,
        report.unit_retries,
        report.duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(&report);
    }
    Ok(report)
}

/// Chunk `text` per the config and drive the resulting units to completion.
pub async fn transform_text(
    text: &str,
    provider: Arc<dyn SessionProvider>,
    processor: Arc<dyn UnitProcessor>,
    sink: &mut dyn PersistenceSink,
    config: &RunConfig,
) -> Result<RunReport, PipelineError> {
    let units = chunk(text, config.max_words, config.chunk_mode);
    run_pipeline(units, provider, processor, sink, config).await
}

/// Resolve `input` (local path or HTTP/HTTPS URL) to a plain-text document,
/// then chunk and transform it.
///
/// This is the primary entry point for file-based callers.
pub async fn transform_file(
    input: impl AsRef<str>,
    provider: Arc<dyn SessionProvider>,
    processor: Arc<dyn UnitProcessor>,
    sink: &mut dyn PersistenceSink,
    config: &RunConfig,
) -> Result<RunReport, PipelineError> {
    let document = read_document(input.as_ref(), config.download_timeout_secs).await?;
    transform_text(&document.text, provider, processor, sink, config).await
}
