//! End-to-end pipeline tests with scripted collaborators.
//!
//! Everything here runs locally: providers and processors are in-process
//! stubs, and backoff delays are set to 1ms so failure-heavy scenarios finish
//! instantly. Each test targets one guarantee of the driver loop: ordered
//! output under retries, one session per submission attempt, teardown on
//! every path, durable resume, cooperative cancellation, and the two fatal
//! budgets.

use async_trait::async_trait;
use paraflow::{
    chunk, run_pipeline, AcquisitionError, CancelToken, ChunkMode, JsonlSink, MemorySink,
    PersistenceSink, PipelineError, ProcessFailure, ProgressCallback, RunConfig, RunProgress,
    RunStatus, Session, SessionProvider, Unit, UnitProcessor,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// ── Scripted collaborators ──────────────────────────────────────────────────

/// Provider that follows a script of per-acquisition outcomes (`true` =
/// succeed), then succeeds forever. Counts acquisitions and teardowns.
#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<VecDeque<bool>>,
    attempts: AtomicU64,
    torn_down: AtomicU64,
}

impl ScriptedProvider {
    fn always_ok() -> Self {
        Self::default()
    }

    fn with_script(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn torn_down(&self) -> u64 {
        self.torn_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn acquire(&self, identity_hint: Option<&str>) -> Result<Session, AcquisitionError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            Ok(Session::new(format!(
                "{}+{n}",
                identity_hint.unwrap_or("test")
            )))
        } else {
            Err(AcquisitionError::Unavailable {
                detail: format!("scripted failure on attempt {n}"),
            })
        }
    }

    async fn teardown(&self, _session: Session) {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
    }
}

/// Processor that fails each unit per its script, then succeeds, prefixing
/// the text so the output is distinguishable from the input. Records the
/// ordinal of every submission it sees.
#[derive(Default)]
struct ScriptedProcessor {
    failures: Mutex<HashMap<usize, VecDeque<ProcessFailure>>>,
    submissions: Mutex<Vec<usize>>,
}

impl ScriptedProcessor {
    fn always_ok() -> Self {
        Self::default()
    }

    /// Fail unit `ordinal` once per failure listed, in order, then succeed.
    fn failing(script: impl IntoIterator<Item = (usize, ProcessFailure)>) -> Self {
        let mut failures: HashMap<usize, VecDeque<ProcessFailure>> = HashMap::new();
        for (ordinal, failure) in script {
            failures.entry(ordinal).or_default().push_back(failure);
        }
        Self {
            failures: Mutex::new(failures),
            submissions: Mutex::new(Vec::new()),
        }
    }

    fn submissions(&self) -> Vec<usize> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl UnitProcessor for ScriptedProcessor {
    async fn process(&self, unit: &Unit, _session: &Session) -> Result<String, ProcessFailure> {
        self.submissions.lock().unwrap().push(unit.ordinal);
        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&unit.ordinal)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(failure) => Err(failure),
            None => Ok(format!("[{}] {}", unit.ordinal, unit.text)),
        }
    }
}

/// Progress hook that cancels the run after N completed units.
struct CancelAfter {
    token: CancelToken,
    remaining: AtomicU64,
}

impl CancelAfter {
    fn new(token: CancelToken, units: u64) -> Arc<Self> {
        Arc::new(Self {
            token,
            remaining: AtomicU64::new(units),
        })
    }
}

impl RunProgress for CancelAfter {
    fn on_unit_complete(&self, _ordinal: usize, _total: usize) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.token.cancel();
        }
    }
}

fn transient(detail: &str) -> ProcessFailure {
    ProcessFailure::Transient {
        detail: detail.into(),
    }
}

/// `n` distinct whitespace-separated words.
fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
}

fn fast_config() -> RunConfig {
    RunConfig::builder()
        .retry_backoff_ms(1)
        .build()
        .expect("valid test config")
}

// ── Ordering and rotation ───────────────────────────────────────────────────

#[tokio::test]
async fn output_stays_ordered_when_a_unit_fails_repeatedly() {
    // 600 words at 250/unit = 3 units; unit 0 fails twice before succeeding.
    let units = chunk(&words(600), 250, ChunkMode::FixedWindow);
    assert_eq!(units.len(), 3);

    let provider = Arc::new(ScriptedProvider::always_ok());
    let processor = Arc::new(ScriptedProcessor::failing([
        (0, transient("flaky transport")),
        (0, transient("flaky transport")),
    ]));
    let mut sink = MemorySink::new();

    let report = run_pipeline(
        units,
        provider.clone(),
        processor.clone(),
        &mut sink,
        &fast_config(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.completed_units, 3);
    assert_eq!(report.unit_retries, 2);

    // Unit 0 blocks the queue until it succeeds; output order is ordinal order.
    let ordinals: Vec<usize> = sink.records().iter().map(|r| r.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
    assert_eq!(processor.submissions(), vec![0, 0, 0, 1, 2]);

    // One session per submission attempt, each torn down exactly once.
    assert_eq!(report.sessions_acquired, 5);
    assert_eq!(provider.torn_down(), 5);
}

#[tokio::test]
async fn quota_exhaustion_rotates_sessions_without_skipping_the_unit() {
    let units = chunk("only one unit here", 250, ChunkMode::FixedWindow);
    assert_eq!(units.len(), 1);

    let provider = Arc::new(ScriptedProvider::always_ok());
    let processor = Arc::new(ScriptedProcessor::failing([
        (0, ProcessFailure::QuotaExhausted),
        (0, ProcessFailure::QuotaExhausted),
        (0, ProcessFailure::QuotaExhausted),
    ]));
    let mut sink = MemorySink::new();

    let report = run_pipeline(
        units,
        provider.clone(),
        processor,
        &mut sink,
        &fast_config(),
    )
    .await
    .unwrap();

    // Three quota hits + one success = exactly four sessions for one unit.
    assert_eq!(report.sessions_acquired, 4);
    assert_eq!(provider.torn_down(), 4);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(sink.records()[0].ordinal, 0);
}

#[tokio::test]
async fn session_invalid_is_retried_like_any_other_failure() {
    let units = chunk(&words(10), 5, ChunkMode::FixedWindow);
    let provider = Arc::new(ScriptedProvider::always_ok());
    let processor = Arc::new(ScriptedProcessor::failing([(
        1,
        ProcessFailure::SessionInvalid {
            detail: "channel logged the session out".into(),
        },
    )]));
    let mut sink = MemorySink::new();

    let report = run_pipeline(units, provider, processor, &mut sink, &fast_config())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.unit_retries, 1);
    assert_eq!(sink.records().len(), 2);
}

// ── Durability and resume ───────────────────────────────────────────────────

#[tokio::test]
async fn resume_skips_persisted_units_and_never_resubmits_them() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.jsonl");
    let text = words(30);
    let units = chunk(&text, 10, ChunkMode::FixedWindow);
    assert_eq!(units.len(), 3);

    // First run "crashes": unit 1 keeps failing and a 1-retry cap turns that
    // into a fatal error after unit 0 was already durably appended.
    let config = RunConfig::builder()
        .retry_backoff_ms(1)
        .max_retries_per_unit(1)
        .build()
        .unwrap();
    let processor = Arc::new(ScriptedProcessor::failing([(1, transient("dead channel"))]));
    {
        let mut sink = JsonlSink::open(&path).await.unwrap();
        let err = run_pipeline(
            units.clone(),
            Arc::new(ScriptedProvider::always_ok()),
            processor,
            &mut sink,
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnitAbandoned { ordinal: 1, .. }
        ));
    }

    // Second run against the same file: unit 0 is skipped, 1 and 2 complete.
    let sink = JsonlSink::open(&path).await.unwrap();
    assert_eq!(sink.completed_units(), 1);
    let mut sink = sink;
    let processor = Arc::new(ScriptedProcessor::always_ok());
    let report = run_pipeline(
        units,
        Arc::new(ScriptedProvider::always_ok()),
        processor.clone(),
        &mut sink,
        &fast_config(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.resumed_units, 1);
    assert_eq!(report.completed_units, 2);
    // The persisted unit was never handed to the processor again.
    assert_eq!(processor.submissions(), vec![1, 2]);

    let records = paraflow::read_jsonl_records(&path).await.unwrap();
    let ordinals: Vec<usize> = records.iter().map(|r| r.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
}

#[tokio::test]
async fn fully_persisted_run_is_nothing_to_do() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.jsonl");
    let units = chunk(&words(20), 10, ChunkMode::FixedWindow);

    {
        let mut sink = JsonlSink::open(&path).await.unwrap();
        run_pipeline(
            units.clone(),
            Arc::new(ScriptedProvider::always_ok()),
            Arc::new(ScriptedProcessor::always_ok()),
            &mut sink,
            &fast_config(),
        )
        .await
        .unwrap();
    }

    let provider = Arc::new(ScriptedProvider::always_ok());
    let mut sink = JsonlSink::open(&path).await.unwrap();
    let report = run_pipeline(
        units,
        provider.clone(),
        Arc::new(ScriptedProcessor::always_ok()),
        &mut sink,
        &fast_config(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::NothingToDo);
    assert_eq!(report.resumed_units, 2);
    assert_eq!(report.remaining_units(), 0);
    // No session was acquired for work that was already done.
    assert_eq!(provider.attempts(), 0);
}

// ── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_stops_between_units_and_keeps_completed_work() {
    let cancel = CancelToken::new();
    let hook: ProgressCallback = CancelAfter::new(cancel.clone(), 1);
    let config = RunConfig::builder()
        .retry_backoff_ms(1)
        .cancel_token(cancel)
        .progress_callback(hook)
        .build()
        .unwrap();

    let units = chunk(&words(30), 10, ChunkMode::FixedWindow);
    let provider = Arc::new(ScriptedProvider::always_ok());
    let mut sink = MemorySink::new();

    let report = run_pipeline(
        units,
        provider.clone(),
        Arc::new(ScriptedProcessor::always_ok()),
        &mut sink,
        &config,
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.completed_units, 1);
    assert_eq!(report.remaining_units(), 2);
    // The first unit's record survived; no session was opened after the flag.
    assert_eq!(sink.records().len(), 1);
    assert_eq!(provider.attempts(), 1);
    assert_eq!(provider.torn_down(), 1);
}

#[tokio::test]
async fn pre_cancelled_run_acquires_nothing() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let config = RunConfig::builder()
        .cancel_token(cancel)
        .build()
        .unwrap();

    let provider = Arc::new(ScriptedProvider::always_ok());
    let mut sink = MemorySink::new();
    let report = run_pipeline(
        chunk("some text", 250, ChunkMode::FixedWindow),
        provider.clone(),
        Arc::new(ScriptedProcessor::always_ok()),
        &mut sink,
        &config,
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(provider.attempts(), 0);
    assert!(sink.records().is_empty());
}

// ── Fatal budgets ───────────────────────────────────────────────────────────

#[tokio::test]
async fn acquisition_budget_exhausts_after_consecutive_failures() {
    let config = RunConfig::builder()
        .retry_backoff_ms(1)
        .max_session_attempts(3)
        .build()
        .unwrap();

    let provider = Arc::new(ScriptedProvider::with_script([false, false, false, false]));
    let mut sink = MemorySink::new();
    let err = run_pipeline(
        chunk("some text", 250, ChunkMode::FixedWindow),
        provider.clone(),
        Arc::new(ScriptedProcessor::always_ok()),
        &mut sink,
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::AcquisitionBudgetExhausted { attempts: 3, .. }
    ));
    assert_eq!(provider.attempts(), 3);
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn acquisition_budget_resets_on_each_success() {
    // Two failures before each of two units' sessions: never three in a row,
    // so a budget of 3 is never tripped even though 4 attempts fail overall.
    let config = RunConfig::builder()
        .retry_backoff_ms(1)
        .max_session_attempts(3)
        .build()
        .unwrap();

    let provider = Arc::new(ScriptedProvider::with_script([
        false, false, true, false, false, true,
    ]));
    let mut sink = MemorySink::new();
    let report = run_pipeline(
        chunk(&words(20), 10, ChunkMode::FixedWindow),
        provider.clone(),
        Arc::new(ScriptedProcessor::always_ok()),
        &mut sink,
        &config,
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.sessions_acquired, 2);
    assert_eq!(report.acquisition_failures, 4);
    assert_eq!(sink.records().len(), 2);
}

#[tokio::test]
async fn retry_cap_turns_a_hopeless_unit_into_unit_abandoned() {
    let config = RunConfig::builder()
        .retry_backoff_ms(1)
        .max_retries_per_unit(3)
        .build()
        .unwrap();

    let provider = Arc::new(ScriptedProvider::always_ok());
    let processor = Arc::new(ScriptedProcessor::failing([
        (0, transient("down")),
        (0, transient("down")),
        (0, transient("down")),
        (0, transient("down")),
    ]));
    let mut sink = MemorySink::new();

    let err = run_pipeline(
        chunk("stubborn unit", 250, ChunkMode::FixedWindow),
        provider.clone(),
        processor,
        &mut sink,
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::UnitAbandoned {
            ordinal: 0,
            retries: 3,
            ..
        }
    ));
    // Teardown still happened for every acquired session.
    assert_eq!(provider.attempts(), 3);
    assert_eq!(provider.torn_down(), 3);
}

// ── End-to-end text transform ───────────────────────────────────────────────

#[tokio::test]
async fn transform_text_chunks_and_completes_sentence_mode() {
    let text = "First sentence here. Second sentence follows. \
                Third one is a little longer than the others. Fourth closes it.";
    let config = RunConfig::builder()
        .max_words(8)
        .chunk_mode(ChunkMode::PreserveSentences)
        .retry_backoff_ms(1)
        .build()
        .unwrap();

    let mut sink = MemorySink::new();
    let report = paraflow::transform_text(
        text,
        Arc::new(ScriptedProvider::always_ok()),
        Arc::new(ScriptedProcessor::always_ok()),
        &mut sink,
        &config,
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.completed_units, sink.records().len());
    // Every source word reappears exactly once across the outputs.
    let rejoined = sink
        .records()
        .iter()
        .map(|r| r.text.split_once("] ").map(|(_, t)| t).unwrap_or(&r.text))
        .collect::<Vec<_>>()
        .join(" ");
    let original: Vec<&str> = text.split_whitespace().collect();
    let roundtrip: Vec<&str> = rejoined.split_whitespace().collect();
    assert_eq!(original, roundtrip);
}
