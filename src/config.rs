//! Configuration types for a pipeline run.
//!
//! All run behaviour is controlled through [`RunConfig`], built via its
//! [`RunConfigBuilder`]. Keeping every knob in one struct makes it trivial to
//! share configs across calls, serialise them for logging, and diff two runs
//! to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A dozen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::driver::CancelToken;
use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for one pipeline run.
///
/// Built via [`RunConfig::builder()`] or using [`RunConfig::default()`].
///
/// # Example
/// ```rust
/// use paraflow::{ChunkMode, RunConfig};
///
/// let config = RunConfig::builder()
///     .max_words(200)
///     .chunk_mode(ChunkMode::PreserveSentences)
///     .max_retries_per_unit(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// Maximum words per unit. Default: 250.
    ///
    /// 250 words is what typical free transformation allowances cover per
    /// submission; a smaller value burns sessions faster, a larger one risks
    /// the channel truncating or rejecting the unit. In
    /// [`ChunkMode::PreserveSentences`] a single sentence longer than this is
    /// still kept whole (see [`crate::chunk`]).
    pub max_words: usize,

    /// How the document is partitioned into units. Default: [`ChunkMode::FixedWindow`].
    pub chunk_mode: ChunkMode,

    /// Base identity handed to the session provider on each acquisition.
    ///
    /// Opaque to the core: a provider that rotates identities derives a fresh
    /// variation from this hint per attempt. `None` lets the provider choose.
    pub identity_hint: Option<String>,

    /// Maximum *consecutive* failed session acquisitions before the run is
    /// declared fatal. Default: 5.
    ///
    /// The counter resets on every successful acquisition, so a flaky
    /// provider that still makes progress never trips this. It exists to stop
    /// a run that cannot obtain any session at all.
    pub max_session_attempts: u32,

    /// Optional cap on submissions per unit. Default: `None` (unbounded).
    ///
    /// The default policy never gives up on a unit: the same unit is
    /// re-submitted on a fresh session until it succeeds. Setting a cap turns
    /// a permanently failing unit into a terminal
    /// [`PipelineError::UnitAbandoned`] instead of an infinite loop.
    pub max_retries_per_unit: Option<u32>,

    /// Bound on one session acquisition, in seconds. Default: 60.
    ///
    /// The driver wraps [`crate::session::SessionProvider::acquire`] in this
    /// timeout; exceeding it counts as one failed acquisition attempt, never
    /// a hang.
    pub acquire_timeout_secs: u64,

    /// Bound on one unit submission, in seconds. Default: 120.
    ///
    /// Exceeding it classifies as a transient failure and rotates the
    /// session, same as any other transport problem.
    pub submit_timeout_secs: u64,

    /// Initial delay before re-submitting a failed unit, in milliseconds
    /// (exponential backoff). Default: 500.
    ///
    /// Doubles per consecutive failure of the same unit, capped at 32× the
    /// base, and resets when the unit completes. Rotating sessions at full
    /// speed against a struggling channel only makes the channel struggle
    /// more.
    pub retry_backoff_ms: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Observation hooks for run/unit events. Default: none.
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative cancellation handle, observed between units.
    ///
    /// Clone the token before building the config to keep a handle for
    /// signalling. Default: a fresh, never-cancelled token.
    pub cancel: CancelToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_words: 250,
            chunk_mode: ChunkMode::default(),
            identity_hint: None,
            max_session_attempts: 5,
            max_retries_per_unit: None,
            acquire_timeout_secs: 60,
            submit_timeout_secs: 120,
            retry_backoff_ms: 500,
            download_timeout_secs: 120,
            progress_callback: None,
            cancel: CancelToken::new(),
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("max_words", &self.max_words)
            .field("chunk_mode", &self.chunk_mode)
            .field("identity_hint", &self.identity_hint)
            .field("max_session_attempts", &self.max_session_attempts)
            .field("max_retries_per_unit", &self.max_retries_per_unit)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("submit_timeout_secs", &self.submit_timeout_secs)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgress>"),
            )
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunConfig {
    /// Create a new builder for `RunConfig`.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RunConfig`].
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn max_words(mut self, n: usize) -> Self {
        self.config.max_words = n.max(1);
        self
    }

    pub fn chunk_mode(mut self, mode: ChunkMode) -> Self {
        self.config.chunk_mode = mode;
        self
    }

    pub fn identity_hint(mut self, hint: impl Into<String>) -> Self {
        self.config.identity_hint = Some(hint.into());
        self
    }

    pub fn max_session_attempts(mut self, n: u32) -> Self {
        self.config.max_session_attempts = n.max(1);
        self
    }

    pub fn max_retries_per_unit(mut self, n: u32) -> Self {
        self.config.max_retries_per_unit = Some(n);
        self
    }

    pub fn acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.config.acquire_timeout_secs = secs;
        self
    }

    pub fn submit_timeout_secs(mut self, secs: u64) -> Self {
        self.config.submit_timeout_secs = secs;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel = token;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RunConfig, PipelineError> {
        let c = &self.config;
        if c.max_words == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_words must be ≥ 1".into(),
            ));
        }
        if c.acquire_timeout_secs == 0 || c.submit_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        if let Some(0) = c.max_retries_per_unit {
            return Err(PipelineError::InvalidConfig(
                "max_retries_per_unit must be ≥ 1 when set (omit it for unbounded retries)".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How document text is partitioned into units.
///
/// Two modes exist because the hard word cap and sentence integrity cannot
/// both hold at once. `FixedWindow` guarantees no unit exceeds `max_words`;
/// `PreserveSentences` guarantees no sentence is ever split, accepting that a
/// single oversized sentence yields a unit above the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChunkMode {
    /// Split on whitespace into fixed windows of `max_words`. (default)
    #[default]
    FixedWindow,
    /// Accumulate whole sentences per unit, closing a unit before the cap
    /// would be exceeded.
    PreserveSentences,
}
