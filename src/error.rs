//! Error types for the paraflow library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`PipelineError`] - **Fatal**: the run cannot proceed at all (bad input
//!   file, output no longer writable, session-acquisition budget exhausted).
//!   Returned as `Err(PipelineError)` from the top-level `transform_*` and
//!   `run_pipeline` functions.
//!
//! * [`ProcessFailure`] - **Non-fatal**: one submission of one unit failed
//!   (quota gone on this session, network blip, session rejected). Handled
//!   entirely inside the driver loop, which rotates the session and retries
//!   the same unit; callers only ever see these through the retry hook on
//!   [`crate::progress::RunProgress`].
//!
//! * [`AcquisitionError`] - **Per-attempt**: one attempt to obtain a fresh
//!   session failed. Recovered by retrying with a new identity, bounded by
//!   [`crate::config::RunConfig::max_session_attempts`].
//!
//! The separation keeps the propagation policy honest: only I/O on the sink
//! and exhaustion of the acquisition budget can kill a run; everything else
//! is a retry.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the paraflow library.
///
/// Unit-level failures use [`ProcessFailure`] and stay inside the driver
/// loop rather than propagating here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists but is not UTF-8 text the chunker can work on.
    #[error("File is not valid UTF-8 text: '{path}'")]
    NotText { path: PathBuf },

    /// The extension names a format whose decoding is a collaborator's job.
    #[error(
        "Unsupported input format '.{ext}' for '{path}'\n\
         paraflow consumes plain text; extract the '.{ext}' content first and feed the text."
    )]
    UnsupportedFormat { path: PathBuf, ext: String },

    // ── Session errors ────────────────────────────────────────────────────
    /// Too many consecutive session acquisitions failed with no unit
    /// completing in between.
    #[error(
        "Could not acquire a session after {attempts} consecutive attempts.\n\
         Last error: {last}"
    )]
    AcquisitionBudgetExhausted {
        attempts: u32,
        #[source]
        last: AcquisitionError,
    },

    /// A unit hit the configured per-unit retry cap.
    ///
    /// Only produced when
    /// [`crate::config::RunConfig::max_retries_per_unit`] is set; the default
    /// policy retries a unit indefinitely.
    #[error("Unit {ordinal} abandoned after {retries} failed submissions.\nLast error: {last}")]
    UnitAbandoned {
        ordinal: usize,
        retries: u32,
        last: ProcessFailure,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The persistence sink failed; a completed unit's output would be lost,
    /// so the run stops immediately.
    #[error(transparent)]
    Sink(#[from] SinkError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of a single unit submission.
///
/// The driver reacts to every variant the same way - tear the session down
/// and retry the unit on a fresh one - but the distinction matters for
/// logging and for providers that bill quota.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ProcessFailure {
    /// The session's remaining transformation allowance cannot cover this
    /// unit. The unit is fine; the session is spent.
    #[error("session quota exhausted")]
    QuotaExhausted,

    /// Network/timeout/transport-level trouble; retry is expected to work.
    #[error("transient failure: {detail}")]
    Transient { detail: String },

    /// The session expired or was rejected outright by the channel.
    #[error("session invalid: {detail}")]
    SessionInvalid { detail: String },
}

/// One failed attempt to acquire a session.
#[derive(Debug, Clone, Error)]
pub enum AcquisitionError {
    /// No confirmation signal arrived within the bounded wait.
    #[error("no session confirmation within {secs}s")]
    Timeout { secs: u64 },

    /// The identity was refused (verification link missing, token invalid).
    #[error("identity verification failed: {detail}")]
    Rejected { detail: String },

    /// The provider's transport could not be reached at all.
    #[error("session provider unavailable: {detail}")]
    Unavailable { detail: String },
}

/// Failures appending to a [`crate::sink::PersistenceSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// Could not create, write, or sync the sink's target.
    #[error("Failed to write output '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded for the target format.
    #[error("Failed to encode record {ordinal}: {source}")]
    Encode {
        ordinal: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_abandoned_display() {
        let e = PipelineError::UnitAbandoned {
            ordinal: 3,
            retries: 12,
            last: ProcessFailure::Transient {
                detail: "connection reset".into(),
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("Unit 3"), "got: {msg}");
        assert!(msg.contains("12"), "got: {msg}");
        assert!(msg.contains("connection reset"), "got: {msg}");
    }

    #[test]
    fn acquisition_budget_display() {
        let e = PipelineError::AcquisitionBudgetExhausted {
            attempts: 5,
            last: AcquisitionError::Timeout { secs: 60 },
        };
        assert!(e.to_string().contains("5 consecutive"));
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn process_failure_roundtrips_through_json() {
        let f = ProcessFailure::SessionInvalid {
            detail: "rejected".into(),
        };
        let json = serde_json::to_string(&f).unwrap();
        let back: ProcessFailure = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ProcessFailure::SessionInvalid { .. }));
    }

    #[test]
    fn unsupported_format_names_extension() {
        let e = PipelineError::UnsupportedFormat {
            path: PathBuf::from("report.docx"),
            ext: "docx".into(),
        };
        assert!(e.to_string().contains(".docx"));
    }
}
