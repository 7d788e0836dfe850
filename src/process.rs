//! Unit processing seam: submit one unit through the external channel.
//!
//! Intentionally thin. A processor performs exactly one remote submission and
//! classifies the outcome; it never retries, never rotates sessions, never
//! touches local state. All recovery policy lives in [`crate::driver`], so a
//! processor implementation stays a pure description of the channel's
//! request/response behaviour.

use crate::chunk::Unit;
use crate::error::ProcessFailure;
use crate::session::Session;
use async_trait::async_trait;

/// Submits one unit on one session and returns the transformed text.
///
/// # Contract
///
/// * One call performs at most one remote submission - internal retry loops
///   belong to the driver, which also owns the backoff and rotation policy.
/// * Outcomes are classified into the three [`ProcessFailure`] kinds:
///   `QuotaExhausted` when the channel signals the session's allowance is
///   spent (the unit must survive for the next session), `SessionInvalid`
///   when the session itself was rejected, `Transient` for everything that a
///   plain retry can fix.
/// * No side effects beyond the remote submission itself.
#[async_trait]
pub trait UnitProcessor: Send + Sync {
    async fn process(&self, unit: &Unit, session: &Session) -> Result<String, ProcessFailure>;
}

/// A processor that returns the unit text unchanged.
///
/// Stands in for the real transformation channel in rehearsal runs and
/// tests: the whole driver - chunking, session rotation, durable appends,
/// resume - can be exercised end-to-end with no network and no quota spent.
#[derive(Debug, Default)]
pub struct LoopbackProcessor;

impl LoopbackProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UnitProcessor for LoopbackProcessor {
    async fn process(&self, unit: &Unit, _session: &Session) -> Result<String, ProcessFailure> {
        Ok(unit.text.clone())
    }
}
