//! Session acquisition seam: the one opaque capability the driver consumes.
//!
//! The environment-specific machinery - identity generation, sign-up
//! automation, confirmation-link handling - all lives behind
//! [`SessionProvider`]. The core never inspects how a session came to be; it
//! only consumes the success/failure contract and the opaque [`Session`]
//! handle, and it guarantees [`SessionProvider::teardown`] is called exactly
//! once per acquired session on every exit path.
//!
//! [`IdentityLedger`] is run-scoped dedup state for identity variations: it
//! is created per run and passed to (or owned by) the provider, so two
//! concurrent runs never contaminate each other's dedup state.

use crate::error::AcquisitionError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// An opaque, authenticated interaction window with the transformation
/// channel.
///
/// One session serves one unit-submission attempt (the driver's policy is
/// session-per-chunk-attempt) and is torn down unconditionally afterwards,
/// whether the attempt succeeded, failed, or exhausted the session's quota.
#[derive(Debug)]
pub struct Session {
    id: u64,
    identity: String,
}

impl Session {
    /// Create a handle for a freshly acquired session.
    ///
    /// `identity` is the rotation identity token the session was opened
    /// under; it is carried for logging and teardown, not interpreted.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            identity: identity.into(),
        }
    }

    /// Process-unique id, for log correlation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The identity token this session was opened under.
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

/// Acquires and releases sessions on the external channel.
///
/// Implementations do whatever the environment requires (browser automation,
/// API keys, a local stub); the driver only relies on:
///
/// * `acquire` returning a usable [`Session`] or a typed
///   [`AcquisitionError`] - it must not block past the driver's
///   acquisition timeout on well-behaved transports, and the driver wraps it
///   in a hard timeout regardless;
/// * `teardown` releasing whatever `acquire` allocated. It is infallible by
///   contract: a provider that can fail to clean up should log and swallow,
///   since the driver has nothing useful to do about it mid-run.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Open a fresh session, deriving a new identity from `identity_hint`
    /// when one is given.
    async fn acquire(&self, identity_hint: Option<&str>) -> Result<Session, AcquisitionError>;

    /// Release all resources behind `session`.
    async fn teardown(&self, session: Session);
}

/// Run-scoped deduplication of identity variations.
///
/// Providers that derive identities from a base hint use this to avoid
/// re-trying a variation that already failed or was already spent this run.
#[derive(Debug, Default)]
pub struct IdentityLedger {
    seen: Mutex<HashSet<String>>,
}

impl IdentityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `identity` as used. Returns `true` if it was fresh, `false`
    /// if this run has seen it before.
    pub fn claim(&self, identity: &str) -> bool {
        self.seen
            .lock()
            .expect("identity ledger poisoned")
            .insert(identity.to_string())
    }

    /// Number of identities consumed so far this run.
    pub fn len(&self) -> usize {
        self.seen.lock().expect("identity ledger poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An always-succeeding local provider for rehearsal runs and tests.
///
/// Issues sessions immediately with sequential identities derived from the
/// hint (or `"local"`), claiming each through an [`IdentityLedger`] so
/// rehearsals exercise the same dedup path real providers use.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    ledger: IdentityLedger,
    issued: AtomicU64,
}

impl StaticSessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total sessions issued so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn acquire(&self, identity_hint: Option<&str>) -> Result<Session, AcquisitionError> {
        let n = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        let identity = format!("{}+{}", identity_hint.unwrap_or("local"), n);
        let fresh = self.ledger.claim(&identity);
        debug_assert!(fresh, "sequential identities cannot repeat");
        Ok(Session::new(identity))
    }

    async fn teardown(&self, _session: Session) {}
}
