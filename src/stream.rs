//! Streaming run API: emit records as they are persisted.
//!
//! ## Why stream?
//!
//! Long documents on a rationed channel take minutes to hours. A stream-based
//! API lets callers display partial results immediately or forward records to
//! their own storage without implementing a [`crate::sink::PersistenceSink`].
//!
//! Unlike the eager [`crate::driver::run_pipeline`] which returns only after
//! the queue drains, [`run_stream`] spawns the driver and yields a
//! [`RunEvent`] per state change. The core is strictly sequential, so events
//! always arrive in ordinal order - there is no out-of-order completion to
//! sort.

use crate::chunk::Unit;
use crate::config::RunConfig;
use crate::driver::{run_pipeline, RunReport};
use crate::error::{ProcessFailure, SinkError};
use crate::process::UnitProcessor;
use crate::progress::RunProgress;
use crate::session::SessionProvider;
use crate::sink::{PersistenceSink, ResultRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::warn;

/// One observable state change of a streaming run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// The driver accepted the queue and is about to process it.
    Started { pending_units: usize },
    /// A unit's transformed text was durably delivered.
    UnitCompleted { record: ResultRecord },
    /// A submission failed; the unit will be retried on a fresh session.
    UnitRetry {
        ordinal: usize,
        attempt: u32,
        failure: ProcessFailure,
    },
    /// The run reached a terminal state.
    Completed { report: RunReport },
    /// The run died on a fatal error.
    Failed { error: String },
}

/// A boxed stream of run events.
pub type RunStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

/// Sink that forwards each record into the event channel.
///
/// Delivery into the unbounded channel is the durability point for a
/// streaming run: once the caller holds the record, persisting it is the
/// caller's business.
struct ChannelSink {
    tx: mpsc::UnboundedSender<RunEvent>,
}

#[async_trait]
impl PersistenceSink for ChannelSink {
    async fn append(&mut self, record: &ResultRecord) -> Result<(), SinkError> {
        if self.tx
            .send(RunEvent::UnitCompleted {
                record: record.clone(),
            })
            .is_err()
        {
            // Receiver dropped: the caller walked away mid-run.
            warn!("Run stream receiver dropped; record {} discarded", record.ordinal);
        }
        Ok(())
    }
}

/// Progress hooks that forward start/retry events into the channel.
struct ChannelProgress {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl RunProgress for ChannelProgress {
    fn on_run_start(&self, pending_units: usize) {
        let _ = self.tx.send(RunEvent::Started { pending_units });
    }

    fn on_unit_retry(&self, ordinal: usize, attempt: u32, failure: &ProcessFailure) {
        let _ = self.tx.send(RunEvent::UnitRetry {
            ordinal,
            attempt,
            failure: failure.clone(),
        });
    }
}

/// Drive `units` in a spawned task, yielding a [`RunEvent`] per state change.
///
/// The final event is always `Completed` (with the [`RunReport`]) or
/// `Failed`; the stream ends after it. Dropping the stream does not cancel
/// the run - use the config's cancel token for that.
pub fn run_stream(
    units: Vec<Unit>,
    provider: Arc<dyn SessionProvider>,
    processor: Arc<dyn UnitProcessor>,
    config: &RunConfig,
) -> RunStream {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut config = config.clone();
    config.progress_callback = Some(Arc::new(ChannelProgress { tx: tx.clone() }));

    tokio::spawn(async move {
        let mut sink = ChannelSink { tx: tx.clone() };
        let terminal = match run_pipeline(units, provider, processor, &mut sink, &config).await {
            Ok(report) => RunEvent::Completed { report },
            Err(e) => RunEvent::Failed {
                error: e.to_string(),
            },
        };
        let _ = tx.send(terminal);
    });

    Box::pin(UnboundedReceiverStream::new(rx))
}
