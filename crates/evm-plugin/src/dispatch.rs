//! Handler invocation behind an isolation boundary.
//!
//! Extensions are untrusted code running in the host process. A handler that panics is caught
//! and reported as a failed dispatch. With a timeout configured, the handler runs on a worker
//! thread and the dispatcher stops waiting once the budget is spent. The worker is left to
//! finish on its own and the extension is marked stalled until it does.

use std::{
    any::Any,
    collections::BTreeMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam_channel::RecvTimeoutError;

use crate::{EventRecord, ExtensionError, ExtensionHandle, HandlerReply, HandlerStatus};

/// Failures of a single dispatch. None of them aborts the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The extension reported an error.
    #[error("extension {owner} failed: {source}")]
    Extension {
        /// Extension name.
        owner: String,
        /// Reported error.
        #[source]
        source: ExtensionError,
    },
    /// The handler panicked.
    #[error("extension {owner} panicked: {message}")]
    Panicked {
        /// Extension name.
        owner: String,
        /// Panic payload, when it is a string.
        message: String,
    },
    /// The handler did not return within the configured budget.
    #[error("extension {owner} did not handle {event} within {timeout:?}")]
    Timeout {
        /// Extension name.
        owner: String,
        /// Event being handled.
        event: String,
        /// The budget.
        timeout: Duration,
    },
    /// An earlier invocation of the extension is still running.
    #[error("extension {owner} is still running an earlier handler")]
    Stalled {
        /// Extension name.
        owner: String,
    },
    /// The worker thread could not be spawned.
    #[error("failed to spawn worker for extension {owner}: {source}")]
    Spawn {
        /// Extension name.
        owner: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },
    /// The worker thread went away without reporting.
    #[error("worker for extension {owner} exited without a reply")]
    Disconnected {
        /// Extension name.
        owner: String,
    },
}

/// Result of [`PluginController::dispatch`](crate::PluginController::dispatch).
#[derive(Debug)]
pub enum DispatchOutcome {
    /// No handler is bound to the event. The payload was never built.
    Unbound,
    /// A handler is bound but the event is transaction scoped and the controller is stopped.
    Inactive,
    /// The handler ran and replied.
    Delivered(HandlerReply),
    /// The handler ran and failed.
    Failed(DispatchError),
}

impl DispatchOutcome {
    /// The handler's reply, if it ran successfully.
    pub const fn reply(&self) -> Option<&HandlerReply> {
        match self {
            Self::Delivered(reply) => Some(reply),
            _ => None,
        }
    }

    /// Whether a handler was invoked, successfully or not.
    pub const fn was_invoked(&self) -> bool {
        matches!(self, Self::Delivered(_) | Self::Failed(_))
    }
}

/// Counters for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    /// Handler replied.
    pub delivered: u64,
    /// Handler failed, panicked, timed out or was stalled.
    pub failed: u64,
    /// Handler bound but the controller was stopped.
    pub skipped: u64,
}

/// Dispatch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Dispatches of events nobody is bound to.
    pub unbound: u64,
    /// Counters of bound events.
    pub events: BTreeMap<String, EventStats>,
}

impl DispatchStats {
    /// Counters of `event`.
    pub fn event(&self, event: &str) -> EventStats {
        self.events.get(event).copied().unwrap_or_default()
    }

    /// Total number of handler invocations.
    pub fn invocations(&self) -> u64 {
        self.events.values().map(|stats| stats.delivered + stats.failed).sum()
    }

    pub(crate) fn record(&mut self, event: &str, outcome: &DispatchOutcome) {
        if matches!(outcome, DispatchOutcome::Unbound) {
            self.unbound += 1;
            return;
        }
        let stats = self.events.entry(event.to_string()).or_default();
        match outcome {
            DispatchOutcome::Delivered(_) => stats.delivered += 1,
            DispatchOutcome::Failed(_) => stats.failed += 1,
            DispatchOutcome::Inactive | DispatchOutcome::Unbound => stats.skipped += 1,
        }
    }
}

/// Invokes handlers and records their messages.
#[derive(Debug, Default)]
pub struct Dispatcher {
    timeout: Option<Duration>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Creates a dispatcher. With `timeout` set, every handler runs on a worker thread and is
    /// abandoned once the budget is spent.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout, stats: DispatchStats::default() }
    }

    /// The per-invocation budget.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Dispatch counters.
    pub const fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Counts a dispatch that never reached a handler.
    pub(crate) fn skip(&mut self, event: &str, outcome: DispatchOutcome) -> DispatchOutcome {
        self.stats.record(event, &outcome);
        outcome
    }

    /// Runs the handler `handle` binds to `record.event` and appends its message to the
    /// extension's data log.
    pub fn deliver(&mut self, handle: &Arc<ExtensionHandle>, record: EventRecord) -> DispatchOutcome {
        let event = record.event.clone();
        let (tx_hash, call_layer) = (record.tx_hash, record.call_layer);

        let outcome = match self.invoke(handle, record) {
            Ok(reply) => {
                if reply.status == HandlerStatus::Error {
                    tracing::warn!(target: "evm_plugin::dispatch", owner = %handle.name(), %event, "handler reported an error");
                }
                if let Err(err) = handle.log().lock().append(&event, tx_hash, call_layer, &reply.message) {
                    tracing::warn!(target: "evm_plugin::dispatch", owner = %handle.name(), %event, %err, "failed to write data log");
                }
                tracing::trace!(target: "evm_plugin::dispatch", owner = %handle.name(), %event, status = ?reply.status, "event delivered");
                DispatchOutcome::Delivered(reply)
            }
            Err(err) => {
                tracing::warn!(target: "evm_plugin::dispatch", owner = %handle.name(), %event, %err, "dispatch failed");
                DispatchOutcome::Failed(err)
            }
        };
        self.stats.record(&event, &outcome);
        outcome
    }

    fn invoke(
        &self,
        handle: &Arc<ExtensionHandle>,
        record: EventRecord,
    ) -> Result<HandlerReply, DispatchError> {
        let owner = handle.name().to_string();
        if !handle.try_begin() {
            return Err(DispatchError::Stalled { owner });
        }

        let Some(timeout) = self.timeout else {
            let result = run_guarded(handle, &record);
            handle.finish();
            return result.map_err(|err| err.into_dispatch_error(owner));
        };

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let worker = handle.clone();
        let event = record.event.clone();
        let spawned = thread::Builder::new().name(format!("ext-{owner}")).spawn(move || {
            let result = run_guarded(&worker, &record);
            worker.finish();
            let _ = sender.send(result);
        });
        if let Err(source) = spawned {
            handle.finish();
            return Err(DispatchError::Spawn { owner, source });
        }

        match receiver.recv_timeout(timeout) {
            Ok(result) => result.map_err(|err| err.into_dispatch_error(owner)),
            Err(RecvTimeoutError::Timeout) => Err(DispatchError::Timeout { owner, event, timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::Disconnected { owner }),
        }
    }
}

/// Failure inside the guarded call, before the owner is attached.
enum GuardedError {
    Extension(ExtensionError),
    Panicked(String),
}

impl GuardedError {
    fn into_dispatch_error(self, owner: String) -> DispatchError {
        match self {
            Self::Extension(source) => DispatchError::Extension { owner, source },
            Self::Panicked(message) => DispatchError::Panicked { owner, message },
        }
    }
}

fn run_guarded(handle: &ExtensionHandle, record: &EventRecord) -> Result<HandlerReply, GuardedError> {
    match catch_unwind(AssertUnwindSafe(|| handle.extension().invoke(&record.event, record))) {
        Ok(result) => result.map_err(GuardedError::Extension),
        Err(payload) => Err(GuardedError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{flag_record, RecordingExtension};

    fn handle(ext: RecordingExtension) -> Arc<ExtensionHandle> {
        Arc::new(ExtensionHandle::without_log(Arc::new(ext)))
    }

    #[test]
    fn test_inline_panic_is_contained() {
        let ext = RecordingExtension::new("boom", &["TXSTART"]).panicking();
        let handle = handle(ext);
        let mut dispatcher = Dispatcher::new(None);
        let outcome = dispatcher.deliver(&handle, flag_record("TXSTART"));
        match outcome {
            DispatchOutcome::Failed(DispatchError::Panicked { owner, .. }) => assert_eq!(owner, "boom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!handle.is_in_flight());
        assert_eq!(dispatcher.stats().event("TXSTART").failed, 1);
    }

    #[test]
    fn test_extension_error_is_reported() {
        let ext = RecordingExtension::new("bad", &["TXSTART"]).failing("nope");
        let mut dispatcher = Dispatcher::new(Some(Duration::from_secs(5)));
        let outcome = dispatcher.deliver(&handle(ext), flag_record("TXSTART"));
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(DispatchError::Extension { source: ExtensionError::Handler(_), .. })
        ));
    }

    #[test]
    fn test_worker_reply_within_budget() {
        let ext = RecordingExtension::new("quick", &["TXSTART"])
            .replying("TXSTART", HandlerReply::rollback())
            .delayed(Duration::from_millis(5));
        let handle = handle(ext);
        let mut dispatcher = Dispatcher::new(Some(Duration::from_secs(5)));
        let outcome = dispatcher.deliver(&handle, flag_record("TXSTART"));
        assert_eq!(outcome.reply().map(|reply| reply.status), Some(HandlerStatus::Rollback));
        assert!(!handle.is_in_flight());
    }

    #[test]
    fn test_timed_out_extension_recovers_once_worker_returns() {
        let ext = RecordingExtension::new("slow", &["TXSTART"]).delayed(Duration::from_millis(200));
        let handle = handle(ext);
        let mut dispatcher = Dispatcher::new(Some(Duration::from_millis(10)));

        let outcome = dispatcher.deliver(&handle, flag_record("TXSTART"));
        assert!(matches!(outcome, DispatchOutcome::Failed(DispatchError::Timeout { .. })));
        let outcome = dispatcher.deliver(&handle, flag_record("TXSTART"));
        assert!(matches!(outcome, DispatchOutcome::Failed(DispatchError::Stalled { .. })));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.is_in_flight() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!handle.is_in_flight(), "the abandoned worker clears the flag when it returns");
        assert!(dispatcher.deliver(&handle, flag_record("TXSTART")).reply().is_some());
        assert_eq!(dispatcher.stats().event("TXSTART").failed, 2);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}
