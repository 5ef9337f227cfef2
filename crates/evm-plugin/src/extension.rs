//! The interface between the dispatcher and an extension, however it was loaded.

use core::fmt;

use auto_impl::auto_impl;

use crate::{constants::status, EventRecord, ExtensionDescriptor};

/// What a handler asks of the host after processing an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HandlerStatus {
    /// Nothing to report.
    #[default]
    Continue,
    /// Roll back the state changes of the innermost active call when it ends.
    Rollback,
    /// The handler failed. Logged, otherwise ignored.
    Error,
    /// A status byte with no assigned meaning.
    Other(u8),
}

impl From<u8> for HandlerStatus {
    fn from(byte: u8) -> Self {
        match byte {
            status::CONTINUE => Self::Continue,
            status::ROLLBACK => Self::Rollback,
            status::ERROR => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl From<HandlerStatus> for u8 {
    fn from(status: HandlerStatus) -> Self {
        match status {
            HandlerStatus::Continue => status::CONTINUE,
            HandlerStatus::Rollback => status::ROLLBACK,
            HandlerStatus::Error => status::ERROR,
            HandlerStatus::Other(other) => other,
        }
    }
}

/// The reply of one handler invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerReply {
    /// Status byte.
    pub status: HandlerStatus,
    /// Free-form message appended to the extension's data log when non-empty.
    pub message: Vec<u8>,
}

impl HandlerReply {
    /// An empty [`HandlerStatus::Continue`] reply.
    pub fn proceed() -> Self {
        Self::default()
    }

    /// An empty [`HandlerStatus::Rollback`] reply.
    pub fn rollback() -> Self {
        Self { status: HandlerStatus::Rollback, message: Vec::new() }
    }

    /// Attaches a message to the reply.
    pub fn with_message(mut self, message: impl Into<Vec<u8>>) -> Self {
        self.message = message.into();
        self
    }

    /// Whether the reply asks for a rollback.
    pub fn requests_rollback(&self) -> bool {
        self.status == HandlerStatus::Rollback
    }
}

/// Errors raised while invoking an extension.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// The event record could not be encoded for the extension.
    #[error("failed to encode event payload: {0}")]
    Payload(#[from] serde_json::Error),
    /// The extension has no handler for the event.
    #[error("no handler bound to event {0}")]
    UnknownEvent(String),
    /// The handler reported a failure.
    #[error("handler failed: {0}")]
    Handler(String),
}

/// A loaded extension.
///
/// Implementations must be [`Send`] and [`Sync`]: the dispatcher may run a handler on a worker
/// thread to bound its running time.
#[auto_impl(&, Box, Arc)]
pub trait Extension: fmt::Debug + Send + Sync {
    /// The contract the extension declared when it was loaded.
    fn descriptor(&self) -> &ExtensionDescriptor;

    /// Runs the handler bound to `event`.
    fn invoke(&self, event: &str, record: &EventRecord) -> Result<HandlerReply, ExtensionError>;

    /// Unique name of the extension.
    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

/// An in-process extension backed by a closure.
pub struct FnExtension<F> {
    descriptor: ExtensionDescriptor,
    handler: F,
}

impl<F> FnExtension<F>
where
    F: Fn(&str, &EventRecord) -> Result<HandlerReply, ExtensionError> + Send + Sync,
{
    /// Creates an extension answering every declared event with `handler`.
    pub const fn new(descriptor: ExtensionDescriptor, handler: F) -> Self {
        Self { descriptor, handler }
    }
}

impl<F> fmt::Debug for FnExtension<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExtension").field("descriptor", &self.descriptor).finish_non_exhaustive()
    }
}

impl<F> Extension for FnExtension<F>
where
    F: Fn(&str, &EventRecord) -> Result<HandlerReply, ExtensionError> + Send + Sync,
{
    fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    fn invoke(&self, event: &str, record: &EventRecord) -> Result<HandlerReply, ExtensionError> {
        if self.descriptor.handler_symbol(event).is_none() {
            return Err(ExtensionError::UnknownEvent(event.to_string()));
        }
        (self.handler)(event, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_byte_mapping() {
        assert_eq!(HandlerStatus::from(0), HandlerStatus::Continue);
        assert_eq!(HandlerStatus::from(1), HandlerStatus::Rollback);
        assert_eq!(HandlerStatus::from(0xff), HandlerStatus::Error);
        assert_eq!(HandlerStatus::from(7), HandlerStatus::Other(7));
        assert_eq!(u8::from(HandlerStatus::Other(7)), 7);
        assert_eq!(u8::from(HandlerStatus::Rollback), 1);
    }

    #[test]
    fn test_fn_extension_rejects_undeclared_events() {
        let ext = FnExtension::new(ExtensionDescriptor::new("fn", [("TXEND", "OnEnd")]), |_, _| {
            Ok(HandlerReply::proceed().with_message("seen"))
        });
        let record = crate::test_utils::flag_record("TXSTART");
        assert!(matches!(ext.invoke("TXSTART", &record), Err(ExtensionError::UnknownEvent(_))));
        assert_eq!(ext.invoke("TXEND", &record).unwrap().message, b"seen");
        assert_eq!(ext.name(), "fn");
    }
}
