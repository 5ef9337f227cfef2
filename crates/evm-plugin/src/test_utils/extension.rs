use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{EventRecord, Extension, ExtensionDescriptor, ExtensionError, HandlerReply};

/// An in-process extension that records every record it receives.
///
/// Handler symbols are named `On<event>`. Replies default to an empty
/// [`HandlerStatus::Continue`](crate::HandlerStatus::Continue) and can be scripted per event.
#[derive(Debug)]
pub struct RecordingExtension {
    descriptor: ExtensionDescriptor,
    records: Mutex<Vec<EventRecord>>,
    replies: Mutex<HashMap<String, HandlerReply>>,
    invocations: AtomicUsize,
    delay: Option<Duration>,
    panics: bool,
    failure: Option<String>,
}

impl RecordingExtension {
    /// Creates an extension named `name` bound to `events`.
    pub fn new(name: &str, events: &[&str]) -> Self {
        let descriptor =
            ExtensionDescriptor::new(name, events.iter().map(|event| (*event, format!("On{event}"))));
        Self {
            descriptor,
            records: Mutex::default(),
            replies: Mutex::default(),
            invocations: AtomicUsize::new(0),
            delay: None,
            panics: false,
            failure: None,
        }
    }

    /// Answers `event` with `reply`.
    pub fn replying(self, event: &str, reply: HandlerReply) -> Self {
        self.set_reply(event, reply);
        self
    }

    /// Answers `event` with `reply` from now on.
    pub fn set_reply(&self, event: &str, reply: HandlerReply) {
        self.replies.lock().insert(event.to_string(), reply);
    }

    /// Sleeps for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panics on every invocation.
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Fails every invocation with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Number of invocations, including failed ones.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Every record received, in order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Records received for `event`, in order.
    pub fn records_for(&self, event: &str) -> Vec<EventRecord> {
        self.records.lock().iter().filter(|record| record.event == event).cloned().collect()
    }

    /// Event names received, in order.
    pub fn events_seen(&self) -> Vec<String> {
        self.records.lock().iter().map(|record| record.event.clone()).collect()
    }
}

impl Extension for RecordingExtension {
    fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    fn invoke(&self, event: &str, record: &EventRecord) -> Result<HandlerReply, ExtensionError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.records.lock().push(record.clone());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.panics {
            panic!("{} panicked on {event}", self.descriptor.name);
        }
        if let Some(reason) = &self.failure {
            return Err(ExtensionError::Handler(reason.clone()));
        }
        Ok(self.replies.lock().get(event).cloned().unwrap_or_default())
    }
}
