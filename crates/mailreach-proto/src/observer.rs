//! Observers notified of server data and lifecycle changes.
//!
//! Servers push data the caller did not ask for: alerts, new message counts,
//! flag changes made by other clients, expunges. Each handle carries a list
//! of [`HandleObserver`]s, supplied at construction, which receive these
//! events as they are parsed.

use std::fmt;
use std::sync::Arc;

use crate::state::ProtocolState;

/// Direction of bytes reported to [`HandleObserver::on_wire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Sent,
    /// Server to client.
    Received,
}

/// Receiver for events raised by a handle.
///
/// All methods default to doing nothing.
pub trait HandleObserver: Send + Sync {
    /// Informational status text from the server.
    fn on_info(&self, text: &str) {
        let _ = text;
    }

    /// `[ALERT]` text that must be shown to the user.
    fn on_alert(&self, text: &str) {
        let _ = text;
    }

    /// The selected mailbox now holds `count` messages.
    fn on_exists(&self, count: u32) {
        let _ = count;
    }

    /// Flags of message `seq` changed.
    fn on_flags_changed(&self, seq: u32, flags: &[String]) {
        let _ = (seq, flags);
    }

    /// Message `seq` was expunged.
    fn on_expunge(&self, seq: u32) {
        let _ = seq;
    }

    /// Raw protocol bytes.
    fn on_wire(&self, direction: Direction, data: &[u8]) {
        let _ = (direction, data);
    }

    /// The handle moved between states.
    fn on_state_change(&self, from: ProtocolState, to: ProtocolState) {
        let _ = (from, to);
    }
}

/// An ordered list of observers.
#[derive(Clone, Default)]
pub struct Observers {
    list: Vec<Arc<dyn HandleObserver>>,
}

impl Observers {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observer.
    pub fn push(&mut self, observer: Arc<dyn HandleObserver>) {
        self.list.push(observer);
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn HandleObserver>) -> Self {
        self.push(observer);
        self
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns true if no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn info(&self, text: &str) {
        self.list.iter().for_each(|o| o.on_info(text));
    }

    pub(crate) fn alert(&self, text: &str) {
        self.list.iter().for_each(|o| o.on_alert(text));
    }

    pub(crate) fn exists(&self, count: u32) {
        self.list.iter().for_each(|o| o.on_exists(count));
    }

    pub(crate) fn flags_changed(&self, seq: u32, flags: &[String]) {
        self.list.iter().for_each(|o| o.on_flags_changed(seq, flags));
    }

    pub(crate) fn expunge(&self, seq: u32) {
        self.list.iter().for_each(|o| o.on_expunge(seq));
    }

    pub(crate) fn wire(&self, direction: Direction, data: &[u8]) {
        self.list.iter().for_each(|o| o.on_wire(direction, data));
    }

    pub(crate) fn state_change(&self, from: ProtocolState, to: ProtocolState) {
        self.list.iter().for_each(|o| o.on_state_change(from, to));
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.list.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl HandleObserver for Recorder {
        fn on_alert(&self, text: &str) {
            self.0.lock().unwrap().push(format!("alert:{text}"));
        }

        fn on_expunge(&self, seq: u32) {
            self.0.lock().unwrap().push(format!("expunge:{seq}"));
        }
    }

    #[test]
    fn test_every_observer_is_notified() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let observers = Observers::new()
            .with(first.clone())
            .with(second.clone());

        observers.alert("quota");
        observers.expunge(4);
        observers.info("ignored by default");

        assert_eq!(observers.len(), 2);
        for rec in [first, second] {
            assert_eq!(*rec.0.lock().unwrap(), vec!["alert:quota", "expunge:4"]);
        }
    }
}
