//! Deferred POP3 requests.
//!
//! RETR and DELE requests are written as soon as they are queued; their
//! responses are read back later, in submission order, when the queue
//! reaches its batch size or is flushed. Each request carries a callback
//! that receives the outcome as a series of [`PopEvent`]s. Dropping the
//! callback is the request's end of life, whether or not it ever ran.

use std::collections::VecDeque;
use std::fmt;

use crate::{Error, Result};

/// Most requests that may be outstanding at once.
pub const QUEUE_CAPACITY: usize = 123;

/// Batch size used when the server advertises PIPELINING.
pub const PIPELINED_BATCH: usize = QUEUE_CAPACITY / 2;

/// Kind of deferred request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Retrieve a message.
    Retr,
    /// Mark a message deleted.
    Dele,
}

impl RequestKind {
    /// Command verb on the wire.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Retr => "RETR",
            Self::Dele => "DELE",
        }
    }
}

/// Progress of one deferred request.
///
/// Every request first gets a `Status`. A successful RETR follows it with
/// zero or more `Data` chunks and a final `Done`. A `Status(Err(_))` after
/// data means the transfer broke off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopEvent<'a> {
    /// `+OK` or the `-ERR` text.
    Status(std::result::Result<(), &'a str>),
    /// One dot-unstuffed line of the message.
    Data(&'a [u8]),
    /// End of the message body.
    Done,
}

/// Completion callback of a deferred request.
pub type PopCallback = Box<dyn FnMut(PopEvent<'_>, &mut FollowUps) + Send>;

pub(crate) struct PendingRequest {
    pub kind: RequestKind,
    pub msgno: u32,
    pub callback: PopCallback,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("kind", &self.kind)
            .field("msgno", &self.msgno)
            .finish_non_exhaustive()
    }
}

/// Requests filed from inside a completion callback.
///
/// They are written once the callback returns and answered after the
/// current round of responses.
#[derive(Debug)]
pub struct FollowUps {
    filed: Vec<PendingRequest>,
    room: usize,
}

impl FollowUps {
    /// Creates an empty set that accepts at most `room` requests.
    #[must_use]
    pub const fn new(room: usize) -> Self {
        Self {
            filed: Vec::new(),
            room,
        }
    }

    /// Files a follow-up request.
    ///
    /// # Errors
    ///
    /// [`Error::QueueFull`] when the queue has no room left; the callback
    /// is dropped.
    pub fn queue<F>(&mut self, kind: RequestKind, msgno: u32, callback: F) -> Result<()>
    where
        F: FnMut(PopEvent<'_>, &mut Self) + Send + 'static,
    {
        if self.filed.len() >= self.room {
            return Err(Error::QueueFull);
        }
        self.filed.push(PendingRequest {
            kind,
            msgno,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Number of requests filed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filed.len()
    }

    /// Returns true if nothing was filed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filed.is_empty()
    }

    pub(crate) fn into_requests(self) -> Vec<PendingRequest> {
        self.filed
    }
}

/// Bounded FIFO of requests whose responses are still unread.
#[derive(Debug)]
pub(crate) struct RequestQueue {
    entries: VecDeque<PendingRequest>,
    batch: usize,
    draining: bool,
}

impl RequestQueue {
    pub fn new(batch: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(QUEUE_CAPACITY),
            batch: batch.clamp(1, QUEUE_CAPACITY),
            draining: false,
        }
    }

    pub fn set_batch(&mut self, batch: usize) {
        self.batch = batch.clamp(1, QUEUE_CAPACITY);
    }

    pub const fn batch(&self) -> usize {
        self.batch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= QUEUE_CAPACITY
    }

    pub fn room(&self) -> usize {
        QUEUE_CAPACITY.saturating_sub(self.entries.len())
    }

    /// Returns true once a full batch is waiting.
    pub fn batch_ready(&self) -> bool {
        self.entries.len() >= self.batch
    }

    pub fn push(&mut self, request: PendingRequest) -> Result<()> {
        if self.is_full() {
            return Err(Error::QueueFull);
        }
        self.entries.push_back(request);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<PendingRequest> {
        self.entries.pop_front()
    }

    /// Drops every pending request without running its callback.
    pub fn discard(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Marks the start of a drain. Returns false if a previous drain never
    /// finished.
    pub fn begin_drain(&mut self) -> bool {
        !std::mem::replace(&mut self.draining, true)
    }

    pub fn end_drain(&mut self) {
        self.draining = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn request(msgno: u32) -> PendingRequest {
        PendingRequest {
            kind: RequestKind::Dele,
            msgno,
            callback: Box::new(|_, _| {}),
        }
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut queue = RequestQueue::new(PIPELINED_BATCH);
        for n in 0..QUEUE_CAPACITY {
            queue.push(request(u32::try_from(n).unwrap())).unwrap();
        }
        assert!(queue.is_full());
        assert_eq!(queue.room(), 0);
        assert!(matches!(queue.push(request(999)), Err(Error::QueueFull)));
    }

    #[test]
    fn test_batch_is_clamped() {
        let mut queue = RequestQueue::new(0);
        assert_eq!(queue.batch(), 1);
        queue.set_batch(10_000);
        assert_eq!(queue.batch(), QUEUE_CAPACITY);
        assert_eq!(PIPELINED_BATCH, 61);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = RequestQueue::new(2);
        queue.push(request(1)).unwrap();
        assert!(!queue.batch_ready());
        queue.push(request(2)).unwrap();
        assert!(queue.batch_ready());
        assert_eq!(queue.pop().unwrap().msgno, 1);
        assert_eq!(queue.pop().unwrap().msgno, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_discard_drops_callbacks_unrun() {
        struct Notify(Arc<AtomicUsize>);
        impl Drop for Notify {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));
        let mut queue = RequestQueue::new(5);
        for msgno in 1..=3 {
            let notify = Notify(dropped.clone());
            let ran = ran.clone();
            queue
                .push(PendingRequest {
                    kind: RequestKind::Retr,
                    msgno,
                    callback: Box::new(move |_, _| {
                        let _keep = &notify;
                        ran.fetch_add(1, Ordering::SeqCst);
                    }),
                })
                .unwrap();
        }
        assert_eq!(queue.discard(), 3);
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_interrupted_drain_is_detected() {
        let mut queue = RequestQueue::new(1);
        assert!(queue.begin_drain());
        assert!(!queue.begin_drain());
        queue.end_drain();
        assert!(queue.begin_drain());
    }

    #[test]
    fn test_follow_ups_respect_room() {
        let mut follow = FollowUps::new(1);
        follow.queue(RequestKind::Dele, 4, |_, _| {}).unwrap();
        assert!(matches!(
            follow.queue(RequestKind::Dele, 5, |_, _| {}),
            Err(Error::QueueFull)
        ));
        let filed = follow.into_requests();
        assert_eq!(filed.len(), 1);
        assert_eq!(filed[0].msgno, 4);
    }
}
