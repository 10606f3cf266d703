//! Handoff between the multipart parser and whoever consumes the uploaded
//! files.
//!
//! [`Slot`] carries at most one value. [`AsyncQueue`] carries an ordered
//! sequence that ends with either a clean termination or an error. In both,
//! whichever side arrives first decides whether the other waits, and a
//! terminal state never changes once reached.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::Notify;

use crate::error::UploadError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum SlotState<T> {
    Pending,
    Resolved(T),
    Rejected(UploadError),
}

#[derive(Debug)]
struct SlotInner<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

/// A single value handed from one producer to its consumers.
#[derive(Debug)]
pub struct Slot<T> {
    inner: Arc<SlotInner<T>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                state: Mutex::new(SlotState::Pending),
                notify: Notify::new(),
            }),
        }
    }

    /// Settle with a value. Returns `false` if the slot was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(SlotState::Resolved(value))
    }

    /// Settle with an error. Returns `false` if the slot was already settled.
    pub fn reject(&self, error: UploadError) -> bool {
        self.settle(SlotState::Rejected(error))
    }

    fn settle(&self, next: SlotState<T>) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if !matches!(*state, SlotState::Pending) {
                return false;
            }
            *state = next;
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_settled(&self) -> bool {
        !matches!(*lock(&self.inner.state), SlotState::Pending)
    }
}

impl<T: Clone> Slot<T> {
    /// The settled outcome, or `None` while pending.
    pub fn peek(&self) -> Option<Result<T, UploadError>> {
        match &*lock(&self.inner.state) {
            SlotState::Pending => None,
            SlotState::Resolved(value) => Some(Ok(value.clone())),
            SlotState::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// Wait until the slot is settled.
    pub async fn wait(&self) -> Result<T, UploadError> {
        loop {
            // Registered before the check so a settle in between is not missed.
            let notified = self.inner.notify.notified();
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    done: Option<Result<(), UploadError>>,
    finished: bool,
}

#[derive(Debug)]
struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

/// An unbounded ordered sequence with a single sequential consumer.
///
/// Items buffered before [`AsyncQueue::terminate`] or [`AsyncQueue::reject`]
/// are still delivered; a rejection is reported once, after them.
#[derive(Debug)]
pub struct AsyncQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for AsyncQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    done: None,
                    finished: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Append an item. Returns `false` once the queue is done.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if state.done.is_some() {
                return false;
            }
            state.items.push_back(item);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// End the sequence cleanly.
    pub fn terminate(&self) -> bool {
        self.finish(Ok(()))
    }

    /// End the sequence with an error.
    pub fn reject(&self, error: UploadError) -> bool {
        self.finish(Err(error))
    }

    fn finish(&self, outcome: Result<(), UploadError>) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if state.done.is_some() {
                return false;
            }
            state.done = Some(outcome);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_done(&self) -> bool {
        lock(&self.inner.state).done.is_some()
    }

    /// Items pushed but not consumed yet.
    pub fn buffered(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    fn poll_state(&self) -> Option<Option<Result<T, UploadError>>> {
        let mut state = lock(&self.inner.state);
        if let Some(item) = state.items.pop_front() {
            return Some(Some(Ok(item)));
        }
        if state.finished {
            return Some(None);
        }
        match &state.done {
            None => None,
            Some(Ok(())) => {
                state.finished = true;
                Some(None)
            }
            Some(Err(error)) => {
                let error = error.clone();
                state.finished = true;
                Some(Some(Err(error)))
            }
        }
    }

    /// Next item, the terminal error, or `None` once the sequence has ended.
    pub async fn next(&self) -> Option<Result<T, UploadError>> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(next) = self.poll_state() {
                return next;
            }
            notified.await;
        }
    }

    /// Consume the queue as a stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, UploadError>> {
        futures::stream::unfold(self, |queue| async move {
            let item = queue.next().await?;
            Some((item, queue))
        })
    }
}
