//! Bounded FIFO channel shared by every component of the toolkit.
//!
//! A thin layer over [`tokio::sync::mpsc`] that adds an explicit, idempotent
//! `close` on the sending side and lets several consumers share one queue.
//! Values already buffered when the channel closes are still delivered; a
//! receiver only sees `None` once the channel is both closed and drained.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const OPEN: u8 = 0;
const CLOSED: u8 = 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,

    #[error("Channel is full")]
    Full,
}

/// Returned by [`Sender::send`] when the channel is closed. Hands the value back.
#[derive(Error)]
#[error("Sending on a closed channel")]
pub struct SendError<T>(pub T);

/// Returned by [`Sender::try_send`]. Hands the value back.
#[derive(Error)]
pub enum TrySendError<T> {
    #[error("Channel is full")]
    Full(T),

    #[error("Channel is closed")]
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> From<SendError<T>> for ChannelError {
    fn from(_: SendError<T>) -> Self {
        ChannelError::Closed
    }
}

impl<T> From<TrySendError<T>> for ChannelError {
    fn from(error: TrySendError<T>) -> Self {
        match error {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::Closed,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("Channel is empty")]
    Empty,

    #[error("Channel is closed and drained")]
    Closed,
}

struct SenderShared<T> {
    status: AtomicU8,
    inner: Mutex<Option<mpsc::Sender<T>>>,
    // Wakes sends still waiting for room when the channel closes.
    closed: CancellationToken,
}

/// Producing half of a bounded channel. Clones share the same close state.
pub struct Sender<T> {
    shared: Arc<SenderShared<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Sender<T> {
    fn current(&self) -> Option<mpsc::Sender<T>> {
        if self.shared.status.load(Ordering::Acquire) == CLOSED {
            return None;
        }
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits for buffer space, then enqueues `value`. Fails once the channel is
    /// closed, including while already waiting for space.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        let Some(sender) = self.current() else {
            return Err(SendError(value));
        };
        let permit = tokio::select! {
            permit = sender.reserve() => permit,
            _ = self.shared.closed.cancelled() => return Err(SendError(value)),
        };
        match permit {
            Ok(permit) => {
                permit.send(value);
                Ok(())
            }
            Err(_) => Err(SendError(value)),
        }
    }

    /// Enqueues `value` without waiting.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let Some(sender) = self.current() else {
            return Err(TrySendError::Closed(value));
        };
        sender.try_send(value).map_err(|error| match error {
            mpsc::error::TrySendError::Full(value) => TrySendError::Full(value),
            mpsc::error::TrySendError::Closed(value) => TrySendError::Closed(value),
        })
    }

    /// Closes the channel for every sender handle. Returns `true` only for the
    /// call that performed the `Open -> Closed` transition.
    pub fn close(&self) -> bool {
        if self
            .shared
            .status
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared.closed.cancel();
        true
    }

    /// True once closed from either side.
    pub fn is_closed(&self) -> bool {
        match self.current() {
            Some(sender) => sender.is_closed(),
            None => true,
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Consuming half of a bounded channel.
///
/// Clones share one queue: every value is delivered to exactly one of them.
pub struct Receiver<T> {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Receiver<T> {
    /// Waits for the next value. `None` means closed and drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }

    /// Takes the next value if one is ready. Reports `Empty` while another
    /// consumer is mid-receive.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let Ok(mut receiver) = self.inner.try_lock() else {
            return Err(TryRecvError::Empty);
        };
        receiver.try_recv().map_err(|error| match error {
            mpsc::error::TryRecvError::Empty => TryRecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => TryRecvError::Closed,
        })
    }

    /// Drains the channel until it closes.
    pub async fn collect(self) -> Vec<T> {
        let mut values = Vec::new();
        while let Some(value) = self.recv().await {
            values.push(value);
        }
        values
    }

    /// Adapts this receiver into a [`futures::Stream`].
    pub fn into_stream(self) -> impl futures::Stream<Item = T> + Send
    where
        T: Send,
    {
        futures::stream::unfold(self, |receiver| async move {
            receiver.recv().await.map(|value| (value, receiver))
        })
    }

    /// Pops the head of the queue without waiting; used to make room for a newer value.
    pub(crate) fn evict_oldest(&self) -> Option<T> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }

    /// True when this handle is the last one left, i.e. every consumer went away.
    pub(crate) fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Refuses further sends while keeping buffered values receivable.
    pub(crate) async fn close(&self) {
        self.inner.lock().await.close();
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Receiver")
    }
}

/// Creates a bounded channel. A capacity of zero is raised to one.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let sender = Sender {
        shared: Arc::new(SenderShared {
            status: AtomicU8::new(OPEN),
            inner: Mutex::new(Some(sender)),
            closed: CancellationToken::new(),
        }),
    };
    let receiver = Receiver {
        inner: Arc::new(tokio::sync::Mutex::new(receiver)),
    };
    (sender, receiver)
}
