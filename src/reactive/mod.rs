//! Multicast publish/subscribe bus.
//!
//! An [`Observable`] hands every subscriber its own bounded channel and copies
//! each emitted value into all of them. What happens when one subscriber falls
//! behind is decided by the configured [`OverflowStrategy`]; with the default
//! `DropNewest` a slow subscriber loses values but never slows the producer.
//!
//! Delivery works on a snapshot of the subscriber list, so a stalled
//! subscriber never keeps others from subscribing or the bus from closing.
//!
//! Subscribers leave only when the whole bus is closed, or when they drop
//! their receiver (pruned on a later emit). There is no explicit unsubscribe.

mod subject;

pub use subject::{Event, Subject};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::channel::{self, Receiver, Sender, TrySendError};
use crate::config::{OverflowStrategy, ToolkitConfig};

const OPEN: u8 = 0;
const CLOSED: u8 = 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservableError {
    #[error("Observable is closed")]
    Closed,
}

/// Identifies one subscription in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a single [`Observable::emit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Cumulative counters since the observable was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservableStats {
    pub emitted: u64,
    pub delivered: u64,
    pub dropped: u64,
}

impl fmt::Display for ObservableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} emitted, {} delivered, {} dropped",
            self.emitted, self.delivered, self.dropped
        )
    }
}

struct Subscriber<T> {
    id: SubscriptionId,
    sender: Sender<T>,
    // Only kept under `DropOldest`, to evict from the head of the queue.
    evictor: Option<Receiver<T>>,
}

impl<T> Subscriber<T> {
    fn is_gone(&self) -> bool {
        self.sender.is_closed() || self.evictor.as_ref().is_some_and(Receiver::is_abandoned)
    }
}

#[derive(Default)]
struct Counters {
    emitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

struct Inner<T> {
    status: AtomicU8,
    // Emits hold it shared, `close_with` exclusively. Taken before `subscribers`.
    gate: RwLock<()>,
    subscribers: RwLock<Vec<Arc<Subscriber<T>>>>,
    capacity: usize,
    strategy: OverflowStrategy,
    counters: Counters,
}

/// A clonable handle to a multicast bus.
pub struct Observable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new() -> Self {
        Self::with_config(&ToolkitConfig::default())
    }

    pub fn with_config(config: &ToolkitConfig) -> Self {
        Self::with_strategy(config.subscriber_capacity, config.overflow)
    }

    /// `capacity` is the buffer size handed to each new subscriber.
    pub fn with_strategy(capacity: usize, strategy: OverflowStrategy) -> Self {
        Observable {
            inner: Arc::new(Inner {
                status: AtomicU8::new(OPEN),
                gate: RwLock::new(()),
                subscribers: RwLock::new(Vec::new()),
                capacity: capacity.max(1),
                strategy,
                counters: Counters::default(),
            }),
        }
    }

    pub fn strategy(&self) -> OverflowStrategy {
        self.inner.strategy
    }

    pub fn is_closed(&self) -> bool {
        self.inner.status.load(Ordering::Acquire) == CLOSED
    }

    /// Registers a new subscriber and returns its receiving end.
    pub async fn subscribe(&self) -> Result<Receiver<T>, ObservableError> {
        let mut subscribers = self.inner.subscribers.write().await;
        if self.is_closed() {
            return Err(ObservableError::Closed);
        }

        let (sender, receiver) = channel::channel(self.inner.capacity);
        let id = SubscriptionId::new();
        let evictor =
            (self.inner.strategy == OverflowStrategy::DropOldest).then(|| receiver.clone());
        subscribers.push(Arc::new(Subscriber {
            id,
            sender,
            evictor,
        }));
        log::debug!(
            "Subscription {} registered ({} total)",
            id,
            subscribers.len()
        );
        Ok(receiver)
    }

    /// Copies `value` to every current subscriber.
    ///
    /// Under `BlockProducer` this waits for room in each subscriber's buffer;
    /// [`close`](Self::close) releases an emit stuck on a stalled subscriber.
    pub async fn emit(&self, value: T) -> Result<EmitReport, ObservableError> {
        if self.is_closed() {
            return Err(ObservableError::Closed);
        }

        let _gate = self.inner.gate.read().await;
        // `close_with` flips the status before it waits for the gate.
        if self.is_closed() {
            return Err(ObservableError::Closed);
        }

        let subscribers = self.snapshot().await;
        let (report, stale) = self.broadcast(&subscribers, value).await;
        if stale {
            self.prune().await;
        }
        self.record(&report);
        Ok(report)
    }

    /// Closes the bus after delivering `last` as its final value.
    ///
    /// Emits already in flight finish before `last` goes out, and every emit
    /// that starts afterwards fails with [`ObservableError::Closed`]. Under
    /// `BlockProducer` a stalled subscriber holds this up until
    /// [`close`](Self::close) is called.
    pub async fn close_with(&self, last: T) -> Result<EmitReport, ObservableError> {
        if self
            .inner
            .status
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ObservableError::Closed);
        }

        let report = {
            let _gate = self.inner.gate.write().await;
            let subscribers = self.snapshot().await;
            let (report, _) = self.broadcast(&subscribers, last).await;
            report
        };
        self.record(&report);

        let released = self.release().await;
        log::debug!(
            "Observable closed with a final value, released {} subscription(s)",
            released
        );
        Ok(report)
    }

    async fn snapshot(&self) -> Vec<Arc<Subscriber<T>>> {
        self.inner.subscribers.read().await.clone()
    }

    async fn broadcast(
        &self,
        subscribers: &[Arc<Subscriber<T>>],
        value: T,
    ) -> (EmitReport, bool) {
        let mut report = EmitReport::default();
        let mut stale = false;
        for subscriber in subscribers {
            if subscriber.is_gone() {
                stale = true;
                continue;
            }
            match self.deliver(subscriber, value.clone()).await {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Dropped => report.dropped += 1,
                Delivery::Replaced => {
                    report.delivered += 1;
                    report.dropped += 1;
                }
                Delivery::Gone => stale = true,
            }
        }
        (report, stale)
    }

    fn record(&self, report: &EmitReport) {
        let counters = &self.inner.counters;
        counters.emitted.fetch_add(1, Ordering::Relaxed);
        counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }

    async fn deliver(&self, subscriber: &Subscriber<T>, value: T) -> Delivery {
        match self.inner.strategy {
            OverflowStrategy::BlockProducer => match subscriber.sender.send(value).await {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Gone,
            },
            OverflowStrategy::DropNewest => match subscriber.sender.try_send(value) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(_)) => {
                    log::trace!("Subscription {} is full, dropping newest value", subscriber.id);
                    Delivery::Dropped
                }
                Err(TrySendError::Closed(_)) => Delivery::Gone,
            },
            OverflowStrategy::DropOldest => match subscriber.sender.try_send(value) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Closed(_)) => Delivery::Gone,
                Err(TrySendError::Full(value)) => {
                    let evicted = subscriber
                        .evictor
                        .as_ref()
                        .and_then(Receiver::evict_oldest)
                        .is_some();
                    match subscriber.sender.try_send(value) {
                        Ok(()) if evicted => {
                            log::trace!(
                                "Subscription {} is full, dropped oldest value",
                                subscriber.id
                            );
                            Delivery::Replaced
                        }
                        Ok(()) => Delivery::Delivered,
                        Err(TrySendError::Full(_)) => Delivery::Dropped,
                        Err(TrySendError::Closed(_)) => Delivery::Gone,
                    }
                }
            },
        }
    }

    async fn prune(&self) {
        let mut subscribers = self.inner.subscribers.write().await;
        subscribers.retain(|subscriber| {
            let gone = subscriber.is_gone();
            if gone {
                log::debug!("Subscription {} went away, removing it", subscriber.id);
            }
            !gone
        });
    }

    /// Closes the bus and every subscriber channel. Values already buffered are
    /// still delivered. Returns `true` only for the call that closed it.
    ///
    /// Every call releases the subscriber channels, which also wakes emits and a
    /// [`close_with`](Self::close_with) waiting on a full buffer.
    pub async fn close(&self) -> bool {
        let first = self
            .inner
            .status
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        let released = self.release().await;
        if first || released > 0 {
            log::debug!("Observable closed, released {} subscription(s)", released);
        }
        first
    }

    async fn release(&self) -> usize {
        let mut subscribers = self.inner.subscribers.write().await;
        let count = subscribers.len();
        for subscriber in subscribers.drain(..) {
            subscriber.sender.close();
        }
        count
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    pub fn stats(&self) -> ObservableStats {
        let counters = &self.inner.counters;
        ObservableStats {
            emitted: counters.emitted.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }
}

enum Delivery {
    Delivered,
    Dropped,
    /// Delivered after evicting an older value.
    Replaced,
    Gone,
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("strategy", &self.inner.strategy)
            .field("capacity", &self.inner.capacity)
            .field("closed", &(self.inner.status.load(Ordering::Acquire) == CLOSED))
            .finish()
    }
}
