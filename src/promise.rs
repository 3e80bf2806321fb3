//! Single-assignment asynchronous result.
//!
//! A [`Promise`] starts unset and is resolved exactly once, either with a value
//! or with an error. Every handle observes the same outcome, as many times as it
//! likes. Composition is explicit: a task awaits one promise and resolves another.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;

const UNSET: u8 = 0;
const SET: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Unset,
    Set,
}

#[derive(Error, Debug, Clone)]
pub enum PromiseError {
    #[error("Promise has already been resolved")]
    AlreadySet,

    #[error("Promise not resolved after {0:?}")]
    Timeout(Duration),

    #[error("Promise has not been resolved yet")]
    Pending,

    #[error("Promise failed: {0}")]
    Failed(Arc<anyhow::Error>),
}

type Outcome<T> = Result<T, Arc<anyhow::Error>>;

struct Shared<T> {
    state: AtomicU8,
    outcome: OnceLock<Outcome<T>>,
    done: watch::Sender<bool>,
}

/// A clonable handle to a single-assignment slot.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Promise {
            shared: Arc::new(Shared {
                state: AtomicU8::new(UNSET),
                outcome: OnceLock::new(),
                done,
            }),
        }
    }

    /// An already resolved promise.
    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        let _ = promise.assign(Ok(value));
        promise
    }

    /// An already failed promise.
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        let promise = Self::new();
        let _ = promise.assign(Err(Arc::new(error.into())));
        promise
    }

    fn assign(&self, outcome: Outcome<T>) -> Result<(), PromiseError> {
        if self
            .shared
            .state
            .compare_exchange(UNSET, SET, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PromiseError::AlreadySet);
        }
        // Only the winner of the exchange gets here, so the slot is still empty.
        let _ = self.shared.outcome.set(outcome);
        self.shared.done.send_replace(true);
        Ok(())
    }

    pub fn set_result(&self, value: T) -> Result<(), PromiseError> {
        self.assign(Ok(value))
    }

    pub fn set_error(&self, error: impl Into<anyhow::Error>) -> Result<(), PromiseError> {
        self.assign(Err(Arc::new(error.into())))
    }

    /// Non-blocking poll.
    pub fn is_done(&self) -> bool {
        *self.shared.done.borrow()
    }

    pub fn state(&self) -> PromiseState {
        if self.is_done() {
            PromiseState::Set
        } else {
            PromiseState::Unset
        }
    }
}

impl<T: Clone> Promise<T> {
    fn outcome(&self) -> Result<T, PromiseError> {
        match self.shared.outcome.get() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(error)) => Err(PromiseError::Failed(error.clone())),
            None => Err(PromiseError::Pending),
        }
    }

    /// Waits until resolved and returns the outcome. Repeatable.
    pub async fn get(&self) -> Result<T, PromiseError> {
        let mut done = self.shared.done.subscribe();
        // The sender lives inside `shared`, so this cannot observe a closed channel.
        let _ = done.wait_for(|resolved| *resolved).await;
        self.outcome()
    }

    /// Like [`get`](Self::get) but gives up after `timeout`. The promise itself is
    /// untouched: a later `get` still sees the eventual outcome.
    pub async fn get_with_timeout(&self, timeout: Duration) -> Result<T, PromiseError> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| PromiseError::Timeout(timeout))?
    }

    /// Returns the outcome if already resolved, `Pending` otherwise.
    pub fn try_get(&self) -> Result<T, PromiseError> {
        if !self.is_done() {
            return Err(PromiseError::Pending);
        }
        self.outcome()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Runs `task` on a new tokio task and resolves the returned promise with its
    /// outcome. A panicking task fails the promise instead of leaving it unset.
    pub fn spawn<F>(task: F) -> Self
    where
        F: std::future::Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let promise = Self::new();
        let producer = promise.clone();
        tokio::spawn(async move {
            let assigned = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(value)) => producer.set_result(value),
                Ok(Err(error)) => producer.set_error(error),
                Err(panic) => producer.set_error(anyhow::anyhow!(
                    "producer panicked: {}",
                    crate::panic_message(panic.as_ref())
                )),
            };
            if let Err(error) = assigned {
                log::debug!("Discarding spawned result: {}", error);
            }
        });
        promise
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .finish()
    }
}
