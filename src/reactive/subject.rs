use std::fmt;
use std::sync::Arc;

use crate::channel::Receiver;
use crate::config::{OverflowStrategy, ToolkitConfig};

use super::{EmitReport, Observable, ObservableError, ObservableStats};

/// What a [`Subject`] subscriber receives.
///
/// `Error` is informational and does not end the sequence; `Completed` is
/// always the last event before the channel closes.
#[derive(Clone)]
pub enum Event<T> {
    Next(T),
    Error(Arc<anyhow::Error>),
    Completed,
}

impl<T> Event<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Event::Next(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Event::Completed)
    }
}

impl<T: fmt::Debug> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Next(value) => f.debug_tuple("Next").field(value).finish(),
            Event::Error(error) => write!(f, "Error({error})"),
            Event::Completed => f.write_str("Completed"),
        }
    }
}

/// An [`Observable`] of [`Event`]s with `next`/`error`/`complete` helpers.
pub struct Subject<T> {
    observable: Observable<Event<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            observable: self.observable.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    pub fn new() -> Self {
        Subject {
            observable: Observable::new(),
        }
    }

    pub fn with_config(config: &ToolkitConfig) -> Self {
        Subject {
            observable: Observable::with_config(config),
        }
    }

    pub fn with_strategy(capacity: usize, strategy: OverflowStrategy) -> Self {
        Subject {
            observable: Observable::with_strategy(capacity, strategy),
        }
    }

    pub async fn subscribe(&self) -> Result<Receiver<Event<T>>, ObservableError> {
        self.observable.subscribe().await
    }

    pub async fn next(&self, value: T) -> Result<EmitReport, ObservableError> {
        self.observable.emit(Event::Next(value)).await
    }

    pub async fn error(
        &self,
        error: impl Into<anyhow::Error>,
    ) -> Result<EmitReport, ObservableError> {
        self.observable
            .emit(Event::Error(Arc::new(error.into())))
            .await
    }

    /// Emits `Completed` and closes the subject in one step: values from
    /// concurrent `next` calls either arrive before `Completed` or fail with
    /// [`ObservableError::Closed`].
    pub async fn complete(&self) -> Result<EmitReport, ObservableError> {
        self.observable.close_with(Event::Completed).await
    }

    pub async fn close(&self) -> bool {
        self.observable.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.observable.is_closed()
    }

    pub fn stats(&self) -> ObservableStats {
        self.observable.stats()
    }

    /// The underlying bus, for code that works on plain observables.
    pub fn as_observable(&self) -> &Observable<Event<T>> {
        &self.observable
    }
}

impl<T> fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observable", &self.observable)
            .finish()
    }
}
