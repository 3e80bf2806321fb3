//! Actor supervision strategies.
//!
//! A failing handler (an `Err` or a panic) never takes the dispatch loop down.
//! The strategy only decides whether the message is retried, skipped, or whether
//! the actor stops afterwards.

use std::time::Duration;

use backoff::backoff::Backoff as InnerBackoff;

/// Defines what to do when a handler fails.
#[derive(Debug, Default)]
pub enum SupervisionStrategy {
    /// Log the failure, drop the message and keep going.
    #[default]
    Resume,
    /// Log the failure and stop the actor.
    Stop,
    /// Run the handler again on a copy of the message.
    Retry(Box<dyn RetryStrategy>),
}

/// What the dispatch loop should do about one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    Resume,
    Stop,
    Retry(Option<Duration>),
}

impl SupervisionStrategy {
    pub(crate) fn decide(&mut self, retries: usize) -> Directive {
        match self {
            SupervisionStrategy::Resume => Directive::Resume,
            SupervisionStrategy::Stop => Directive::Stop,
            SupervisionStrategy::Retry(strategy) if retries < strategy.max_retries() => {
                Directive::Retry(strategy.next_backoff())
            }
            SupervisionStrategy::Retry(_) => Directive::Resume,
        }
    }

    /// Called once a message has been dealt with, successfully or not.
    pub(crate) fn settle(&mut self) {
        if let SupervisionStrategy::Retry(strategy) = self {
            strategy.reset();
        }
    }
}

/// Trait to define a retry strategy.
pub trait RetryStrategy: std::fmt::Debug + Send + Sync {
    /// Maximum number of retries for one message before giving up on it.
    fn max_retries(&self) -> usize;
    /// Wait duration before retrying. `None` retries immediately.
    fn next_backoff(&mut self) -> Option<Duration>;
    /// Restores the initial backoff before the next message.
    fn reset(&mut self) {}
}

/// A retry strategy that immediately retries without waiting.
#[derive(Debug, Default)]
pub struct NoIntervalStrategy {
    max_retries: usize,
}

impl NoIntervalStrategy {
    pub fn new(max_retries: usize) -> Self {
        NoIntervalStrategy { max_retries }
    }
}

impl RetryStrategy for NoIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// A retry strategy with a fixed wait period.
#[derive(Debug, Default)]
pub struct FixedIntervalStrategy {
    max_retries: usize,
    duration: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(max_retries: usize, duration: Duration) -> Self {
        FixedIntervalStrategy {
            max_retries,
            duration,
        }
    }
}

impl RetryStrategy for FixedIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// A retry strategy with exponential backoff.
#[derive(Debug)]
pub struct ExponentialBackoffStrategy {
    max_retries: usize,
    inner: backoff::ExponentialBackoff,
}

impl ExponentialBackoffStrategy {
    pub fn new(max_retries: usize) -> Self {
        Self::with_backoff(max_retries, backoff::ExponentialBackoff::default())
    }

    /// Uses a custom backoff. Its elapsed-time limit is lifted: `max_retries` bounds the attempts.
    pub fn with_backoff(max_retries: usize, inner: backoff::ExponentialBackoff) -> Self {
        let mut inner = backoff::ExponentialBackoff {
            max_elapsed_time: None,
            ..inner
        };
        inner.reset();
        ExponentialBackoffStrategy { max_retries, inner }
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_and_stop_directives() {
        assert_eq!(SupervisionStrategy::Resume.decide(0), Directive::Resume);
        assert_eq!(SupervisionStrategy::Stop.decide(0), Directive::Stop);
    }

    #[test]
    fn test_retry_gives_up_after_max_retries() {
        let mut strategy = SupervisionStrategy::Retry(Box::new(FixedIntervalStrategy::new(
            2,
            Duration::from_millis(5),
        )));
        assert_eq!(
            strategy.decide(0),
            Directive::Retry(Some(Duration::from_millis(5)))
        );
        assert_eq!(
            strategy.decide(1),
            Directive::Retry(Some(Duration::from_millis(5)))
        );
        assert_eq!(strategy.decide(2), Directive::Resume);
    }

    #[test]
    fn test_no_interval_retries_immediately() {
        let mut strategy = SupervisionStrategy::Retry(Box::new(NoIntervalStrategy::new(1)));
        assert_eq!(strategy.decide(0), Directive::Retry(None));
        assert_eq!(strategy.decide(1), Directive::Resume);
    }

    #[test]
    fn test_exponential_backoff_grows_and_resets() {
        let mut strategy = ExponentialBackoffStrategy::with_backoff(
            5,
            backoff::ExponentialBackoff {
                initial_interval: Duration::from_millis(10),
                randomization_factor: 0.0,
                multiplier: 2.0,
                ..Default::default()
            },
        );
        let first = strategy.next_backoff().unwrap();
        let second = strategy.next_backoff().unwrap();
        assert!(second > first);

        strategy.reset();
        assert_eq!(strategy.next_backoff().unwrap(), first);
    }
}
