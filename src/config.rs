use std::env;
use std::str::FromStr;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 10;
pub const DEFAULT_STREAM_CAPACITY: usize = 10;

/// What an [`Observable`](crate::reactive::Observable) does when a subscriber's buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Discard the value being emitted, for that subscriber only.
    #[default]
    DropNewest,
    /// Discard the subscriber's oldest buffered value to make room.
    DropOldest,
    /// Wait until the subscriber has room. A stalled subscriber stalls `emit`.
    BlockProducer,
}

impl FromStr for OverflowStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-newest" | "drop_newest" | "newest" => Ok(OverflowStrategy::DropNewest),
            "drop-oldest" | "drop_oldest" | "oldest" => Ok(OverflowStrategy::DropOldest),
            "block" | "block-producer" | "block_producer" => Ok(OverflowStrategy::BlockProducer),
            other => Err(format!("unknown overflow strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolkitConfig {
    pub mailbox_capacity: usize,
    pub subscriber_capacity: usize,
    pub stream_capacity: usize,
    pub overflow: OverflowStrategy,
    pub drain_on_stop: bool,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            overflow: OverflowStrategy::default(),
            drain_on_stop: true,
        }
    }
}

impl ToolkitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(capacity) = parse_var::<usize>("CSP_MAILBOX_CAPACITY") {
            config.mailbox_capacity = capacity.max(1);
        }

        if let Some(capacity) = parse_var::<usize>("CSP_SUBSCRIBER_CAPACITY") {
            config.subscriber_capacity = capacity.max(1);
        }

        if let Some(capacity) = parse_var::<usize>("CSP_STREAM_CAPACITY") {
            config.stream_capacity = capacity.max(1);
        }

        if let Some(strategy) = parse_var::<OverflowStrategy>("CSP_OVERFLOW_STRATEGY") {
            config.overflow = strategy;
        }

        if let Some(drain) = parse_var::<bool>("CSP_DRAIN_ON_STOP") {
            config.drain_on_stop = drain;
        }

        config
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid value '{}' for {}", raw, name);
            None
        }
    }
}
