//! Tiny Tokio CSP - small concurrency primitives built on tokio.
//!
//! - [`actor`]: actors with a bounded mailbox, a handler table keyed by message
//!   kind, failure isolation and a `Created -> Running -> Stopping -> Stopped` lifecycle.
//! - [`promise`]: a single-assignment result that many tasks can await.
//! - [`reactive`]: a multicast bus ([`Observable`], [`Subject`]) with a
//!   configurable policy for slow subscribers.
//! - [`pipeline`]: `generate`/`transform`/`merge` style stages over bounded streams.
//!
//! All of them share the bounded [`channel`](mod@channel) primitive.

pub mod actor;
pub mod channel;
pub mod config;
pub mod pipeline;
pub mod promise;
pub mod reactive;

pub use actor::{
    Actor, ActorContext, ActorError, ActorId, ActorRef, ActorState, FnHandler, Handler, Message,
    SupervisionStrategy,
};
pub use channel::{ChannelError, Receiver, Sender, channel};
pub use config::{OverflowStrategy, ToolkitConfig};
pub use pipeline::{Pipeline, Stream};
pub use promise::{Promise, PromiseError, PromiseState};
pub use reactive::{
    EmitReport, Event, Observable, ObservableError, ObservableStats, Subject, SubscriptionId,
};

pub use async_trait::async_trait;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
