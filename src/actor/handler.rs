//! Actor message handlers and the per-actor dispatch table.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{ActorContext, ActorError, Message};

/// Defines what an actor does with one kind of message.
#[async_trait]
pub trait Handler<M: Message>: Send + 'static {
    async fn handle(&mut self, msg: M, ctx: &mut ActorContext<M>) -> Result<(), ActorError>;
}

/// Adapts a synchronous closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        FnHandler { f }
    }
}

#[async_trait]
impl<M, F> Handler<M> for FnHandler<F>
where
    M: Message,
    F: FnMut(M, &mut ActorContext<M>) -> Result<(), ActorError> + Send + 'static,
{
    async fn handle(&mut self, msg: M, ctx: &mut ActorContext<M>) -> Result<(), ActorError> {
        (self.f)(msg, ctx)
    }
}

pub type BoxedHandler<M> = Box<dyn Handler<M>>;

/// Handlers keyed by message kind. Owned by the dispatch loop once the actor runs.
pub(crate) struct HandlerTable<M: Message> {
    handlers: HashMap<M::Kind, BoxedHandler<M>>,
}

impl<M: Message> HandlerTable<M> {
    pub fn new() -> Self {
        HandlerTable {
            handlers: HashMap::new(),
        }
    }

    /// Stores `handler` for `kind`, returning the handler it replaced.
    pub fn insert(&mut self, kind: M::Kind, handler: BoxedHandler<M>) -> Option<BoxedHandler<M>> {
        self.handlers.insert(kind, handler)
    }

    pub fn get_mut(&mut self, kind: &M::Kind) -> Option<&mut BoxedHandler<M>> {
        self.handlers.get_mut(kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}
