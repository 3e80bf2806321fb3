//! Actor module - mailbox, dispatch table and lifecycle.
//!
//! An [`Actor`] owns a bounded mailbox and a table of handlers keyed by message
//! kind. Once started, a single tokio task drains the mailbox and runs the
//! matching handler for each message, one at a time, in arrival order.

pub(crate) mod handler;
pub(crate) mod runner;
pub(crate) mod supervision;

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{self, Receiver, Sender, TrySendError};
use crate::config::ToolkitConfig;

pub use handler::{BoxedHandler, FnHandler, Handler};
pub use supervision::{
    ExponentialBackoffStrategy, FixedIntervalStrategy, NoIntervalStrategy, RetryStrategy,
    SupervisionStrategy,
};

use handler::HandlerTable;
use runner::ActorRunner;

/// Defines what an actor will receive.
///
/// Implement it on a closed enum of message variants, with `Kind` being the
/// matching fieldless discriminant. Handlers are registered per `Kind`.
pub trait Message: Clone + Send + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Identity of an actor.
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ActorId(Arc<str>);

impl ActorId {
    /// A fresh, unique id.
    pub fn random() -> Self {
        ActorId::from(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        ActorId(Arc::from(id))
    }
}

impl From<String> for ActorId {
    fn from(id: String) -> Self {
        ActorId(Arc::from(id))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ActorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ActorState::Created,
            1 => ActorState::Running,
            2 => ActorState::Stopping,
            _ => ActorState::Stopped,
        }
    }
}

/// Shared lifecycle of one actor. Every transition is a compare-and-swap.
pub(crate) struct Lifecycle {
    state: AtomicU8,
    terminated: CancellationToken,
}

impl Lifecycle {
    fn new() -> Self {
        Lifecycle {
            state: AtomicU8::new(ActorState::Created as u8),
            terminated: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn transition(&self, from: ActorState, to: ActorState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mark_stopped(&self) {
        self.state.store(ActorState::Stopped as u8, Ordering::Release);
        self.terminated.cancel();
    }

    async fn terminated(&self) {
        self.terminated.cancelled().await
    }
}

/// The actor context gives a running handler access to its actor.
#[derive(Debug)]
pub struct ActorContext<M: Message> {
    id: ActorId,
    myself: ActorRef<M>,
    token: CancellationToken,
}

impl<M: Message> ActorContext<M> {
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Address of the actor running this handler.
    pub fn myself(&self) -> &ActorRef<M> {
        &self.myself
    }

    /// Requests termination of this actor once the current handler returns.
    /// Does not wait: joining from inside the loop would never finish.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A clonable actor reference.
pub struct ActorRef<M: Message> {
    id: ActorId,
    sender: Sender<M>,
}

impl<M: Message> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<M: Message> ActorRef<M> {
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// Enqueues `msg`, waiting while the mailbox is full. Never drops.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        if self.sender.send(msg).await.is_err() {
            log::debug!("Failed to send message to actor '{}': mailbox closed", self.id);
            return Err(ActorError::MailboxClosed(self.id.clone()));
        }
        Ok(())
    }

    /// Enqueues `msg` only if the mailbox has room right now.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ActorError::MailboxFull(self.id.clone())),
            Err(TrySendError::Closed(_)) => Err(ActorError::MailboxClosed(self.id.clone())),
        }
    }

    /// Checks if the actor mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<M: Message> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorRef({})", self.id)
    }
}

/// Everything the dispatch loop takes ownership of on `start`.
struct Setup<M: Message> {
    receiver: Receiver<M>,
    handlers: HandlerTable<M>,
    supervision: SupervisionStrategy,
}

/// A single actor: mailbox, handler table and lifecycle.
///
/// Handlers and the supervision strategy are configured while the actor is
/// `Created`; `start` hands them to the dispatch task and they can no longer be
/// changed. `stop` is idempotent and waits for the dispatch task to finish.
///
/// When a message and the stop signal are ready at the same moment, the loop
/// may pick either one. With `drain_on_stop` (the default) messages already in
/// the mailbox are still handled before the actor reaches `Stopped`.
pub struct Actor<M: Message> {
    myself: ActorRef<M>,
    setup: Mutex<Option<Setup<M>>>,
    drain_on_stop: bool,
    token: CancellationToken,
    lifecycle: Arc<Lifecycle>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Message> Actor<M> {
    pub fn new(id: impl Into<ActorId>) -> Self {
        Self::with_config(id, &ToolkitConfig::default())
    }

    pub fn with_config(id: impl Into<ActorId>, config: &ToolkitConfig) -> Self {
        Self::with_token(id, config, CancellationToken::new())
    }

    /// Builds an actor stopped by `token` (or any of its parents). The actor
    /// cancels only a child of `token`, never `token` itself.
    pub fn with_token(
        id: impl Into<ActorId>,
        config: &ToolkitConfig,
        token: CancellationToken,
    ) -> Self {
        let id = id.into();
        let (sender, receiver) = channel::channel(config.mailbox_capacity);
        Actor {
            myself: ActorRef { id, sender },
            setup: Mutex::new(Some(Setup {
                receiver,
                handlers: HandlerTable::new(),
                supervision: SupervisionStrategy::default(),
            })),
            drain_on_stop: config.drain_on_stop,
            token: token.child_token(),
            lifecycle: Arc::new(Lifecycle::new()),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.myself.id
    }

    pub fn state(&self) -> ActorState {
        self.lifecycle.state()
    }

    pub fn actor_ref(&self) -> ActorRef<M> {
        self.myself.clone()
    }

    fn configure<F>(&self, f: F) -> Result<(), ActorError>
    where
        F: FnOnce(&mut Setup<M>),
    {
        let mut setup = self.setup.lock().unwrap_or_else(PoisonError::into_inner);
        match setup.as_mut() {
            Some(setup) => {
                f(setup);
                Ok(())
            }
            None => Err(self.not_configurable()),
        }
    }

    fn not_configurable(&self) -> ActorError {
        match self.state() {
            ActorState::Created | ActorState::Running => {
                ActorError::AlreadyStarted(self.id().clone())
            }
            ActorState::Stopping | ActorState::Stopped => ActorError::Stopped(self.id().clone()),
        }
    }

    /// Registers `handler` for messages of `kind`, replacing any previous one.
    pub fn register_handler<H>(&self, kind: M::Kind, handler: H) -> Result<(), ActorError>
    where
        H: Handler<M>,
    {
        self.configure(|setup| {
            if setup.handlers.insert(kind, Box::new(handler)).is_some() {
                log::debug!("Replaced handler for {:?} on actor '{}'", kind, self.id());
            }
        })
    }

    /// Registers a synchronous closure for messages of `kind`.
    pub fn register_fn<F>(&self, kind: M::Kind, f: F) -> Result<(), ActorError>
    where
        F: FnMut(M, &mut ActorContext<M>) -> Result<(), ActorError> + Send + 'static,
    {
        self.register_handler(kind, FnHandler::new(f))
    }

    pub fn set_supervision(&self, strategy: SupervisionStrategy) -> Result<(), ActorError> {
        self.configure(|setup| setup.supervision = strategy)
    }

    /// Spawns the dispatch loop on the ambient tokio runtime.
    pub fn start(&self) -> Result<(), ActorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ActorError::NoRuntime)?;

        let setup = self
            .setup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(setup) = setup else {
            return Err(self.not_configurable());
        };

        if !self
            .lifecycle
            .transition(ActorState::Created, ActorState::Running)
        {
            return Err(self.not_configurable());
        }

        log::debug!(
            "Starting actor '{}' with {} handler(s)",
            self.id(),
            setup.handlers.len()
        );

        let ctx = ActorContext {
            id: self.id().clone(),
            myself: self.myself.clone(),
            token: self.token.clone(),
        };
        let runner = ActorRunner::new(
            ctx,
            setup.receiver,
            setup.handlers,
            setup.supervision,
            self.drain_on_stop,
            self.lifecycle.clone(),
        );
        let handle = runtime.spawn(runner.run());
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.myself.send(msg).await
    }

    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.myself.try_send(msg)
    }

    /// Stops the actor and waits until its dispatch loop has exited.
    pub async fn stop(&self) {
        self.token.cancel();

        if self
            .lifecycle
            .transition(ActorState::Created, ActorState::Stopped)
        {
            self.myself.sender.close();
            self.setup
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            self.lifecycle.mark_stopped();
            log::debug!("Actor '{}' stopped before it was started.", self.id());
            return;
        }

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                log::error!("Actor '{}' task failed: {}", self.id(), error);
            }
            self.lifecycle.mark_stopped();
        }

        self.lifecycle.terminated().await;
    }
}

impl<M: Message> Drop for Actor<M> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<M: Message> fmt::Debug for Actor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum ActorError {
    #[error("Actor '{0}' has already been started")]
    AlreadyStarted(ActorId),

    #[error("Actor '{0}' has been stopped")]
    Stopped(ActorId),

    #[error("No tokio runtime to run the actor on")]
    NoRuntime,

    #[error("Mailbox of actor '{0}' is closed")]
    MailboxClosed(ActorId),

    #[error("Mailbox of actor '{0}' is full")]
    MailboxFull(ActorId),

    #[error("Actor '{actor}' has no handler for {kind}")]
    HandlerNotFound { actor: ActorId, kind: String },

    #[error("Handler failed: {0}")]
    HandlerFailed(anyhow::Error),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

impl ActorError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::HandlerFailed(anyhow::Error::new(error))
    }
}

impl From<anyhow::Error> for ActorError {
    fn from(error: anyhow::Error) -> Self {
        Self::HandlerFailed(error)
    }
}
