//! Actor runner - the dispatch loop of a started actor.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::channel::Receiver;

use super::{
    ActorContext, ActorError, ActorState, Lifecycle, Message,
    handler::HandlerTable,
    supervision::{Directive, SupervisionStrategy},
};

enum Next<M> {
    Message(M),
    MailboxClosed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct ActorRunner<M: Message> {
    ctx: ActorContext<M>,
    receiver: Receiver<M>,
    handlers: HandlerTable<M>,
    supervision: SupervisionStrategy,
    drain_on_stop: bool,
    lifecycle: Arc<Lifecycle>,
}

impl<M: Message> ActorRunner<M> {
    pub fn new(
        ctx: ActorContext<M>,
        receiver: Receiver<M>,
        handlers: HandlerTable<M>,
        supervision: SupervisionStrategy,
        drain_on_stop: bool,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        ActorRunner {
            ctx,
            receiver,
            handlers,
            supervision,
            drain_on_stop,
            lifecycle,
        }
    }

    pub async fn run(mut self) {
        log::debug!("Actor '{}' has started.", self.ctx.id);

        let mut halted = false;
        loop {
            // Unbiased on purpose: with a message and the stop signal both ready,
            // either branch may win.
            let next = tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(msg) => Next::Message(msg),
                    None => Next::MailboxClosed,
                },
                _ = self.ctx.token.cancelled() => Next::Cancelled,
            };

            match next {
                Next::Message(msg) => {
                    if self.dispatch(msg).await == Flow::Stop {
                        halted = true;
                        self.ctx.token.cancel();
                        break;
                    }
                }
                Next::MailboxClosed => {
                    log::debug!("Mailbox of actor '{}' closed.", self.ctx.id);
                    break;
                }
                Next::Cancelled => break,
            }
        }

        self.lifecycle
            .transition(ActorState::Running, ActorState::Stopping);
        log::debug!("Actor '{}' is stopping...", self.ctx.id);

        // Refuse new sends; blocked senders are released with an error.
        self.receiver.close().await;
        self.ctx.myself.sender.close();

        // A supervision stop discards whatever is still queued.
        if self.drain_on_stop && !halted {
            let mut drained = 0usize;
            while let Some(msg) = self.receiver.recv().await {
                drained += 1;
                if self.dispatch(msg).await == Flow::Stop {
                    log::warn!(
                        "Actor '{}' stopped by supervision while draining its mailbox.",
                        self.ctx.id
                    );
                    break;
                }
            }
            if drained > 0 {
                log::debug!(
                    "Actor '{}' handled {} queued message(s) while stopping.",
                    self.ctx.id,
                    drained
                );
            }
        }

        self.lifecycle.mark_stopped();
        log::debug!("Actor '{}' stopped.", self.ctx.id);
    }

    async fn dispatch(&mut self, msg: M) -> Flow {
        let kind = msg.kind();
        let Some(handler) = self.handlers.get_mut(&kind) else {
            let error = ActorError::HandlerNotFound {
                actor: self.ctx.id.clone(),
                kind: format!("{kind:?}"),
            };
            log::warn!("{}", error);
            return Flow::Continue;
        };

        let mut retries = 0;
        let flow = loop {
            let outcome = AssertUnwindSafe(handler.handle(msg.clone(), &mut self.ctx))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => break Flow::Continue,
                Ok(Err(error)) => error,
                Err(panic) => ActorError::HandlerPanicked(crate::panic_message(panic.as_ref())),
            };

            log::error!(
                "Actor '{}' failed to handle {:?}: {}",
                self.ctx.id,
                kind,
                error
            );

            match self.supervision.decide(retries) {
                Directive::Resume => break Flow::Continue,
                Directive::Stop => {
                    log::warn!("Actor '{}' stopping after handler failure.", self.ctx.id);
                    break Flow::Stop;
                }
                Directive::Retry(backoff) => {
                    retries += 1;
                    if let Some(duration) = backoff {
                        log::debug!("Backoff for {:?}", duration);
                        tokio::select! {
                            _ = tokio::time::sleep(duration) => {}
                            _ = self.ctx.token.cancelled() => {
                                log::debug!("Actor '{}' abandons retry: stopping.", self.ctx.id);
                                break Flow::Continue;
                            }
                        }
                    }
                    log::debug!("retries: {}", retries);
                }
            }
        };

        self.supervision.settle();
        flow
    }
}
