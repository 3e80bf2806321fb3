use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tiny_tokio_csp::actor::{FixedIntervalStrategy, NoIntervalStrategy};
use tiny_tokio_csp::{
    Actor, ActorContext, ActorError, ActorState, Handler, Message, SupervisionStrategy,
    ToolkitConfig, async_trait,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Command {
    Text(String),
    Number(i64),
    Fail,
    Panic,
    Halt,
    Countdown(u32),
    Unrouted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CommandKind {
    Text,
    Number,
    Fail,
    Panic,
    Halt,
    Countdown,
    Unrouted,
}

impl Message for Command {
    type Kind = CommandKind;

    fn kind(&self) -> CommandKind {
        match self {
            Command::Text(_) => CommandKind::Text,
            Command::Number(_) => CommandKind::Number,
            Command::Fail => CommandKind::Fail,
            Command::Panic => CommandKind::Panic,
            Command::Halt => CommandKind::Halt,
            Command::Countdown(_) => CommandKind::Countdown,
            Command::Unrouted => CommandKind::Unrouted,
        }
    }
}

type Journal = Arc<Mutex<Vec<String>>>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An actor with text and number handlers writing into a shared journal.
fn printer(id: &str) -> (Actor<Command>, Journal) {
    let journal = Journal::default();
    let actor = Actor::<Command>::new(id);

    let log = journal.clone();
    actor
        .register_fn(CommandKind::Text, move |msg, _| {
            if let Command::Text(text) = msg {
                log.lock().unwrap().push(format!("text:{text}"));
            }
            Ok(())
        })
        .unwrap();
    let log = journal.clone();
    actor
        .register_fn(CommandKind::Number, move |msg, _| {
            if let Command::Number(n) = msg {
                log.lock().unwrap().push(format!("number:{n}"));
            }
            Ok(())
        })
        .unwrap();

    (actor, journal)
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

async fn wait_for_state(actor: &Actor<Command>, state: ActorState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while actor.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("actor never reached {state:?}, still {:?}", actor.state()));
}

/// Counts attempts and fails every one of them.
struct AlwaysFails {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<Command> for AlwaysFails {
    async fn handle(&mut self, _: Command, _: &mut ActorContext<Command>) -> Result<(), ActorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("boom").into())
    }
}

/// Records numbers after a short pause.
struct SlowRecorder {
    journal: Journal,
}

#[async_trait]
impl Handler<Command> for SlowRecorder {
    async fn handle(&mut self, msg: Command, _: &mut ActorContext<Command>) -> Result<(), ActorError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Command::Number(n) = msg {
            self.journal.lock().unwrap().push(format!("number:{n}"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_printer_handles_messages_in_order() {
    init_logger();
    let (actor, journal) = printer("printer");
    assert_eq!(actor.state(), ActorState::Created);
    actor.start().unwrap();
    assert_eq!(actor.state(), ActorState::Running);

    actor.send(Command::Text("Hello".into())).await.unwrap();
    actor.send(Command::Number(42)).await.unwrap();
    actor.send(Command::Text("World".into())).await.unwrap();
    actor.stop().await;

    assert_eq!(
        entries(&journal),
        vec!["text:Hello", "number:42", "text:World"]
    );
    assert_eq!(actor.state(), ActorState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_messages_keep_fifo_order() {
    let (actor, journal) = printer("fifo");
    actor.start().unwrap();

    // More messages than the mailbox holds, so `send` has to wait for room.
    for n in 0..1_000 {
        actor.send(Command::Number(n)).await.unwrap();
    }
    actor.stop().await;

    let expected: Vec<String> = (0..1_000).map(|n| format!("number:{n}")).collect();
    assert_eq!(entries(&journal), expected);
}

#[tokio::test]
async fn test_unknown_kind_is_skipped() {
    init_logger();
    let (actor, journal) = printer("unrouted");
    actor.start().unwrap();

    actor.send(Command::Unrouted).await.unwrap();
    actor.send(Command::Number(1)).await.unwrap();
    actor.stop().await;

    assert_eq!(entries(&journal), vec!["number:1"]);
}

#[tokio::test]
async fn test_handler_panic_is_isolated() {
    init_logger();
    let (actor, journal) = printer("panicky");
    actor
        .register_fn(CommandKind::Panic, |_, _| panic!("handler exploded"))
        .unwrap();
    actor.start().unwrap();

    actor.send(Command::Panic).await.unwrap();
    actor.send(Command::Number(7)).await.unwrap();
    actor.stop().await;

    assert_eq!(entries(&journal), vec!["number:7"]);
    assert_eq!(actor.state(), ActorState::Stopped);
}

#[tokio::test]
async fn test_handler_error_resumes_by_default() {
    let (actor, journal) = printer("resumes");
    let attempts = Arc::new(AtomicUsize::new(0));
    actor
        .register_handler(
            CommandKind::Fail,
            AlwaysFails {
                attempts: attempts.clone(),
            },
        )
        .unwrap();
    actor.start().unwrap();

    actor.send(Command::Fail).await.unwrap();
    actor.send(Command::Number(3)).await.unwrap();
    actor.stop().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&journal), vec!["number:3"]);
}

#[tokio::test]
async fn test_retry_strategy_retries_then_moves_on() {
    let (actor, journal) = printer("retries");
    let attempts = Arc::new(AtomicUsize::new(0));
    actor
        .register_handler(
            CommandKind::Fail,
            AlwaysFails {
                attempts: attempts.clone(),
            },
        )
        .unwrap();
    actor
        .set_supervision(SupervisionStrategy::Retry(Box::new(NoIntervalStrategy::new(
            3,
        ))))
        .unwrap();
    actor.start().unwrap();

    actor.send(Command::Fail).await.unwrap();
    actor.send(Command::Number(5)).await.unwrap();
    actor.stop().await;

    // One attempt plus three retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(entries(&journal), vec!["number:5"]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_is_cut_short_by_stop() {
    let actor = Actor::<Command>::new("backoff");
    let attempts = Arc::new(AtomicUsize::new(0));
    actor
        .register_handler(
            CommandKind::Fail,
            AlwaysFails {
                attempts: attempts.clone(),
            },
        )
        .unwrap();
    actor
        .set_supervision(SupervisionStrategy::Retry(Box::new(
            FixedIntervalStrategy::new(5, Duration::from_secs(3600)),
        )))
        .unwrap();
    actor.start().unwrap();

    actor.send(Command::Fail).await.unwrap();
    while attempts.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    actor.stop().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(actor.state(), ActorState::Stopped);
}

#[tokio::test]
async fn test_stop_strategy_stops_the_actor() {
    let (actor, _journal) = printer("stops");
    let attempts = Arc::new(AtomicUsize::new(0));
    actor
        .register_handler(
            CommandKind::Fail,
            AlwaysFails {
                attempts: attempts.clone(),
            },
        )
        .unwrap();
    actor.set_supervision(SupervisionStrategy::Stop).unwrap();
    actor.start().unwrap();

    actor.send(Command::Fail).await.unwrap();
    wait_for_state(&actor, ActorState::Stopped).await;

    assert!(matches!(
        actor.send(Command::Number(1)).await,
        Err(ActorError::MailboxClosed(_))
    ));
    // Joining an actor that already stopped itself returns immediately.
    actor.stop().await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

fn stopping_printer(id: &str) -> (Actor<Command>, Journal) {
    let (actor, journal) = printer(id);
    actor
        .register_handler(
            CommandKind::Fail,
            AlwaysFails {
                attempts: Arc::new(AtomicUsize::new(0)),
            },
        )
        .unwrap();
    actor.set_supervision(SupervisionStrategy::Stop).unwrap();
    actor.try_send(Command::Fail).unwrap();
    actor.try_send(Command::Number(1)).unwrap();
    actor.try_send(Command::Number(2)).unwrap();
    (actor, journal)
}

#[tokio::test]
async fn test_supervision_stop_discards_queued_messages() {
    init_logger();
    let (actor, journal) = stopping_printer("discards");
    actor.start().unwrap();

    wait_for_state(&actor, ActorState::Stopped).await;
    actor.stop().await;
    assert!(entries(&journal).is_empty());
}

#[tokio::test]
async fn test_supervision_stop_ends_the_drain() {
    init_logger();
    let (actor, journal) = stopping_printer("drain-stops");
    actor.start().unwrap();
    // Whether the failure is handled before or during the drain, nothing
    // queued behind it runs.
    actor.stop().await;

    assert_eq!(actor.state(), ActorState::Stopped);
    assert!(entries(&journal).is_empty());
}

#[tokio::test]
async fn test_send_after_stop_is_rejected() {
    let (actor, _journal) = printer("closed");
    let handle = actor.actor_ref();
    actor.start().unwrap();
    actor.stop().await;

    assert!(handle.is_closed());
    assert!(matches!(
        handle.send(Command::Number(1)).await,
        Err(ActorError::MailboxClosed(id)) if id.as_str() == "closed"
    ));
    assert!(matches!(
        handle.try_send(Command::Number(1)),
        Err(ActorError::MailboxClosed(_))
    ));
}

#[tokio::test]
async fn test_configuration_is_frozen_after_start() {
    let (actor, _journal) = printer("frozen");
    actor.start().unwrap();

    assert!(matches!(
        actor.register_fn(CommandKind::Halt, |_, _| Ok(())),
        Err(ActorError::AlreadyStarted(_))
    ));
    assert!(matches!(
        actor.set_supervision(SupervisionStrategy::Stop),
        Err(ActorError::AlreadyStarted(_))
    ));
    assert!(matches!(actor.start(), Err(ActorError::AlreadyStarted(_))));

    actor.stop().await;
    assert!(matches!(actor.start(), Err(ActorError::Stopped(_))));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (actor, journal) = printer("twice");
    actor.start().unwrap();
    actor.send(Command::Number(1)).await.unwrap();

    actor.stop().await;
    actor.stop().await;

    assert_eq!(actor.state(), ActorState::Stopped);
    assert_eq!(entries(&journal), vec!["number:1"]);
}

#[tokio::test]
async fn test_concurrent_stops_all_return() {
    let (actor, _journal) = printer("racing-stops");
    let actor = Arc::new(actor);
    actor.start().unwrap();

    let stops: Vec<_> = (0..4)
        .map(|_| {
            let actor = actor.clone();
            tokio::spawn(async move { actor.stop().await })
        })
        .collect();
    for stop in stops {
        stop.await.unwrap();
    }
    assert_eq!(actor.state(), ActorState::Stopped);
}

#[tokio::test]
async fn test_stop_before_start() {
    let (actor, journal) = printer("never-started");
    actor.stop().await;

    assert_eq!(actor.state(), ActorState::Stopped);
    assert!(matches!(actor.start(), Err(ActorError::Stopped(_))));
    assert!(matches!(
        actor.send(Command::Number(1)).await,
        Err(ActorError::MailboxClosed(_))
    ));
    assert!(entries(&journal).is_empty());
}

#[tokio::test]
async fn test_queued_messages_are_drained_on_stop() {
    let journal = Journal::default();
    let actor = Actor::<Command>::new("drain");
    actor
        .register_handler(
            CommandKind::Number,
            SlowRecorder {
                journal: journal.clone(),
            },
        )
        .unwrap();
    actor.start().unwrap();

    for n in 0..5 {
        actor.send(Command::Number(n)).await.unwrap();
    }
    actor.stop().await;

    assert_eq!(entries(&journal).len(), 5);
}

#[tokio::test]
async fn test_parent_token_stops_actor() {
    let parent = CancellationToken::new();
    let actor = Actor::<Command>::with_token("child", &ToolkitConfig::default(), parent.clone());
    actor.start().unwrap();

    parent.cancel();
    wait_for_state(&actor, ActorState::Stopped).await;
    actor.stop().await;
}

#[tokio::test]
async fn test_stopping_a_child_leaves_the_parent_token_alone() {
    let parent = CancellationToken::new();
    let config = ToolkitConfig::default();
    let first = Actor::<Command>::with_token("first", &config, parent.clone());
    let second = Actor::<Command>::with_token("second", &config, parent.clone());
    first.start().unwrap();
    second.start().unwrap();

    first.stop().await;
    drop(first);

    assert!(!parent.is_cancelled());
    assert_eq!(second.state(), ActorState::Running);
    second.stop().await;
}

#[tokio::test]
async fn test_handler_can_stop_its_actor() {
    let (actor, journal) = printer("self-stop");
    actor
        .register_fn(CommandKind::Halt, |_, ctx| {
            ctx.stop();
            assert!(ctx.is_stopping());
            Ok(())
        })
        .unwrap();
    actor.start().unwrap();

    actor.send(Command::Number(1)).await.unwrap();
    actor.send(Command::Halt).await.unwrap();
    wait_for_state(&actor, ActorState::Stopped).await;

    assert_eq!(entries(&journal), vec!["number:1"]);
    actor.stop().await;
}

#[tokio::test]
async fn test_handler_can_message_itself() {
    let journal = Journal::default();
    let actor = Actor::<Command>::new("countdown");
    let log = journal.clone();
    let done = tiny_tokio_csp::Promise::<()>::new();
    let finished = done.clone();
    actor
        .register_fn(CommandKind::Countdown, move |msg, ctx| {
            let Command::Countdown(n) = msg else {
                return Ok(());
            };
            log.lock().unwrap().push(format!("{}:{n}", ctx.id()));
            if n == 0 {
                finished.set_result(()).map_err(ActorError::new)?;
            } else {
                ctx.myself().try_send(Command::Countdown(n - 1))?;
            }
            Ok(())
        })
        .unwrap();
    actor.start().unwrap();

    actor.send(Command::Countdown(3)).await.unwrap();
    done.get_with_timeout(Duration::from_secs(2)).await.unwrap();
    actor.stop().await;

    assert_eq!(
        entries(&journal),
        vec!["countdown:3", "countdown:2", "countdown:1", "countdown:0"]
    );
}

#[tokio::test]
async fn test_try_send_reports_full_mailbox() {
    let config = ToolkitConfig {
        mailbox_capacity: 2,
        ..ToolkitConfig::default()
    };
    let actor = Actor::<Command>::with_config("tiny", &config);

    actor.try_send(Command::Number(1)).unwrap();
    actor.try_send(Command::Number(2)).unwrap();
    assert!(matches!(
        actor.try_send(Command::Number(3)),
        Err(ActorError::MailboxFull(_))
    ));
    actor.stop().await;
}

#[tokio::test]
async fn test_random_ids_are_unique() {
    let a = Actor::<Command>::new(tiny_tokio_csp::ActorId::random());
    let b = Actor::<Command>::new(tiny_tokio_csp::ActorId::random());
    assert_ne!(a.id(), b.id());
    assert_eq!(a.actor_ref().id(), a.id());
}

#[test]
fn test_start_without_runtime_fails() {
    let (actor, _journal) = printer("no-runtime");
    assert!(matches!(actor.start(), Err(ActorError::NoRuntime)));
    assert_eq!(actor.state(), ActorState::Created);
}
