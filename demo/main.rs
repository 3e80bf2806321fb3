use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tiny_tokio_csp::actor::FixedIntervalStrategy;
use tiny_tokio_csp::pipeline::{self, Pipeline};
use tiny_tokio_csp::{
    Actor, ActorContext, ActorError, Event, Handler, Message, Promise, Subject,
    SupervisionStrategy, ToolkitConfig, async_trait,
};

#[derive(Debug, Clone)]
enum PrinterMsg {
    Text(String),
    Number(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PrinterKind {
    Text,
    Number,
}

impl Message for PrinterMsg {
    type Kind = PrinterKind;

    fn kind(&self) -> PrinterKind {
        match self {
            PrinterMsg::Text(_) => PrinterKind::Text,
            PrinterMsg::Number(_) => PrinterKind::Number,
        }
    }
}

#[derive(Debug, Clone)]
enum CounterMsg {
    Add(u64),
    Report(Promise<u64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CounterKind {
    Add,
    Report,
}

impl Message for CounterMsg {
    type Kind = CounterKind;

    fn kind(&self) -> CounterKind {
        match self {
            CounterMsg::Add(_) => CounterKind::Add,
            CounterMsg::Report(_) => CounterKind::Report,
        }
    }
}

/// Adds incoming amounts; flaky on purpose so supervision has something to do.
struct Accumulator {
    total: Arc<AtomicU64>,
    attempts: u32,
}

#[async_trait]
impl Handler<CounterMsg> for Accumulator {
    async fn handle(
        &mut self,
        msg: CounterMsg,
        ctx: &mut ActorContext<CounterMsg>,
    ) -> Result<(), ActorError> {
        let CounterMsg::Add(amount) = msg else {
            return Ok(());
        };
        self.attempts += 1;
        if self.attempts % 4 == 0 {
            return Err(anyhow::anyhow!("transient failure adding {amount}").into());
        }
        let total = self.total.fetch_add(amount, Ordering::Relaxed) + amount;
        log::debug!("{}: total is now {}", ctx.id(), total);
        Ok(())
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(5..40))
}

async fn actor_demo(config: &ToolkitConfig) -> anyhow::Result<()> {
    log::info!("--- actor demo ---");

    let printer = Actor::<PrinterMsg>::with_config("printer", config);
    printer.register_fn(PrinterKind::Text, |msg, ctx| {
        if let PrinterMsg::Text(text) = msg {
            log::info!("[{}] text: {}", ctx.id(), text);
        }
        Ok(())
    })?;
    printer.register_fn(PrinterKind::Number, |msg, ctx| {
        if let PrinterMsg::Number(n) = msg {
            log::info!("[{}] number: {}", ctx.id(), n);
        }
        Ok(())
    })?;
    printer.start()?;

    printer.send(PrinterMsg::Text("Hello".into())).await?;
    printer.send(PrinterMsg::Number(42)).await?;
    printer.send(PrinterMsg::Text("World".into())).await?;
    printer.stop().await;
    log::info!("printer is {:?}", printer.state());

    // The total is read back through a promise carried by the message itself.
    let counter = Actor::<CounterMsg>::with_config("counter", config);
    let total = Arc::new(AtomicU64::new(0));
    counter.register_handler(
        CounterKind::Add,
        Accumulator {
            total: total.clone(),
            attempts: 0,
        },
    )?;
    counter.set_supervision(SupervisionStrategy::Retry(Box::new(
        FixedIntervalStrategy::new(2, Duration::from_millis(10)),
    )))?;
    counter.register_fn(CounterKind::Report, move |msg, _| {
        if let CounterMsg::Report(reply) = msg {
            reply
                .set_result(total.load(Ordering::Relaxed))
                .map_err(ActorError::new)?;
        }
        Ok(())
    })?;
    counter.start()?;

    for amount in 1..=10 {
        counter.send(CounterMsg::Add(amount)).await?;
    }
    let report = Promise::<u64>::new();
    counter.send(CounterMsg::Report(report.clone())).await?;
    log::info!(
        "counter total: {} (expected {})",
        report.get_with_timeout(Duration::from_secs(1)).await?,
        (1..=10).sum::<u64>()
    );
    counter.stop().await;

    Ok(())
}

async fn future_demo() -> anyhow::Result<()> {
    log::info!("--- future demo ---");

    let answer = Promise::spawn(async {
        tokio::time::sleep(jitter()).await;
        Ok(6 * 7)
    });
    let readers: Vec<_> = (0..3)
        .map(|reader| {
            let answer = answer.clone();
            tokio::spawn(async move {
                let value = answer.get().await;
                log::info!("reader {} got {:?}", reader, value);
            })
        })
        .collect();
    for reader in readers {
        reader.await?;
    }

    let late = Promise::<u32>::new();
    match late.get_with_timeout(Duration::from_millis(20)).await {
        Ok(value) => log::info!("late promise resolved early: {}", value),
        Err(error) => log::info!("late promise: {}", error),
    }
    late.set_result(1)?;
    if let Err(error) = late.set_result(2) {
        log::info!("second assignment rejected: {}", error);
    }
    log::info!("late promise finally: {:?}", late.try_get());

    Ok(())
}

async fn reactive_demo(config: &ToolkitConfig) -> anyhow::Result<()> {
    log::info!("--- reactive demo ({:?}) ---", config.overflow);

    let readings = Subject::<f64>::with_config(config);
    let mut observers = Vec::new();
    for observer in 0..3 {
        let events = readings.subscribe().await?;
        observers.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    Event::Next(value) => log::info!("observer {}: {:.1}", observer, value),
                    Event::Error(error) => log::warn!("observer {}: error {}", observer, error),
                    Event::Completed => log::info!("observer {}: completed", observer),
                }
            }
        }));
    }

    readings.next(20.5).await?;
    readings.next(21.0).await?;
    readings.error(anyhow::anyhow!("sensor glitch")).await?;
    readings.next(21.7).await?;
    readings.complete().await?;

    for observer in observers {
        observer.await?;
    }
    log::info!("readings: {}", readings.stats());
    Ok(())
}

async fn csp_demo(config: &ToolkitConfig) -> anyhow::Result<()> {
    log::info!("--- csp demo ---");

    let stages = Pipeline::from_config(config);
    let squares = stages.transform(stages.generate(1..=5), |x: u64| x * x);
    log::info!("squares: {:?}", pipeline::collect(squares).await);

    let workers = stages.fan_out(stages.generate(0..12u32), 3);
    let processed = workers
        .into_iter()
        .enumerate()
        .map(|(worker, jobs)| {
            let (results, stream) = tiny_tokio_csp::channel(config.stream_capacity);
            tokio::spawn(async move {
                while let Some(job) = jobs.recv().await {
                    tokio::time::sleep(jitter()).await;
                    if results.send(format!("worker {worker} did job {job}")).await.is_err() {
                        break;
                    }
                }
                results.close();
            });
            stream
        })
        .collect::<Vec<_>>();

    let merged = stages.merge(processed);
    while let Some(line) = merged.recv().await {
        log::info!("{}", line);
    }
    log::info!("all workers finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = ToolkitConfig::from_env();
    log::debug!("Using {:?}", config);

    let which = std::env::args().nth(1).unwrap_or_else(|| "all".to_string());
    match which.as_str() {
        "actor" => actor_demo(&config).await?,
        "future" => future_demo().await?,
        "reactive" => reactive_demo(&config).await?,
        "csp" => csp_demo(&config).await?,
        "all" => {
            actor_demo(&config).await?;
            future_demo().await?;
            reactive_demo(&config).await?;
            csp_demo(&config).await?;
        }
        other => {
            log::error!("Unknown demo '{}'. Try: actor, future, reactive, csp, all", other);
            std::process::exit(2);
        }
    }

    Ok(())
}
