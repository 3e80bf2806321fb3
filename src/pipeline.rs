//! CSP-style pipeline combinators.
//!
//! Every combinator spawns its own task and returns a [`Stream`]: a bounded
//! channel with a single producer whose closure is the only end-of-data signal.
//! Order is preserved within a stream; `merge` makes no promise about how its
//! inputs interleave.
//!
//! A stage whose downstream has gone away stops reading its input and closes
//! its own output.

use tokio::task::JoinSet;

use crate::channel::{self, Receiver, SendError, Sender};
use crate::config::{DEFAULT_STREAM_CAPACITY, ToolkitConfig};

pub type Stream<T> = Receiver<T>;

/// Builds stages whose streams share one buffer capacity.
#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    capacity: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl Pipeline {
    pub fn new(capacity: usize) -> Self {
        Pipeline {
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &ToolkitConfig) -> Self {
        Pipeline::new(config.stream_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sends each of `values` in order, then closes the stream.
    pub fn generate<T, I>(&self, values: I) -> Stream<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let (output, stream) = channel::channel(self.capacity);
        let values = values.into_iter();
        tokio::spawn(async move {
            for value in values {
                if output.send(value).await.is_err() {
                    log::debug!("generate: downstream went away");
                    break;
                }
            }
            output.close();
        });
        stream
    }

    /// Applies `f` to every element of `input`, closing the output when `input` closes.
    pub fn transform<T, U, F>(&self, input: Stream<T>, mut f: F) -> Stream<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let (output, stream) = channel::channel(self.capacity);
        tokio::spawn(async move {
            while let Some(value) = input.recv().await {
                if output.send(f(value)).await.is_err() {
                    log::debug!("transform: downstream went away");
                    break;
                }
            }
            output.close();
        });
        stream
    }

    /// Forwards only the elements of `input` that satisfy `predicate`.
    pub fn filter<T, P>(&self, input: Stream<T>, mut predicate: P) -> Stream<T>
    where
        T: Send + 'static,
        P: FnMut(&T) -> bool + Send + 'static,
    {
        let (output, stream) = channel::channel(self.capacity);
        tokio::spawn(async move {
            while let Some(value) = input.recv().await {
                if !predicate(&value) {
                    continue;
                }
                if output.send(value).await.is_err() {
                    log::debug!("filter: downstream went away");
                    break;
                }
            }
            output.close();
        });
        stream
    }

    /// Fan-in: one forwarding task per input into a shared output, which closes
    /// once every input has closed.
    pub fn merge<T, I>(&self, inputs: I) -> Stream<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = Stream<T>>,
    {
        let (output, stream) = channel::channel(self.capacity);
        let mut forwarders = JoinSet::new();
        for input in inputs {
            let output = output.clone();
            forwarders.spawn(async move {
                while let Some(value) = input.recv().await {
                    if output.send(value).await.is_err() {
                        break;
                    }
                }
            });
        }

        tokio::spawn(async move {
            let inputs = forwarders.len();
            while let Some(joined) = forwarders.join_next().await {
                if let Err(error) = joined {
                    log::error!("merge: forwarder failed: {}", error);
                }
            }
            output.close();
            log::debug!("merge: all {} input(s) closed", inputs);
        });
        stream
    }

    /// Fan-out: deals the elements of `input` round-robin over `workers` streams.
    /// An element refused by a closed branch goes to the next open one.
    pub fn fan_out<T>(&self, input: Stream<T>, workers: usize) -> Vec<Stream<T>>
    where
        T: Send + 'static,
    {
        let (mut outputs, streams): (Vec<Sender<T>>, Vec<Stream<T>>) = (0..workers.max(1))
            .map(|_| channel::channel(self.capacity))
            .unzip();

        tokio::spawn(async move {
            let mut next = 0;
            'input: while let Some(mut value) = input.recv().await {
                loop {
                    if outputs.is_empty() {
                        log::debug!("fan_out: every branch went away");
                        break 'input;
                    }
                    let index = next % outputs.len();
                    match outputs[index].send(value).await {
                        Ok(()) => {
                            next = index + 1;
                            break;
                        }
                        Err(SendError(rejected)) => {
                            outputs.remove(index);
                            value = rejected;
                        }
                    }
                }
            }
            for output in outputs {
                output.close();
            }
        });
        streams
    }
}

pub fn generate<T, I>(values: I) -> Stream<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    Pipeline::default().generate(values)
}

pub fn transform<T, U, F>(input: Stream<T>, f: F) -> Stream<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    Pipeline::default().transform(input, f)
}

pub fn filter<T, P>(input: Stream<T>, predicate: P) -> Stream<T>
where
    T: Send + 'static,
    P: FnMut(&T) -> bool + Send + 'static,
{
    Pipeline::default().filter(input, predicate)
}

pub fn merge<T, I>(inputs: I) -> Stream<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Stream<T>>,
{
    Pipeline::default().merge(inputs)
}

pub fn fan_out<T>(input: Stream<T>, workers: usize) -> Vec<Stream<T>>
where
    T: Send + 'static,
{
    Pipeline::default().fan_out(input, workers)
}

/// Drains `input` into a vector once it closes.
pub async fn collect<T>(input: Stream<T>) -> Vec<T> {
    input.collect().await
}
