//! Concurrent run reader.
//!
//! Every run is streamed by a dedicated producer thread which hands items over to the merger
//! one at a time through a zero-capacity (rendezvous) channel, so at most one item per run is
//! in flight.

use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::io;
use std::thread;

use crossbeam_channel::{self, Receiver, Sender};
use log;

use crate::run::RunId;

/// Message handed over from a producer to the merger.
enum Message<T, E> {
    Record(T),
    EndOfRun,
    Failed(E),
}

/// Run reading error.
#[derive(Debug)]
pub enum RunReadError<E> {
    /// Run storage read error.
    Read(RunId, E),
    /// The producer finished without signaling the end of the run.
    Disconnected(RunId),
}

impl<E: Error + 'static> Error for RunReadError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            RunReadError::Read(_, err) => Some(err),
            RunReadError::Disconnected(_) => None,
        }
    }
}

impl<E: Display> Display for RunReadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunReadError::Read(run, err) => write!(f, "run {} read error: {}", run, err),
            RunReadError::Disconnected(run) => write!(f, "run {} reader terminated unexpectedly", run),
        }
    }
}

/// Cancellation signal shared by a group of run readers.
/// Nothing is ever sent through the channel: dropping the signal disconnects it,
/// which wakes up every producer blocked on a handoff.
pub struct CancelSignal {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        CancelSignal { sender, receiver }
    }

    /// Broadcasts cancellation to every subscribed producer.
    pub fn cancel(self) {
        drop(self.sender);
    }

    fn subscribe(&self) -> Receiver<()> {
        self.receiver.clone()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        CancelSignal::new()
    }
}

/// Run reader. Owns a producer thread streaming a single run.
pub struct RunReader<T, E> {
    run: RunId,
    receiver: Option<Receiver<Message<T, E>>>,
    handle: Option<thread::JoinHandle<()>>,
    finished: bool,
}

impl<T, E> RunReader<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Spawns a producer thread streaming items of the run.
    ///
    /// # Arguments
    /// * `run` - Run identifier
    /// * `items` - Run items in persisted order
    /// * `cancel` - Cancellation signal the producer subscribes to
    pub fn spawn<I>(run: RunId, items: I, cancel: &CancelSignal) -> io::Result<Self>
    where
        I: IntoIterator<Item = Result<T, E>>,
        I::IntoIter: Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        let cancelled = cancel.subscribe();
        let items = items.into_iter();

        let handle = thread::Builder::new()
            .name(format!("run-reader-{}", run))
            .spawn(move || produce(run, items, sender, cancelled))?;

        return Ok(RunReader {
            run,
            receiver: Some(receiver),
            handle: Some(handle),
            finished: false,
        });
    }
}

impl<T, E> RunReader<T, E> {
    /// Returns the identifier of the run being read.
    pub fn run(&self) -> RunId {
        self.run
    }
}

fn produce<T, E>(
    run: RunId,
    items: impl Iterator<Item = Result<T, E>>,
    sender: Sender<Message<T, E>>,
    cancelled: Receiver<()>,
) {
    log::debug!("run {} reader started", run);

    for item in items {
        let (message, last) = match item {
            Ok(item) => (Message::Record(item), false),
            Err(err) => (Message::Failed(err), true),
        };
        if !hand_over(&sender, &cancelled, message) {
            log::debug!("run {} reader cancelled", run);
            return;
        }
        if last {
            return;
        }
    }

    if hand_over(&sender, &cancelled, Message::EndOfRun) {
        log::debug!("run {} reader done", run);
    }
}

/// Blocks until the merger takes the message. Returns `false` if the reader is cancelled or dropped.
fn hand_over<T, E>(sender: &Sender<Message<T, E>>, cancelled: &Receiver<()>, message: Message<T, E>) -> bool {
    crossbeam_channel::select! {
        send(sender, message) -> res => res.is_ok(),
        recv(cancelled) -> _ => false,
    }
}

impl<T, E> Iterator for RunReader<T, E> {
    type Item = Result<T, RunReadError<E>>;

    /// Waits for the next item of the run.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let receiver = self.receiver.as_ref()?;

        let result = match receiver.recv() {
            Ok(Message::Record(item)) => return Some(Ok(item)),
            Ok(Message::EndOfRun) => None,
            Ok(Message::Failed(err)) => Some(Err(RunReadError::Read(self.run, err))),
            Err(_) => Some(Err(RunReadError::Disconnected(self.run))),
        };
        self.finished = true;

        return result;
    }
}

impl<T, E> Drop for RunReader<T, E> {
    fn drop(&mut self) {
        // disconnecting the handoff channel unblocks the producer if it is still waiting
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("run {} reader panicked", self.run);
            }
        }
    }
}

impl<T, E> Debug for RunReader<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunReader")
            .field("run", &self.run)
            .field("finished", &self.finished)
            .finish()
    }
}
