//! Serial execution sequences
//!
//! Each sequence owns one piece of state on a dedicated named thread and runs
//! submitted units against it strictly in submission order. Results come back
//! through an [`OperationHandle`], which is a future and can also be waited on.

use crate::error::ApiError;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run(Job<S>),
    Shutdown,
}

/// Submission side of a sequence; cheap to clone.
pub struct SequenceHandle<S> {
    label: &'static str,
    sender: mpsc::UnboundedSender<Message<S>>,
}

impl<S> Clone for SequenceHandle<S> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            sender: self.sender.clone(),
        }
    }
}

impl<S: 'static> SequenceHandle<S> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Queue `work` behind everything already submitted.
    pub fn submit<R, F>(&self, work: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> Result<R, ApiError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |state: &mut S| {
            let _ = tx.send(work(state));
        });
        match self.sender.send(Message::Run(job)) {
            Ok(()) => OperationHandle::pending(self.label, rx),
            Err(_) => OperationHandle::failed(ApiError::Closed(self.label)),
        }
    }
}

/// A worker thread and the state it owns
pub struct Sequence<S> {
    handle: SequenceHandle<S>,
    worker: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> Sequence<S> {
    pub fn spawn(label: &'static str, mut state: S) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message<S>>();
        let worker = thread::Builder::new()
            .name(format!("tierstore-{}", label))
            .spawn(move || {
                debug!(sequence = label, "Sequence started");
                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        Message::Run(job) => {
                            let outcome =
                                panic::catch_unwind(AssertUnwindSafe(|| job(&mut state)));
                            if outcome.is_err() {
                                error!(sequence = label, "Sequence unit panicked");
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
                debug!(sequence = label, "Sequence stopped");
            })?;

        Ok(Self {
            handle: SequenceHandle { label, sender },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> SequenceHandle<S> {
        self.handle.clone()
    }

    pub fn submit<R, F>(&self, work: F) -> OperationHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> Result<R, ApiError> + Send + 'static,
    {
        self.handle.submit(work)
    }
}

impl<S> Drop for Sequence<S> {
    fn drop(&mut self) {
        let _ = self.handle.sender.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

enum HandleState<T> {
    Ready(Option<Result<T, ApiError>>),
    Pending(oneshot::Receiver<Result<T, ApiError>>),
}

/// Result of one submitted operation, delivered exactly once.
///
/// Await it from async code or call [`OperationHandle::wait`] from a plain thread.
/// Dropping the handle discards the result; the work still runs.
pub struct OperationHandle<T> {
    label: &'static str,
    state: HandleState<T>,
}

impl<T> OperationHandle<T> {
    fn pending(label: &'static str, receiver: oneshot::Receiver<Result<T, ApiError>>) -> Self {
        Self {
            label,
            state: HandleState::Pending(receiver),
        }
    }

    /// A handle that has already failed
    pub fn failed(err: ApiError) -> Self {
        Self {
            label: "none",
            state: HandleState::Ready(Some(Err(err))),
        }
    }

    /// Block the current thread until the result arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<T, ApiError> {
        let label = self.label;
        match self.state {
            HandleState::Ready(Some(result)) => result,
            HandleState::Ready(None) => Err(ApiError::Closed(label)),
            HandleState::Pending(receiver) => receiver
                .blocking_recv()
                .unwrap_or(Err(ApiError::Closed(label))),
        }
    }
}

impl<T> Unpin for OperationHandle<T> {}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T, ApiError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let label = this.label;
        match &mut this.state {
            HandleState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(ApiError::Closed(label))))
            }
            HandleState::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(ApiError::Closed(label))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
