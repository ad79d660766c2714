//! Change observables
//!
//! An [`Observable`] re-runs its fetch on the read sequence whenever a committed
//! change touches its entity, and pushes the fresh result list to every current
//! subscriber. Subscribing delivers an initial result to the new subscriber.

use crate::context::{Scope, SequenceHandle};
use crate::error::ApiError;
use crate::fetch::RawFetch;
use crate::storable::Storable;
use crate::store::{ChangeListener, Coordinator, StoreChange};
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Callback<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct ObservableInner<T> {
    fetch: RawFetch,
    read: SequenceHandle<Scope>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
    /// Held strongly here; the notifier only keeps a weak reference.
    _listener: Arc<ChangeListener>,
}

impl<T: Storable> ObservableInner<T> {
    fn is_subscribed(&self, id: u64) -> bool {
        self.subscribers.lock().iter().any(|(sid, _)| *sid == id)
    }

    /// Queue a re-query; deliver to `only` or to everyone subscribed at delivery time.
    fn refresh(self: &Arc<Self>, only: Option<u64>) {
        if self.subscribers.lock().is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        let handle = self.read.submit(move |scope: &mut Scope| {
            let outcome = scope
                .fetch(&inner.fetch)
                .map_err(ApiError::from)
                .and_then(|records| {
                    records
                        .iter()
                        .map(|r| T::from_record(r).map_err(ApiError::from))
                        .collect::<Result<Vec<T>, ApiError>>()
                });
            match outcome {
                Ok(objects) => inner.deliver(&objects, only),
                Err(err) => warn!(
                    entity = %inner.fetch.entity,
                    error = %err,
                    "Observation query failed, skipping emission"
                ),
            }
            Ok(())
        });
        drop(handle);
    }

    fn deliver(&self, objects: &[T], only: Option<u64>) {
        let targets: Vec<Callback<T>> = self
            .subscribers
            .lock()
            .iter()
            .filter(|(id, _)| only.map_or(true, |o| o == *id))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in targets {
            callback(objects);
        }
    }
}

/// Query whose results are pushed again after every relevant commit
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Storable> Observable<T> {
    pub(crate) fn new(fetch: RawFetch, read: SequenceHandle<Scope>, coordinator: &Coordinator) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ObservableInner<T>>| {
            let weak = weak.clone();
            let entity = fetch.entity.clone();
            let listener: Arc<ChangeListener> = Arc::new(move |change: &StoreChange| {
                if !change.touches(&entity) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.refresh(None);
                }
            });
            ObservableInner {
                fetch,
                read,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                _listener: listener,
            }
        });
        coordinator.register(&inner._listener);
        Self { inner }
    }

    pub fn fetch(&self) -> &RawFetch {
        &self.inner.fetch
    }

    /// Register `callback`; it receives an initial result, then one per relevant commit.
    ///
    /// Callbacks run on the read sequence thread.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().push((id, Arc::new(callback)));
        debug!(entity = %self.inner.fetch.entity, subscription = id, "Subscribed");
        self.inner.refresh(Some(id));
        Subscription {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl<T: Storable + Clone> Observable<T> {
    /// Results as a stream; dropping the stream ends the subscription.
    pub fn stream(&self) -> ObservationStream<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |objects: &[T]| {
            let _ = sender.send(objects.to_vec());
        });
        ObservationStream {
            receiver,
            _subscription: subscription,
        }
    }
}

/// Active registration with an [`Observable`]
pub struct Subscription<T> {
    id: u64,
    inner: Arc<ObservableInner<T>>,
}

impl<T> Subscription<T> {
    /// Stop future emissions. Dropping the subscription does the same.
    pub fn cancel(self) {}

    pub fn is_active(&self) -> bool
    where
        T: Storable,
    {
        self.inner.is_subscribed(self.id)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.inner.subscribers.lock().retain(|(id, _)| *id != self.id);
        debug!(subscription = self.id, "Subscription cancelled");
    }
}

pub struct ObservationStream<T> {
    receiver: mpsc::UnboundedReceiver<Vec<T>>,
    _subscription: Subscription<T>,
}

impl<T> Unpin for ObservationStream<T> {}

impl<T> Stream for ObservationStream<T> {
    type Item = Vec<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
