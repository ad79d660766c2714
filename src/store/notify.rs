//! Change notification after successful commits

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Published once per committed cascade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub generation: u64,
    pub entities: BTreeSet<String>,
}

impl StoreChange {
    pub fn touches(&self, entity: &str) -> bool {
        self.entities.contains(entity)
    }
}

pub type ChangeListener = dyn Fn(&StoreChange) + Send + Sync;

/// Fans committed changes out to listeners.
///
/// Listeners are held weakly; dropping the last strong reference unregisters.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Mutex<Vec<Weak<ChangeListener>>>,
    generation: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: &Arc<ChangeListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn publish(&self, entities: BTreeSet<String>) {
        if entities.is_empty() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let change = StoreChange {
            generation,
            entities,
        };

        let live: Vec<Arc<ChangeListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        trace!(generation, listeners = live.len(), "Publishing store change");
        for listener in live {
            listener(&change);
        }
    }
}
