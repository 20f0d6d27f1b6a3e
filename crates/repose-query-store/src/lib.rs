//! In-memory observable table for `repose-query`.
//!
//! `MemoryStore` is a sorted map behind a lock. `observe` turns a row filter
//! into a query stream that replays the matching rows synchronously on
//! subscribe and again after every write, from whichever thread wrote.
//!
//! ```rust
//! use repose_query_store::MemoryStore;
//!
//! let store: MemoryStore<u32, &'static str> = MemoryStore::new();
//! store.insert(1, "one");
//! store.insert(2, "two");
//! assert_eq!(store.get(&2), Some("two"));
//! assert_eq!(store.len(), 2);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use repose_query::{QueryError, QueryStream, Sink, Subscription, stream_fn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::construction(e)
    }
}

type Filter<K, V> = Arc<dyn Fn(&K, &V) -> bool + Send + Sync>;

struct Observer<K, V> {
    filter: Filter<K, V>,
    sink: Sink<Vec<V>>,
}

struct Inner<K, V> {
    rows: BTreeMap<K, V>,
    observers: HashMap<u64, Observer<K, V>>,
    next_observer: u64,
    closed: bool,
}

pub struct MemoryStore<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Clone for MemoryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PartialEq for MemoryStore<K, V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn matching<K, V: Clone>(rows: &BTreeMap<K, V>, filter: &Filter<K, V>) -> Vec<V> {
    rows.iter()
        .filter(|(k, v)| filter(k, v))
        .map(|(_, v)| v.clone())
        .collect()
}

impl<K, V> MemoryStore<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                rows: BTreeMap::new(),
                observers: HashMap::new(),
                next_observer: 0,
                closed: false,
            })),
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let (old, pending) = {
            let mut inner = self.inner.lock();
            let old = inner.rows.insert(key, value);
            (old, Self::pending(&inner))
        };
        Self::deliver(pending);
        old
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let (old, pending) = {
            let mut inner = self.inner.lock();
            let old = inner.rows.remove(key);
            let pending = if old.is_some() { Self::pending(&inner) } else { Vec::new() };
            (old, pending)
        };
        Self::deliver(pending);
        old
    }

    /// Applies `f` to the row under `key`, if present, and notifies.
    pub fn update(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        let pending = {
            let mut inner = self.inner.lock();
            let Some(row) = inner.rows.get_mut(key) else {
                return false;
            };
            f(row);
            Self::pending(&inner)
        };
        Self::deliver(pending);
        true
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().rows.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<V> {
        self.inner.lock().rows.values().cloned().collect()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stream of the rows accepted by `filter`, in key order.
    pub fn observe(
        &self,
        filter: impl Fn(&K, &V) -> bool + Send + Sync + 'static,
    ) -> Result<QueryStream<Vec<V>>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let store = self.clone();
        let filter: Filter<K, V> = Arc::new(filter);
        Ok(stream_fn(move |sink: Sink<Vec<V>>| {
            // sends happen after the lock is released: a sink may wake the
            // UI thread, and the wakeup hook is free to read the store
            let (id, rows) = {
                let mut inner = store.inner.lock();
                if inner.closed {
                    drop(inner);
                    sink.fail(StoreError::Closed.into());
                    return Subscription::empty();
                }
                let rows = matching(&inner.rows, &filter);
                let id = inner.next_observer;
                inner.next_observer += 1;
                inner.observers.insert(
                    id,
                    Observer {
                        filter,
                        sink: sink.clone(),
                    },
                );
                (id, rows)
            };
            sink.send(rows);
            log::trace!("memory store: observer {id} registered");
            Subscription::new(move || {
                store.inner.lock().observers.remove(&id);
                log::trace!("memory store: observer {id} removed");
            })
        }))
    }

    /// Fails every live observation with `err`.
    pub fn fail_observers(&self, err: impl std::error::Error + Send + Sync + 'static) {
        let err = QueryError::delivery(err);
        let observers = std::mem::take(&mut self.inner.lock().observers);
        for (_, o) in observers {
            o.sink.fail(err.clone());
        }
    }

    /// Finishes every observation and rejects new ones.
    pub fn close(&self) {
        let observers = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.observers)
        };
        log::debug!("memory store closed with {} live observers", observers.len());
        for (_, o) in observers {
            o.sink.finish();
        }
    }

    fn pending(inner: &Inner<K, V>) -> Vec<(Sink<Vec<V>>, Vec<V>)> {
        inner
            .observers
            .values()
            .map(|o| (o.sink.clone(), matching(&inner.rows, &o.filter)))
            .collect()
    }

    fn deliver(pending: Vec<(Sink<Vec<V>>, Vec<V>)>) {
        for (sink, rows) in pending {
            sink.send(rows);
        }
    }
}
