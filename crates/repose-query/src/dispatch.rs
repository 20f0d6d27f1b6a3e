//! Marshals stream emissions onto the UI thread.
//!
//! Stores may notify from any thread. Every emission that is not the
//! synchronous replay inside `subscribe()` is wrapped in an envelope and
//! queued on the owning thread's `MainQueue`; the host calls [`drain`] once
//! per tick and the envelopes are routed to their trackers there. Envelopes
//! tagged with an outdated generation are dropped, so nothing from a
//! replaced stream lands after its replacement was subscribed.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Weak;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::stream::Event;

new_key_type! {
    /// Registry handle of a live tracker.
    pub struct TrackerKey;
}

pub(crate) trait Deliver {
    fn deliver(&self, generation: u64, event: Box<dyn Any + Send>);
}

struct Envelope {
    key: TrackerKey,
    generation: u64,
    event: Box<dyn Any + Send>,
}

type Wakeup = Arc<dyn Fn() + Send + Sync>;

struct QueueInner {
    pending: Mutex<VecDeque<Envelope>>,
    wakeup: Mutex<Option<Wakeup>>,
}

/// Cross-thread handle to one UI thread's pending emissions.
#[derive(Clone)]
pub struct MainQueue {
    inner: Arc<QueueInner>,
}

impl MainQueue {
    fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(VecDeque::new()),
                wakeup: Mutex::new(None),
            }),
        }
    }

    fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub(crate) fn post(&self, key: TrackerKey, generation: u64, event: Box<dyn Any + Send>) {
        self.inner.pending.lock().push_back(Envelope {
            key,
            generation,
            event,
        });
        let wakeup = self.inner.wakeup.lock().clone();
        if let Some(wake) = wakeup {
            wake();
        }
    }

    fn pop(&self) -> Option<Envelope> {
        self.inner.pending.lock().pop_front()
    }
}

thread_local! {
    static QUEUE: MainQueue = MainQueue::new();
    static REGISTRY: RefCell<SlotMap<TrackerKey, Weak<dyn Deliver>>> = RefCell::new(SlotMap::with_key());
}

/// The calling thread's queue.
pub fn main_queue() -> MainQueue {
    QUEUE.with(|q| q.clone())
}

/// Installs a hook run (on the posting thread) whenever an emission is
/// queued for this thread, e.g. to request a frame from the event loop.
pub fn set_wakeup(wake: impl Fn() + Send + Sync + 'static) {
    QUEUE.with(|q| *q.inner.wakeup.lock() = Some(Arc::new(wake)));
}

pub fn clear_wakeup() {
    QUEUE.with(|q| *q.inner.wakeup.lock() = None);
}

pub fn pending() -> usize {
    QUEUE.with(|q| q.len())
}

/// Routes every queued emission to its tracker. Returns how many were
/// handed to a live tracker (stale ones included; the tracker discards
/// those itself).
pub fn drain() -> usize {
    let queue = main_queue();
    let mut routed = 0;
    while let Some(env) = queue.pop() {
        let target = REGISTRY.with(|r| r.borrow().get(env.key).cloned());
        match target.and_then(|w| w.upgrade()) {
            Some(tracker) => {
                tracker.deliver(env.generation, env.event);
                routed += 1;
            }
            None => log::trace!("dropping emission for released tracker {:?}", env.key),
        }
    }
    routed
}

pub(crate) fn register(tracker: Weak<dyn Deliver>) -> TrackerKey {
    REGISTRY.with(|r| r.borrow_mut().insert(tracker))
}

pub(crate) fn unregister(key: TrackerKey) {
    // try_with: trackers dropped during thread teardown
    let _ = REGISTRY.try_with(|r| {
        if let Ok(mut r) = r.try_borrow_mut() {
            r.remove(key);
        }
    });
}

pub fn live_trackers() -> usize {
    REGISTRY.with(|r| r.borrow().len())
}

/// Synchronous extent of one `subscribe()` call. Emissions made on the
/// owning thread while it is open are buffered and handed back on close
/// instead of being queued.
pub(crate) struct SubscribeWindow<V> {
    owner: ThreadId,
    buffered: Mutex<Option<SmallVec<[Event<V>; 1]>>>,
}

impl<V: Send + 'static> SubscribeWindow<V> {
    pub(crate) fn open() -> Self {
        Self {
            owner: thread::current().id(),
            buffered: Mutex::new(Some(SmallVec::new())),
        }
    }

    /// Buffers `event` if the window is open and we are on its thread;
    /// otherwise gives it back.
    pub(crate) fn capture(&self, event: Event<V>) -> Option<Event<V>> {
        if thread::current().id() != self.owner {
            return Some(event);
        }
        let mut buffered = self.buffered.lock();
        match buffered.as_mut() {
            Some(buf) => {
                buf.push(event);
                None
            }
            None => Some(event),
        }
    }

    pub(crate) fn close(&self) -> SmallVec<[Event<V>; 1]> {
        self.buffered.lock().take().unwrap_or_default()
    }
}
