use std::cell::RefCell;
use std::rc::Rc;

use slotmap::{DefaultKey, SlotMap};

pub type SubId = DefaultKey;

/// Observable UI-thread value. Subscribers get a snapshot taken after the
/// write has landed and run with no borrow held, so they may read or write
/// the signal again.
pub struct Signal<T: 'static>(Rc<RefCell<Inner<T>>>);

struct Inner<T> {
    value: T,
    subs: SlotMap<SubId, Rc<dyn Fn(&T)>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(Inner {
            value,
            subs: SlotMap::new(),
        })))
    }

    pub fn get(&self) -> T {
        self.0.borrow().value.clone()
    }

    pub fn set(&self, v: T) {
        self.0.borrow_mut().value = v;
        self.notify();
    }

    pub fn update<F: FnOnce(&mut T)>(&self, f: F) {
        f(&mut self.0.borrow_mut().value);
        self.notify();
    }

    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> SubId {
        self.0.borrow_mut().subs.insert(Rc::new(f))
    }

    pub fn unsubscribe(&self, id: SubId) -> bool {
        self.0.borrow_mut().subs.remove(id).is_some()
    }

    fn notify(&self) {
        let (value, subs): (T, Vec<_>) = {
            let inner = self.0.borrow();
            (inner.value.clone(), inner.subs.values().cloned().collect())
        };
        for s in subs {
            s(&value);
        }
    }
}

pub fn signal<T: Clone>(t: T) -> Signal<T> {
    Signal::new(t)
}

/// Monotonic counter used as an invalidation signal. Hosts subscribe to it
/// and schedule a re-render whenever it moves.
#[derive(Clone)]
pub struct Revision(Signal<u64>);

impl Default for Revision {
    fn default() -> Self {
        Self::new()
    }
}

impl Revision {
    pub fn new() -> Self {
        Self(signal(0))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }

    pub fn bump(&self) {
        if crate::runtime::is_evaluating() {
            log::warn!(
                "invalidation signalled while an evaluation pass is running; \
                 the host may ignore or re-enter"
            );
        }
        self.0.update(|v| *v = v.wrapping_add(1));
    }

    pub fn subscribe(&self, f: impl Fn(u64) + 'static) -> SubId {
        self.0.subscribe(move |v| f(*v))
    }
}
