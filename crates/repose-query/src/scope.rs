use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Weak<ScopeInner>>> = const { RefCell::new(None) };
}

/// Lifetime of a UI element. Values remembered inside a scope (queries
/// included) live exactly as long as it does; disposing the scope drops them,
/// which cancels their streams.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

#[derive(Default)]
struct ScopeInner {
    slots: RefCell<HashMap<String, Rc<dyn Any>>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner::default()),
        }
    }

    /// Runs `f` with this scope installed as the current one.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore(Option<Weak<ScopeInner>>);
        impl Drop for Restore {
            fn drop(&mut self) {
                let prev = self.0.take();
                CURRENT_SCOPE.with(|c| *c.borrow_mut() = prev);
            }
        }
        let prev = CURRENT_SCOPE.with(|c| c.replace(Some(Rc::downgrade(&self.inner))));
        let _restore = Restore(prev);
        f()
    }

    /// Looks up or creates the value stored under `key`. A slot whose type
    /// changed is replaced.
    pub fn slot<T: 'static>(&self, key: &str, init: impl FnOnce() -> T) -> Rc<T> {
        if let Some(existing) = self.inner.slots.borrow().get(key) {
            match existing.clone().downcast::<T>() {
                Ok(rc) => return rc,
                Err(_) => log::warn!("scope slot '{key}' reused with a different type; replacing"),
            }
        }
        let rc = Rc::new(init());
        self.inner
            .slots
            .borrow_mut()
            .insert(key.to_owned(), rc.clone() as Rc<dyn Any>);
        rc
    }

    /// Drops every remembered value now rather than with the last handle.
    pub fn dispose(self) {
        self.inner.teardown();
    }
}

impl ScopeInner {
    fn teardown(&self) {
        // Dropped outside the borrow: a slot's Drop may touch this scope.
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        drop(slots);
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub fn current_scope() -> Option<Scope> {
    CURRENT_SCOPE.with(|current| {
        current
            .borrow()
            .as_ref()
            .and_then(|weak| weak.upgrade().map(|inner| Scope { inner }))
    })
}
