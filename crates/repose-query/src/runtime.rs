use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::scope::{Scope, current_scope};

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static DETACHED: RefCell<HashMap<String, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Marks the extent of an evaluation pass on this thread. Invalidation
/// signals must not fire while one is alive.
pub struct EvaluationGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl EvaluationGuard {
    pub fn begin() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

pub fn is_evaluating() -> bool {
    DEPTH.with(|d| d.get() > 0)
}

/// Runs one evaluation pass of the view owned by `scope`.
///
/// The host calls this before every render; `remember_query` calls made
/// inside resolve against `scope`.
pub fn evaluate<R>(scope: &Scope, build: impl FnOnce() -> R) -> R {
    let _guard = EvaluationGuard::begin();
    scope.run(build)
}

/// Key-based remember. Inside a scope the value lives as long as the scope;
/// outside one it is parked in a thread-local table until `forget_detached`.
pub fn remember_with_key<T: 'static>(key: impl Into<String>, init: impl FnOnce() -> T) -> Rc<T> {
    let key = key.into();
    if let Some(scope) = current_scope() {
        return scope.slot(&key, init);
    }

    log::debug!("remember_with_key('{key}') outside of a scope; storing detached");
    let existing = DETACHED.with(|d| d.borrow().get(&key).cloned());
    if let Some(existing) = existing {
        match existing.downcast::<T>() {
            Ok(rc) => return rc,
            Err(_) => log::warn!("remember_with_key: key '{key}' reused with a different type; replacing"),
        }
    }
    let rc = Rc::new(init());
    DETACHED.with(|d| d.borrow_mut().insert(key, rc.clone() as Rc<dyn Any>));
    rc
}

pub fn forget_detached(key: &str) -> bool {
    let removed = DETACHED.with(|d| d.borrow_mut().remove(key));
    removed.is_some()
}
