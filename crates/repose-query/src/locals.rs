//! # Ambient locals
//!
//! Queries read two kinds of ambient values from the composition:
//!
//! - `ObservationEnabled` — whether queries below this point keep their
//!   streams alive. Defaults to `true`; an ancestor can switch it off for a
//!   whole subtree (for example while it is off-screen).
//! - arbitrary typed values installed with `with_local`, typically the store
//!   handle a query's context selector reads.
//!
//! ```rust
//! use repose_query::*;
//!
//! #[derive(Clone)]
//! struct Db(&'static str);
//!
//! with_local(Db("main"), || {
//!     assert_eq!(local::<Db>().map(|d| d.0), Some("main"));
//!     with_observation_enabled(false, || assert!(!observation_enabled()));
//! });
//! assert!(observation_enabled());
//! ```

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    static LOCALS_STACK: RefCell<Vec<HashMap<TypeId, Box<dyn Any>>>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObservationEnabled(pub bool);

impl Default for ObservationEnabled {
    fn default() -> Self {
        Self(true)
    }
}

fn with_locals_frame<R>(f: impl FnOnce() -> R) -> R {
    // pops on unwind too
    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            LOCALS_STACK.with(|st| {
                st.borrow_mut().pop();
            });
        }
    }
    LOCALS_STACK.with(|st| st.borrow_mut().push(HashMap::new()));
    let _guard = Guard;
    f()
}

fn set_local_boxed(t: TypeId, v: Box<dyn Any>) {
    LOCALS_STACK.with(|st| {
        if let Some(top) = st.borrow_mut().last_mut() {
            top.insert(t, v);
        }
    });
}

/// Provides `value` to everything evaluated inside `f`.
pub fn with_local<T: Clone + 'static, R>(value: T, f: impl FnOnce() -> R) -> R {
    with_locals_frame(|| {
        set_local_boxed(TypeId::of::<T>(), Box::new(value));
        f()
    })
}

/// Nearest provided value of type `T`, if any.
pub fn local<T: Clone + 'static>() -> Option<T> {
    LOCALS_STACK.with(|st| {
        st.borrow()
            .iter()
            .rev()
            .find_map(|frame| frame.get(&TypeId::of::<T>()))
            .and_then(|v| v.downcast_ref::<T>().cloned())
    })
}

pub fn local_or_default<T: Clone + Default + 'static>() -> T {
    local::<T>().unwrap_or_default()
}

pub fn with_observation_enabled<R>(enabled: bool, f: impl FnOnce() -> R) -> R {
    with_local(ObservationEnabled(enabled), f)
}

pub fn observation_enabled() -> bool {
    local_or_default::<ObservationEnabled>().0
}
