use std::rc::Rc;

use crate::{QueryError, QueryStream, local};

/// A value describing what to fetch.
///
/// Requests are compared with `PartialEq` on every evaluation pass; the
/// stream is rebuilt only when the effective request stops comparing equal
/// to the one being observed.
///
/// ```rust
/// use repose_query::*;
///
/// #[derive(Clone, PartialEq, Debug)]
/// struct Greeting { name: String }
///
/// impl Queryable for Greeting {
///     type Context = ();
///     type Value = String;
///
///     fn default_value() -> String { String::new() }
///
///     fn stream(&self, _: &()) -> Result<QueryStream<String>, QueryError> {
///         Ok(just(format!("hello {}", self.name)))
///     }
/// }
/// ```
pub trait Queryable: Clone + PartialEq + 'static {
    /// What the stream needs from the environment (usually a store handle).
    type Context: 'static;
    type Value: Clone + Send + 'static;

    /// Shown until the first value arrives.
    fn default_value() -> Self::Value;

    fn stream(&self, ctx: &Self::Context) -> Result<QueryStream<Self::Value>, QueryError>;
}

/// How a query obtains its context on each reconcile.
pub struct ContextSelector<C> {
    select: Rc<dyn Fn() -> Result<C, QueryError>>,
}

impl<C> Clone for ContextSelector<C> {
    fn clone(&self) -> Self {
        Self {
            select: self.select.clone(),
        }
    }
}

impl<C: 'static> ContextSelector<C> {
    pub fn new(f: impl Fn() -> C + 'static) -> Self {
        Self {
            select: Rc::new(move || Ok(f())),
        }
    }

    pub fn fallible(f: impl Fn() -> Result<C, QueryError> + 'static) -> Self {
        Self { select: Rc::new(f) }
    }

    pub fn value(ctx: C) -> Self
    where
        C: Clone,
    {
        Self::new(move || ctx.clone())
    }

    /// Reads the nearest `C` provided with `with_local`. A missing local is a
    /// construction error of the stream that needed it.
    pub fn local() -> Self
    where
        C: Clone,
    {
        Self::fallible(|| {
            local::<C>().ok_or_else(|| {
                QueryError::construction_msg(format!(
                    "no {} provided to this view",
                    std::any::type_name::<C>()
                ))
            })
        })
    }

    pub fn select(&self) -> Result<C, QueryError> {
        (self.select)()
    }
}

impl ContextSelector<()> {
    pub fn unit() -> Self {
        Self::new(|| ())
    }
}

impl Default for ContextSelector<()> {
    fn default() -> Self {
        Self::unit()
    }
}
