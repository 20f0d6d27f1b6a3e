use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use crate::tracker::{StreamDecorator, Tracker};
use crate::{
    Binding, ContextSelector, PrintConfig, QueryError, QueryStream, Queryable, RequestConfig,
    Revision, observation_enabled, remember_with_key,
};

struct Shared<Q: Queryable> {
    tracker: Rc<Tracker<Q>>,
    config: RequestConfig<Q>,
    context: ContextSelector<Q::Context>,
    decorate: RefCell<Option<StreamDecorator<Q::Value>>>,
    revision: Revision,
}

/// A view's live binding to a request against a store.
///
/// Call [`Query::on_evaluate`] before every render of the owning view (or
/// use [`remember_query`], which does it for you) and read [`Query::value`].
/// The stream is rebuilt only when the effective request changes.
///
/// ```rust
/// use repose_query::*;
///
/// #[derive(Clone, PartialEq, Debug)]
/// struct Answer;
///
/// impl Queryable for Answer {
///     type Context = ();
///     type Value = u32;
///     fn default_value() -> u32 { 0 }
///     fn stream(&self, _: &()) -> Result<QueryStream<u32>, QueryError> {
///         Ok(just(42))
///     }
/// }
///
/// let q = Query::constant_unit(Answer);
/// assert_eq!(q.value(), 0);
/// q.on_evaluate();
/// assert_eq!(q.value(), 42);
/// ```
pub struct Query<Q: Queryable> {
    shared: Rc<Shared<Q>>,
}

impl<Q: Queryable> Query<Q> {
    pub fn new(config: RequestConfig<Q>, context: ContextSelector<Q::Context>) -> Self {
        let revision = Revision::new();
        Self {
            shared: Rc::new(Shared {
                tracker: Tracker::new(revision.clone()),
                config,
                context,
                decorate: RefCell::new(None),
                revision,
            }),
        }
    }

    /// Observes `request` for the query's whole lifetime.
    pub fn constant(request: Q, context: ContextSelector<Q::Context>) -> Self {
        Self::new(RequestConfig::Constant(request), context)
    }

    /// Starts from `request`; projection writes replace it.
    pub fn initial(request: Q, context: ContextSelector<Q::Context>) -> Self {
        Self::new(RequestConfig::Initial(request), context)
    }

    /// Follows `binding`, re-reading it on every evaluation pass.
    pub fn bound(binding: Binding<Q>, context: ContextSelector<Q::Context>) -> Self {
        Self::new(RequestConfig::Bound(binding), context)
    }

    /// Traces the stream's events to `config.sink` before subscribing.
    pub fn with_print(self, config: PrintConfig) -> Self
    where
        Q::Value: Debug,
    {
        let decorate: StreamDecorator<Q::Value> =
            Rc::new(move |stream: QueryStream<Q::Value>| config.trace(stream));
        *self.shared.decorate.borrow_mut() = Some(decorate);
        self
    }

    /// Hook for the host, run before each render of the owning view.
    pub fn on_evaluate(&self) {
        let s = &self.shared;
        let decorate = s.decorate.borrow().clone();
        s.tracker
            .reconcile(observation_enabled(), &s.config, &s.context, decorate.as_ref());
    }

    /// Last delivered value, or `Q::default_value()` before the first one.
    pub fn value(&self) -> Q::Value {
        self.shared.tracker.current_value(Q::default_value)
    }

    pub fn projection(&self) -> QueryProjection<Q> {
        QueryProjection {
            shared: self.shared.clone(),
        }
    }

    /// Moves whenever the view should be rendered again.
    pub fn revision(&self) -> &Revision {
        &self.shared.revision
    }

    /// The request the active stream was built from, if observing.
    pub fn tracked_request(&self) -> Option<Q> {
        self.shared.tracker.tracked_request()
    }

    pub fn is_observing(&self) -> bool {
        self.shared.tracker.is_active()
    }
}

impl<Q: Queryable<Context = ()>> Query<Q> {
    pub fn constant_unit(request: Q) -> Self {
        Self::constant(request, ContextSelector::unit())
    }

    pub fn initial_unit(request: Q) -> Self {
        Self::initial(request, ContextSelector::unit())
    }

    pub fn bound_unit(binding: Binding<Q>) -> Self {
        Self::bound(binding, ContextSelector::unit())
    }
}

impl<Q: Queryable> Drop for Query<Q> {
    fn drop(&mut self) {
        // Projections may outlive the view; the stream and the registry
        // entry must not.
        self.shared.tracker.release();
    }
}

/// Two-way access to a query's request, handed to child views.
pub struct QueryProjection<Q: Queryable> {
    shared: Rc<Shared<Q>>,
}

impl<Q: Queryable> Clone for QueryProjection<Q> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<Q: Queryable> QueryProjection<Q> {
    /// Binding to the effective request. Writes to a constant query are
    /// ignored.
    pub fn request(&self) -> Binding<Q> {
        let read = self.shared.clone();
        let write = self.shared.clone();
        Binding::new(
            move || read.tracker.effective_request(&read.config),
            move |request| match &write.config {
                RequestConfig::Constant(_) => {
                    log::debug!("ignoring request write on a constant query");
                }
                RequestConfig::Initial(_) => write.tracker.set_override(request),
                RequestConfig::Bound(binding) => {
                    binding.set(request);
                    write.tracker.invalidate();
                }
            },
        )
    }

    /// Binding to one field of the request.
    ///
    /// ```rust,ignore
    /// let limit = query.projection().field(|r| r.limit, |r, v| r.limit = v);
    /// limit.set(20);
    /// ```
    pub fn field<F: 'static>(
        &self,
        get: impl Fn(&Q) -> F + 'static,
        set: impl Fn(&mut Q, F) + 'static,
    ) -> Binding<F> {
        self.request().field(get, set)
    }

    pub fn error(&self) -> Option<QueryError> {
        self.shared.tracker.current_error()
    }

    /// The recorded override of an `Initial` query.
    pub fn override_request(&self) -> Option<Q> {
        match self.shared.config {
            RequestConfig::Initial(_) => self.shared.tracker.override_request(),
            _ => None,
        }
    }
}

/// Key-based remembered query for the current scope: created on first use,
/// reconciled on every call, released with the scope.
pub fn remember_query<Q: Queryable>(
    key: impl Into<String>,
    init: impl FnOnce() -> Query<Q>,
) -> Rc<Query<Q>> {
    let key = key.into();
    let query = remember_with_key(format!("query:{key}"), init);
    query.on_evaluate();
    query
}
