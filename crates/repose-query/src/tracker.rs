//! Subscription tracker: the state behind one `Query`.
//!
//! Holds the last value, the last error, the request override and the
//! active stream, and decides on every reconcile whether the stream has to
//! be replaced. All fields are touched on the owning UI thread only;
//! emissions from other threads come in through `dispatch::drain`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::dispatch::{self, Deliver, SubscribeWindow, TrackerKey};
use crate::stream::{Event, QueryStream, Sink, Subscription};
use crate::{ContextSelector, QueryError, Queryable, RequestConfig, Revision};

pub(crate) type StreamDecorator<V> = Rc<dyn Fn(QueryStream<V>) -> QueryStream<V>>;

struct State<Q: Queryable> {
    last_value: Option<Q::Value>,
    last_error: Option<QueryError>,
    override_request: Option<Q>,
    tracked_request: Option<Q>,
    active: Option<Subscription>,
    // Bumped whenever `active` is replaced or dropped.
    generation: u64,
}

pub(crate) struct Tracker<Q: Queryable> {
    key: TrackerKey,
    revision: Revision,
    state: RefCell<State<Q>>,
}

impl<Q: Queryable> Tracker<Q> {
    pub(crate) fn new(revision: Revision) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let deliver: Weak<dyn Deliver> = weak.clone();
            Tracker {
                key: dispatch::register(deliver),
                revision,
                state: RefCell::new(State {
                    last_value: None,
                    last_error: None,
                    override_request: None,
                    tracked_request: None,
                    active: None,
                    generation: 0,
                }),
            }
        })
    }

    pub(crate) fn effective_request(&self, config: &RequestConfig<Q>) -> Q {
        match config {
            RequestConfig::Constant(r) => r.clone(),
            RequestConfig::Initial(seed) => self
                .state
                .borrow()
                .override_request
                .clone()
                .unwrap_or_else(|| seed.clone()),
            RequestConfig::Bound(b) => b.get(),
        }
    }

    /// Brings the active stream in line with the effective request.
    /// Idempotent while the effective request stays equal.
    pub(crate) fn reconcile(
        &self,
        observation_enabled: bool,
        config: &RequestConfig<Q>,
        context: &ContextSelector<Q::Context>,
        decorate: Option<&StreamDecorator<Q::Value>>,
    ) {
        if !observation_enabled {
            self.stop();
            return;
        }

        let effective = self.effective_request(config);
        let (previous, generation) = {
            let mut st = self.state.borrow_mut();
            if st.tracked_request.as_ref() == Some(&effective) {
                return;
            }
            st.generation += 1;
            st.tracked_request = Some(effective.clone());
            st.override_request = Some(effective.clone());
            st.last_error = None;
            (st.active.take(), st.generation)
        };
        if previous.is_some() {
            log::debug!("query {:?}: request changed, cancelling previous stream", self.key);
        }
        // Cancelled before the replacement exists.
        drop(previous);

        let stream = match context.select().and_then(|ctx| effective.stream(&ctx)) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("query {:?}: {err}", self.key);
                self.state.borrow_mut().last_error = Some(err);
                return;
            }
        };
        let stream = match decorate {
            Some(d) => d(stream),
            None => stream,
        };

        let window = Arc::new(SubscribeWindow::open());
        let sink = {
            let window = window.clone();
            let queue = dispatch::main_queue();
            let key = self.key;
            Sink::new(move |event: Event<Q::Value>| {
                if let Some(event) = window.capture(event) {
                    queue.post(key, generation, Box::new(event));
                }
            })
        };
        log::debug!("query {:?}: subscribing (generation {generation})", self.key);
        let subscription = stream.subscribe(sink);
        let replay = window.close();

        let mut st = self.state.borrow_mut();
        if st.generation != generation {
            // Reconciled again from inside subscribe(); this stream is stale.
            drop(st);
            drop(subscription);
            return;
        }
        st.active = Some(subscription);
        for event in replay {
            // Same evaluation pass: mutate without signalling.
            Self::apply(&mut st, event);
        }
    }

    /// Cancels the active stream and forgets the tracked request. Value,
    /// error and override are kept.
    pub(crate) fn stop(&self) {
        let cancelled = {
            let mut st = self.state.borrow_mut();
            st.tracked_request = None;
            st.generation += 1;
            st.active.take()
        };
        if cancelled.is_some() {
            log::debug!("query {:?}: observation stopped", self.key);
        }
        drop(cancelled);
    }

    /// Stops observing and leaves the dispatch registry. Queued emissions
    /// for this tracker are dropped on the next drain.
    pub(crate) fn release(&self) {
        self.stop();
        dispatch::unregister(self.key);
    }

    fn apply(st: &mut State<Q>, event: Event<Q::Value>) {
        match event {
            Event::Value(v) => st.last_value = Some(v),
            Event::Failed(e) => st.last_error = Some(e),
            Event::Finished => {}
        }
    }

    pub(crate) fn current_value(&self, default: impl FnOnce() -> Q::Value) -> Q::Value {
        self.state
            .borrow()
            .last_value
            .clone()
            .unwrap_or_else(default)
    }

    pub(crate) fn current_error(&self) -> Option<QueryError> {
        self.state.borrow().last_error.clone()
    }

    pub(crate) fn override_request(&self) -> Option<Q> {
        self.state.borrow().override_request.clone()
    }

    /// Records an explicit request change and asks for a re-render so the
    /// next evaluation pass picks it up.
    pub(crate) fn set_override(&self, request: Q) {
        self.state.borrow_mut().override_request = Some(request);
        self.invalidate();
    }

    pub(crate) fn invalidate(&self) {
        self.revision.bump();
    }

    pub(crate) fn tracked_request(&self) -> Option<Q> {
        self.state.borrow().tracked_request.clone()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.borrow().active.is_some()
    }
}

impl<Q: Queryable> Deliver for Tracker<Q> {
    fn deliver(&self, generation: u64, event: Box<dyn Any + Send>) {
        let event = match event.downcast::<Event<Q::Value>>() {
            Ok(event) => *event,
            Err(_) => {
                log::error!("query {:?}: emission of unexpected type dropped", self.key);
                return;
            }
        };
        if self.state.borrow().generation != generation {
            log::trace!("query {:?}: stale emission from generation {generation}", self.key);
            return;
        }
        if let Event::Finished = event {
            log::debug!("query {:?}: stream finished", self.key);
            return;
        }
        // Outside the evaluation pass: signal first, then mutate.
        self.invalidate();
        let mut st = self.state.borrow_mut();
        if st.generation == generation {
            Self::apply(&mut st, event);
        }
    }
}

impl<Q: Queryable> Drop for Tracker<Q> {
    fn drop(&mut self) {
        dispatch::unregister(self.key);
    }
}
