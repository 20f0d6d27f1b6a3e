//! Store-facing half of the binding layer: the stream contract a backing
//! store implements and the sink it emits into.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::QueryError;

/// One notification from a query stream.
#[derive(Clone, Debug)]
pub enum Event<V> {
    Value(V),
    Failed(QueryError),
    Finished,
}

impl<V> Event<V> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Value(_))
    }
}

/// Emission handle given to a stream on subscribe.
///
/// Cloneable and `Send`, so stores can emit from whichever thread runs their
/// change notifications. Once the stream fails or finishes, later emissions
/// are dropped.
pub struct Sink<V> {
    emit: Arc<dyn Fn(Event<V>) + Send + Sync>,
    closed: Arc<AtomicBool>,
}

impl<V> Clone for Sink<V> {
    fn clone(&self) -> Self {
        Self {
            emit: self.emit.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<V: Send + 'static> Sink<V> {
    pub fn new(emit: impl Fn(Event<V>) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn emit(&self, event: Event<V>) {
        if event.is_terminal() {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        } else if self.closed.load(Ordering::Acquire) {
            return;
        }
        (self.emit)(event)
    }

    pub fn send(&self, value: V) {
        self.emit(Event::Value(value))
    }

    pub fn fail(&self, err: QueryError) {
        self.emit(Event::Failed(err))
    }

    pub fn finish(&self) {
        self.emit(Event::Finished)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cancels the subscription it was returned for when dropped. Runs at most
/// once.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription(Option<Box<dyn FnOnce()>>);

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }

    /// A subscription with nothing to tear down (one-shot streams).
    pub fn empty() -> Self {
        Self(None)
    }

    /// Chains an extra teardown step that runs after the original one.
    pub fn and_then(mut self, after: impl FnOnce() + 'static) -> Self {
        let first = self.0.take();
        Self::new(move || {
            if let Some(f) = first {
                f();
            }
            after();
        })
    }

    fn run(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Subscription")
            .field(&self.0.is_some())
            .finish()
    }
}

/// A not-yet-subscribed stream of values.
///
/// `subscribe` may emit once synchronously before returning; everything
/// else arrives later, from any thread.
pub trait ValueStream<V> {
    fn subscribe(self: Box<Self>, sink: Sink<V>) -> Subscription;
}

pub type QueryStream<V> = Box<dyn ValueStream<V>>;

struct FnStream<F>(F);

impl<V, F> ValueStream<V> for FnStream<F>
where
    F: FnOnce(Sink<V>) -> Subscription,
{
    fn subscribe(self: Box<Self>, sink: Sink<V>) -> Subscription {
        (self.0)(sink)
    }
}

/// Builds a stream from its subscribe function.
pub fn stream_fn<V, F>(f: F) -> QueryStream<V>
where
    V: 'static,
    F: FnOnce(Sink<V>) -> Subscription + 'static,
{
    Box::new(FnStream(f))
}

/// Stream that emits `value` synchronously and finishes.
pub fn just<V: Send + 'static>(value: V) -> QueryStream<V> {
    stream_fn(move |sink: Sink<V>| {
        sink.send(value);
        sink.finish();
        Subscription::empty()
    })
}
