use std::fmt::Debug;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::stream::{Event, QueryStream, Sink, Subscription, ValueStream};

/// Where traced stream events go.
#[derive(Clone, Default)]
pub enum PrintSink {
    /// Standard error.
    #[default]
    Stderr,
    /// `log::debug!` under the `repose_query::print` target.
    Log,
    Writer(Arc<Mutex<Box<dyn Write + Send>>>),
    /// Collects lines in memory.
    Lines(Arc<Mutex<Vec<String>>>),
}

impl PrintSink {
    pub fn writer(w: impl Write + Send + 'static) -> Self {
        Self::Writer(Arc::new(Mutex::new(Box::new(w))))
    }

    pub fn lines() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (Self::Lines(lines.clone()), lines)
    }

    fn write_line(&self, line: &str) {
        match self {
            PrintSink::Stderr => eprintln!("{line}"),
            PrintSink::Log => log::debug!(target: "repose_query::print", "{line}"),
            PrintSink::Writer(w) => {
                if let Err(e) = writeln!(w.lock(), "{line}") {
                    log::warn!("print sink write failed: {e}");
                }
            }
            PrintSink::Lines(lines) => lines.lock().push(line.to_owned()),
        }
    }
}

/// Debug tracing applied to a query's stream before it is subscribed.
/// Purely observational.
#[derive(Clone, Default)]
pub struct PrintConfig {
    pub prefix: String,
    pub sink: PrintSink,
}

impl PrintConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sink: PrintSink::default(),
        }
    }

    pub fn sink(mut self, sink: PrintSink) -> Self {
        self.sink = sink;
        self
    }

    fn line(&self, what: std::fmt::Arguments<'_>) {
        if self.prefix.is_empty() {
            self.sink.write_line(&format!("{what}"));
        } else {
            self.sink.write_line(&format!("{}: {what}", self.prefix));
        }
    }

    /// Wraps `stream` so that subscription, values, failure, completion and
    /// cancellation are written to the sink.
    pub fn trace<V>(&self, stream: QueryStream<V>) -> QueryStream<V>
    where
        V: Debug + Send + 'static,
    {
        Box::new(Traced {
            inner: stream,
            config: Arc::new(self.clone()),
        })
    }
}

struct Traced<V> {
    inner: QueryStream<V>,
    config: Arc<PrintConfig>,
}

impl<V: Debug + Send + 'static> ValueStream<V> for Traced<V> {
    fn subscribe(self: Box<Self>, downstream: Sink<V>) -> Subscription {
        let Traced { inner, config } = *self;
        config.line(format_args!("receive subscription"));

        let terminated = Arc::new(AtomicBool::new(false));
        let sink = {
            let config = config.clone();
            let terminated = terminated.clone();
            Sink::new(move |event: Event<V>| {
                match &event {
                    Event::Value(v) => config.line(format_args!("receive value: ({v:?})")),
                    Event::Failed(e) => {
                        terminated.store(true, Ordering::Release);
                        config.line(format_args!("receive error: ({e})"))
                    }
                    Event::Finished => {
                        terminated.store(true, Ordering::Release);
                        config.line(format_args!("receive finished"))
                    }
                }
                downstream.emit(event);
            })
        };

        inner.subscribe(sink).and_then(move || {
            if !terminated.load(Ordering::Acquire) {
                config.line(format_args!("receive cancel"));
            }
        })
    }
}
