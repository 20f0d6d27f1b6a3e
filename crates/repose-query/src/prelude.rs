pub use crate::binding::Binding;
pub use crate::config::RequestConfig;
pub use crate::dispatch::{drain, set_wakeup};
pub use crate::error::QueryError;
pub use crate::locals::{local, observation_enabled, with_local, with_observation_enabled};
pub use crate::print::{PrintConfig, PrintSink};
pub use crate::query::{Query, QueryProjection, remember_query};
pub use crate::request::{ContextSelector, Queryable};
pub use crate::runtime::{evaluate, is_evaluating, remember_with_key};
pub use crate::scope::Scope;
pub use crate::signal::{Revision, Signal, signal};
pub use crate::stream::{Event, QueryStream, Sink, Subscription, ValueStream, just, stream_fn};
