//! # Queries
//!
//! `repose-query` keeps a value shown by a view coherent with a request
//! against a store, where both the request and the store can change at any
//! time. It is the glue between a store's change notifications and Repose's
//! evaluation passes, not a store and not a UI toolkit.
//!
//! The pieces:
//!
//! - `Queryable` — what to fetch. A plain value compared with `PartialEq`;
//!   it knows how to turn itself into a stream given a context.
//! - `Query<Q>` — what a view declares. Holds the last value and error and
//!   the active stream; [`Query::on_evaluate`] runs before each render and
//!   replaces the stream only when the effective request changed.
//! - `RequestConfig` — where the request comes from: `Constant`, `Initial`
//!   (a seed that projection writes supersede) or `Bound` (outside state).
//! - `QueryProjection` — two-way `Binding`s to the request and its fields,
//!   plus the last error, for child views.
//!
//! ## A query in a view
//!
//! ```rust
//! use repose_query::*;
//!
//! #[derive(Clone, PartialEq, Debug)]
//! struct Page { limit: usize }
//!
//! impl Queryable for Page {
//!     type Context = ();
//!     type Value = Vec<usize>;
//!     fn default_value() -> Vec<usize> { Vec::new() }
//!     fn stream(&self, _: &()) -> Result<QueryStream<Vec<usize>>, QueryError> {
//!         Ok(just((0..self.limit).collect()))
//!     }
//! }
//!
//! let scope = Scope::new();
//! let rows = evaluate(&scope, || {
//!     let q = remember_query("page", || Query::initial_unit(Page { limit: 3 }));
//!     q.value()
//! });
//! assert_eq!(rows, vec![0, 1, 2]);
//! ```
//!
//! ## Timing
//!
//! A stream may replay one value synchronously inside `subscribe()`. That
//! value lands during the evaluation pass, so it is stored without an
//! invalidation signal. Every later emission, from whatever thread, is
//! queued on the UI thread and applied by [`dispatch::drain`], which bumps
//! the query's [`Revision`] before storing the value.
//!
//! Errors never escape as panics: the most recent one is readable through
//! `projection().error()` until the next request change clears it.

pub mod binding;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod locals;
pub mod prelude;
pub mod print;
pub mod query;
pub mod request;
pub mod runtime;
pub mod scope;
pub mod signal;
pub mod stream;
mod tests;
mod tracker;

pub use binding::*;
pub use config::*;
pub use error::*;
pub use locals::*;
pub use print::*;
pub use query::*;
pub use request::*;
pub use runtime::*;
pub use scope::*;
pub use signal::*;
pub use stream::*;
