use std::error::Error as StdError;
use std::sync::Arc;

type Source = Arc<dyn StdError + Send + Sync + 'static>;

/// Failure surfaced through `Query::projection().error()`.
///
/// Errors never cross the UI boundary as panics or `Result`s: the tracker
/// keeps the most recent one and views decide how to render it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum QueryError {
    /// The request could not be turned into a stream (bad query, store gone).
    #[error("failed to build query stream: {0}")]
    Construction(Source),
    /// The stream was built but later signalled failure.
    #[error("query stream failed: {0}")]
    Delivery(Source),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl QueryError {
    pub fn construction(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Construction(Arc::new(err))
    }

    pub fn delivery(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Delivery(Arc::new(err))
    }

    pub fn construction_msg(msg: impl Into<String>) -> Self {
        Self::Construction(Arc::new(Message(msg.into())))
    }

    pub fn delivery_msg(msg: impl Into<String>) -> Self {
        Self::Delivery(Arc::new(Message(msg.into())))
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, Self::Construction(_))
    }

    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery(_))
    }

    /// The underlying store error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        match self {
            Self::Construction(e) | Self::Delivery(e) => e.as_ref(),
        }
    }
}
