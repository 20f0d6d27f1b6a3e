use crate::Binding;

/// Where a query's effective request comes from on each evaluation pass.
pub enum RequestConfig<Q> {
    /// Fixed for the query's lifetime; projection writes are ignored.
    Constant(Q),
    /// Seed value, superseded for good by the first projection write.
    Initial(Q),
    /// Owned by outside code; projection writes go through to it.
    Bound(Binding<Q>),
}

impl<Q: Clone> Clone for RequestConfig<Q> {
    fn clone(&self) -> Self {
        match self {
            RequestConfig::Constant(q) => RequestConfig::Constant(q.clone()),
            RequestConfig::Initial(q) => RequestConfig::Initial(q.clone()),
            RequestConfig::Bound(b) => RequestConfig::Bound(b.clone()),
        }
    }
}
