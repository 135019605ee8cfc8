use std::time::Duration;
use tokio::time::Instant;

/// Per-request information carried through a read or write.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub transaction_id: String,
    /// When set, the operation reports a timeout once this instant passes.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
