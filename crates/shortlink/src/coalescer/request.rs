//! Requests queued for the read workers.

use crate::Result;
use tokio::sync::oneshot;

/// Outcome delivered to every caller of one coalesced lookup.
pub(crate) type LookupOutcome = Result<Option<String>>;

/// Completion half handed to the read workers.
pub(crate) type Waiter = oneshot::Sender<LookupOutcome>;

/// A resolution that missed the cache and waits for a read worker.
#[derive(Debug)]
pub(crate) struct PendingRead {
    pub(crate) id: String,
    pub(crate) completion: Waiter,
}

impl PendingRead {
    pub(crate) fn new(id: String) -> (Self, oneshot::Receiver<LookupOutcome>) {
        let (completion, rx) = oneshot::channel();
        (Self { id, completion }, rx)
    }
}
