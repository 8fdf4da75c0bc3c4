//! Requests queued for the write workers.

use crate::{Result, ShortId};
use tokio::sync::oneshot;

/// A create request waiting to be persisted.
///
/// Owned by the submitting caller until it is queued, then by exactly one
/// worker's batch buffer. Completing it consumes it, so its completion fires
/// at most once; dropping it without completing (a panicking worker) wakes the
/// caller with a closed channel instead.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) target: String,
    completion: oneshot::Sender<Result<ShortId>>,
}

impl PendingWrite {
    pub(crate) fn new(target: String) -> (Self, oneshot::Receiver<Result<ShortId>>) {
        let (completion, rx) = oneshot::channel();
        (Self { target, completion }, rx)
    }

    /// Delivers the outcome. A caller that already gave up is ignored.
    pub(crate) fn complete(self, result: Result<ShortId>) {
        let _ = self.completion.send(result);
    }
}
