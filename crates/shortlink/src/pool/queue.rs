use tokio::sync::{Mutex, mpsc};

/// Receiving half of a bounded queue drained by several workers.
///
/// Workers take turns holding the receiver; the lock is released as soon as
/// an item arrives or the waiting worker stops polling, which makes
/// [`recv`](Self::recv) safe to use inside `tokio::select!`.
#[derive(Debug)]
pub(crate) struct SharedReceiver<T> {
    inner: Mutex<mpsc::Receiver<T>>,
}

impl<T> SharedReceiver<T> {
    pub(crate) fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Mutex::new(receiver),
        }
    }

    /// Waits for the next item. Returns `None` once the queue is closed and
    /// empty.
    pub(crate) async fn recv(&self) -> Option<T> {
        let mut receiver = self.inner.lock().await;
        receiver.recv().await
    }

    /// Closes the queue to new items and returns everything still buffered.
    pub(crate) async fn close_and_drain(&self) -> Vec<T> {
        let mut receiver = self.inner.lock().await;
        receiver.close();

        let mut drained = Vec::new();
        while let Ok(item) = receiver.try_recv() {
            drained.push(item);
        }
        drained
    }
}
