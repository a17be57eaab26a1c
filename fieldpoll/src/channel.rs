use tokio::sync::mpsc::error::TryRecvError;

use crate::Shutdown;

/// Command receiver of a connection task
///
/// Every way the channel can end maps to [`Shutdown`], so the task cannot
/// mistake a dropped handle for an idle one.
pub(crate) struct Receiver<T>(tokio::sync::mpsc::Receiver<T>);

impl<T> From<tokio::sync::mpsc::Receiver<T>> for Receiver<T> {
    fn from(value: tokio::sync::mpsc::Receiver<T>) -> Self {
        Self(value)
    }
}

impl<T> Receiver<T> {
    pub(crate) async fn recv(&mut self) -> Result<T, Shutdown> {
        self.0.recv().await.ok_or(Shutdown)
    }

    /// Take a queued command without waiting
    pub(crate) fn poll_pending(&mut self) -> Result<Option<T>, Shutdown> {
        match self.0.try_recv() {
            Ok(x) => Ok(Some(x)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Shutdown),
        }
    }
}
