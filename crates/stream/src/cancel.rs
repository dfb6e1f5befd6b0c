use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// User-facing half of a per-request cancellation token.
///
/// Dropping the handle cancels the stream, like calling [`CancelHandle::cancel`].
#[derive(Debug)]
pub struct CancelHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Consumer-facing half, observed by the stream loop.
#[derive(Debug)]
pub struct CancelSignal {
    cancel_rx: oneshot::Receiver<()>,
    fired: bool,
}

/// Creates one cancellation token for a single send.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        CancelHandle {
            cancel_tx: Some(cancel_tx),
        },
        CancelSignal {
            cancel_rx,
            fired: false,
        },
    )
}

impl CancelHandle {
    /// Requests cancellation. Returns false when the stream had already finished
    /// or this handle was used before.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

impl CancelSignal {
    /// Non-blocking check used between frames.
    pub fn is_cancelled(&mut self) -> bool {
        if self.fired {
            return true;
        }

        match self.cancel_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Closed) => {
                self.fired = true;
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Resolves once cancellation is requested or the handle is dropped.
    pub async fn cancelled(&mut self) {
        if self.fired {
            return;
        }

        // The receiver must not be polled again after it resolves.
        let _ = (&mut self.cancel_rx).await;
        self.fired = true;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cancel_reaches_live_signal_once() {
        let (mut handle, mut signal) = cancel_pair();

        assert!(!signal.is_cancelled());
        assert!(handle.cancel());
        assert!(signal.is_cancelled());
        assert!(signal.is_cancelled());
        assert!(!handle.cancel());
    }

    #[test]
    fn cancel_after_consumer_finished_is_noop() {
        let (mut handle, signal) = cancel_pair();
        drop(signal);

        assert!(!handle.cancel());
    }

    #[test]
    fn dropping_handle_cancels() {
        let (handle, mut signal) = cancel_pair();
        drop(handle);

        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_wakes_on_cancel() {
        let (mut handle, mut signal) = cancel_pair();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.cancelled().await;
            signal.is_cancelled()
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(handle.cancel());

        assert!(waiter.await.unwrap());
    }
}
