//! Cancellation signal for load runs.
//!
//! Wraps a tokio watch channel into a one-way "stop" flag. A run checks the flag between
//! sub-windows and between chunks, never in the middle of a chunk insert, so a cancelled run
//! always stops at a boundary where the staged table holds only whole chunks.

use tokio::sync::watch;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};

/// Transmitter side of a cancellation signal.
#[derive(Debug)]
pub struct CancellationTx(watch::Sender<bool>);

impl CancellationTx {
    /// Requests cancellation of every run holding a receiver of this signal.
    pub fn cancel(&self) {
        // Receivers may all be gone already, in which case there is nobody left to stop.
        let _ = self.0.send(true);
    }

    /// Returns a new receiver observing this signal.
    pub fn subscribe(&self) -> CancellationRx {
        CancellationRx(self.0.subscribe())
    }
}

/// Receiver side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationRx(watch::Receiver<bool>);

impl CancellationRx {
    /// Returns a receiver that is never cancelled.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender keeps the last value readable forever.
        drop(tx);
        Self(rx)
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Fails with [`ErrorKind::Cancelled`] once cancellation was requested.
    pub fn check(&self, boundary: &str) -> IngestResult<()> {
        if self.is_cancelled() {
            bail!(
                ErrorKind::Cancelled,
                "Load run cancelled",
                format!("cancellation observed {boundary}")
            );
        }

        Ok(())
    }
}

/// Creates a new cancellation signal in the "not cancelled" state.
pub fn create_cancellation() -> (CancellationTx, CancellationRx) {
    let (tx, rx) = watch::channel(false);
    (CancellationTx(tx), CancellationRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_observed_by_all_receivers() {
        let (tx, rx) = create_cancellation();
        let other = tx.subscribe();

        assert!(rx.check("between chunks").is_ok());

        tx.cancel();

        assert!(rx.is_cancelled());
        assert_eq!(
            other.check("between sub-windows").map_err(|err| err.kind()),
            Err(ErrorKind::Cancelled)
        );
    }

    #[test]
    fn test_never_is_not_cancelled() {
        assert!(!CancellationRx::never().is_cancelled());
    }
}
