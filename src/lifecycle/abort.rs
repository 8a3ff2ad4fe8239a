//! Cancellation token handed to the handler through `HandlerOptions`.

use tokio::sync::watch;

/// Producer side of an abort signal.
///
/// Any number of [`AbortSignal`]s can be derived from one controller.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

impl AbortController {
    /// Create a controller whose signal is not yet aborted.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Derive a signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort every derived signal. Calling this more than once is a no-op.
    pub fn abort(&self) {
        self.tx.send_if_modified(|aborted| {
            if *aborted {
                false
            } else {
                *aborted = true;
                true
            }
        });
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of an abort signal.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Whether the signal has already been aborted.
    pub fn aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is aborted.
    ///
    /// If the controller is dropped without aborting, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
