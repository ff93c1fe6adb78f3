use tokio::sync::watch;

/// Transmitter side of the client cancellation channel.
///
/// [`CancelTx`] lets the outer layer (e.g. an HTTP handler observing a dropped connection)
/// cancel a running cohort. The coordinator reads the flag at every step boundary, so
/// cancellation takes effect the next time any awake unit reaches `phase()`.
#[derive(Debug, Clone)]
pub struct CancelTx(watch::Sender<bool>);

impl CancelTx {
    /// Wraps a watch sender into a [`CancelTx`].
    pub fn new(tx: watch::Sender<bool>) -> Self {
        Self(tx)
    }

    /// Requests cancellation of every cohort subscribed to this channel.
    pub fn cancel(&self) {
        // Infallible send, so cancelling works before any cohort subscribed and after all
        // cohorts finished.
        self.0.send_replace(true);
    }

    /// Returns `true` once [`CancelTx::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Creates a new cancellation receiver subscription.
    pub fn subscribe(&self) -> CancelRx {
        self.0.subscribe()
    }
}

/// Receiver side of the client cancellation channel.
pub type CancelRx = watch::Receiver<bool>;

/// Creates a new cancellation channel in the not-cancelled state.
pub fn create_cancel_channel() -> (CancelTx, CancelRx) {
    let (tx, rx) = watch::channel(false);
    (CancelTx::new(tx), rx)
}
