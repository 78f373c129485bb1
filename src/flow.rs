//! Writable/blocked signal shared by every in-flight send.

use tokio::sync::watch;

/// Binary flow-control signal. Starts writable.
///
/// Transport callbacks flip the signal; senders park in
/// [`wait_writable`](FlowController::wait_writable) while it is blocked and
/// are all released together once it becomes writable again.
#[derive(Debug)]
pub struct FlowController {
    writable: watch::Sender<bool>,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowController {
    pub fn new() -> Self {
        let (writable, _) = watch::channel(true);
        Self { writable }
    }

    pub fn is_writable(&self) -> bool {
        *self.writable.borrow()
    }

    pub fn mark_blocked(&self) {
        self.writable.send_replace(false);
    }

    pub fn mark_writable(&self) {
        self.writable.send_replace(true);
    }

    /// Suspend until the signal is writable. Returns immediately if it
    /// already is.
    pub async fn wait_writable(&self) {
        let mut rx = self.writable.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|writable| *writable).await;
    }
}
