//! Error taxonomy for the sender and the recorder that keeps `last_error`.
//!
//! Only [`SenderError::EmptyTag`] ever reaches a caller as an `Err`. Every
//! other variant is converted into a `false` delivery result and stored in
//! the [`ErrorRecorder`] so callers can inspect it afterwards.

use std::{
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use log::{debug, warn};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors produced while encoding or delivering a record.
#[derive(Clone, Debug, Error)]
pub enum SenderError {
    /// Neither a tag prefix nor a label was supplied.
    #[error("tag must be set")]
    EmptyTag,
    /// The payload could not be represented as MessagePack.
    #[error("failed to encode record: {0}")]
    Encode(#[source] Arc<EncodeError>),
    /// Socket-level failure: refused connection, broken pipe, reset.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),
    /// The peer closed the connection without reporting an error.
    #[error("connection closed by peer")]
    ConnectionLost,
    /// No connection was available after the bounded reconnect attempts.
    #[error("no connection available")]
    NotConnected,
    /// The send or drain did not complete within the configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// A background task driving the operation was cancelled.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl SenderError {
    /// Whether the failure means the current connection is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SenderError::Transport(_) | SenderError::ConnectionLost | SenderError::NotConnected
        )
    }
}

impl From<io::Error> for SenderError {
    fn from(err: io::Error) -> Self {
        SenderError::Transport(Arc::new(err))
    }
}

impl From<EncodeError> for SenderError {
    fn from(err: EncodeError) -> Self {
        SenderError::Encode(Arc::new(err))
    }
}

/// Failures raised while serialising a record.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Writing a MessagePack header or extension body failed.
    #[error("failed to write MessagePack header: {0}")]
    Header(String),
    /// The payload's `Serialize` implementation failed.
    #[error(transparent)]
    Payload(#[from] rmp_serde::encode::Error),
}

/// Errors raised while building a sender.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid sender configuration: {0}")]
    InvalidConfig(String),
    /// No runtime handle was supplied and none is active.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Callback invoked with every recorded error.
pub type ErrorHook = Arc<dyn Fn(&SenderError) + Send + Sync>;

/// Holds the most recent error and forwards each new one to the hook.
///
/// Assignments are last-write-wins; readers always observe a whole value.
pub struct ErrorRecorder {
    last: Mutex<Option<SenderError>>,
    hook: Option<ErrorHook>,
}

impl ErrorRecorder {
    pub fn new(hook: Option<ErrorHook>) -> Self {
        Self {
            last: Mutex::new(None),
            hook,
        }
    }

    /// Store `err` as the latest error and notify the hook.
    pub fn record(&self, err: SenderError) {
        debug!("FluentSender recorded error: {err}");
        if let Some(hook) = &self.hook
            && panic::catch_unwind(AssertUnwindSafe(|| hook(&err))).is_err()
        {
            warn!("FluentSender error hook panicked; ignoring");
        }
        *self.last.lock() = Some(err);
    }

    /// Most recently recorded error, if any.
    pub fn last(&self) -> Option<SenderError> {
        self.last.lock().clone()
    }
}

impl fmt::Debug for ErrorRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecorder")
            .field("last", &*self.last.lock())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
