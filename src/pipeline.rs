//! Bounded-time delivery of encoded frames.

use std::{sync::Arc, time::Duration};

use log::warn;
use tokio::time::Instant;

use crate::{
    connection::ConnectionManager,
    error::{ErrorRecorder, SenderError},
    rate_limited_warner::RateLimitedWarner,
};

/// Connect-and-wait rounds attempted before giving up within one send.
pub const MAX_CONNECT_ROUNDS: usize = 3;

/// Delivers frames through a [`ConnectionManager`].
///
/// Each frame stands alone: a failed send drops its bytes and the next send
/// starts afresh. There is no retry buffer.
#[derive(Debug)]
pub struct SendPipeline {
    connection: ConnectionManager,
    timeout: Duration,
    errors: Arc<ErrorRecorder>,
    warner: RateLimitedWarner,
}

impl SendPipeline {
    pub fn new(
        connection: ConnectionManager,
        timeout: Duration,
        errors: Arc<ErrorRecorder>,
        warner: RateLimitedWarner,
    ) -> Self {
        Self {
            connection,
            timeout,
            errors,
            warner,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Deliver `bytes`, returning whether they were accepted by the
    /// transport before the timeout.
    ///
    /// Transport failures discard the connection so the next send
    /// reconnects. A timeout leaves the connection in place.
    pub async fn send(&self, bytes: &[u8]) -> bool {
        let deadline = Instant::now() + self.timeout;
        match self.connection.timeout_at(deadline, self.deliver(bytes)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                self.fail(err);
                false
            }
            Err(_) => {
                self.fail(SenderError::Timeout(self.timeout));
                false
            }
        }
    }

    async fn deliver(&self, bytes: &[u8]) -> Result<(), SenderError> {
        for _ in 0..MAX_CONNECT_ROUNDS {
            if !self.connection.is_connected() {
                self.connection.ensure_connected().await?;
            }
            self.connection.flow().wait_writable().await;
            // Lost while parked on the flow signal: go round again.
            let Some(connection) = self.connection.current() else {
                continue;
            };
            return connection.write(bytes).inspect_err(|err| {
                if err.is_transport() {
                    self.connection.discard(connection.id());
                }
            });
        }
        Err(SenderError::NotConnected)
    }

    fn fail(&self, err: SenderError) {
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("FluentSender dropped {count} records; latest failure: {err}");
        });
        self.errors.record(err);
    }

    /// Report any drops not yet covered by a warning.
    pub fn flush_warnings(&self) {
        self.warner.flush(|count| {
            warn!("FluentSender dropped {count} records since the last warning");
        });
    }
}
