//! Ownership of the single live connection behind a sender.
//!
//! [`ConnectionManager`] serializes connect and close behind an async mutex
//! and keeps the installed [`Connection`] in a small state cell. Worker
//! threads report loss and backpressure through [`TransportListener`]; those
//! callbacks only touch the cell when their connection id is still the
//! installed one, so a late event from a replaced connection is dropped.

use std::{
    fmt, io,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::Mutex as AsyncMutex,
    time::{self, Instant, Timeout},
};

use crate::{
    error::{ErrorRecorder, SenderError},
    flow::FlowController,
    transport::{Connection, Transport, TransportListener, WriteLimits, connect_transport},
};

/// Health of the managed connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Slot {
    state: ConnectionState,
    current: Option<Arc<Connection>>,
}

/// State touched by both lock holders and transport callbacks.
struct Shared {
    slot: Mutex<Slot>,
    flow: FlowController,
    errors: Arc<ErrorRecorder>,
}

// Only the state is shown: formatting the connection would read its write
// buffer while the slot is locked, inverting the callback lock order.
impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state())
            .field("writable", &self.flow.is_writable())
            .finish()
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.slot.lock().state
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.slot.lock().current.clone()
    }

    /// Set the flow signal if `id` is still installed. The check and the
    /// change happen under one slot guard so a concurrent detach cannot be
    /// overwritten by a stale pause.
    fn set_flow_if_current(&self, id: u64, writable: bool) -> bool {
        let slot = self.slot.lock();
        if !slot.current.as_ref().is_some_and(|conn| conn.id() == id) {
            return false;
        }
        if writable {
            self.flow.mark_writable();
        } else {
            self.flow.mark_blocked();
        }
        true
    }

    fn begin_connecting(&self) -> ConnectingGuard<'_> {
        let mut slot = self.slot.lock();
        if slot.state == ConnectionState::Disconnected {
            slot.state = ConnectionState::Connecting;
        }
        ConnectingGuard(self)
    }

    fn install(&self, connection: Arc<Connection>) {
        let mut slot = self.slot.lock();
        slot.state = ConnectionState::Connected;
        slot.current = Some(connection);
        self.flow.mark_writable();
    }

    /// Remove the installed connection, optionally only if it has `id`.
    fn detach(&self, id: Option<u64>) -> Option<Arc<Connection>> {
        let mut slot = self.slot.lock();
        let matches = match (&slot.current, id) {
            (Some(conn), Some(id)) => conn.id() == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return None;
        }
        slot.state = ConnectionState::Disconnected;
        // Parked senders must wake up and observe the missing connection.
        self.flow.mark_writable();
        slot.current.take()
    }
}

impl TransportListener for Shared {
    fn connection_lost(&self, id: u64, err: Option<io::Error>) {
        let Some(connection) = self.detach(Some(id)) else {
            return;
        };
        connection.shutdown();
        let err = match err {
            Some(err) => {
                warn!("FluentSender connection {id} lost: {err}");
                SenderError::from(err)
            }
            None => {
                info!("FluentSender connection {id} closed by peer");
                SenderError::ConnectionLost
            }
        };
        self.errors.record(err);
    }

    fn pause_writing(&self, id: u64) {
        if self.set_flow_if_current(id, false) {
            debug!("FluentSender connection {id} above high water mark; pausing");
        }
    }

    fn resume_writing(&self, id: u64) {
        if self.set_flow_if_current(id, true) {
            debug!("FluentSender connection {id} drained to low water mark; resuming");
        }
    }
}

/// Reverts `Connecting` if the attempt did not install a connection,
/// including when the attempt's future is dropped on timeout.
struct ConnectingGuard<'a>(&'a Shared);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.0.slot.lock();
        if slot.state == ConnectionState::Connecting {
            slot.state = ConnectionState::Disconnected;
        }
    }
}

/// Outcome of the most recent finished connect attempt.
#[derive(Debug, Default)]
struct ConnectGate {
    last_failure: Option<SenderError>,
}

/// Owns zero or one live connection for a sender.
#[derive(Debug)]
pub struct ConnectionManager {
    transport: Transport,
    limits: WriteLimits,
    timeout: Duration,
    runtime: Handle,
    gate: AsyncMutex<ConnectGate>,
    attempts: AtomicU64,
    next_id: AtomicU64,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        transport: Transport,
        limits: WriteLimits,
        timeout: Duration,
        runtime: Handle,
        errors: Arc<ErrorRecorder>,
    ) -> Self {
        Self {
            transport,
            limits,
            timeout,
            runtime,
            gate: AsyncMutex::new(ConnectGate::default()),
            attempts: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    state: ConnectionState::Disconnected,
                    current: None,
                }),
                flow: FlowController::new(),
                errors,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn flow(&self) -> &FlowController {
        &self.shared.flow
    }

    /// Bound `future` by `deadline` using the timer of the configured
    /// runtime, whichever runtime ends up polling it.
    pub fn timeout_at<F: Future>(&self, deadline: Instant, future: F) -> Timeout<F> {
        let _runtime = self.runtime.enter();
        time::timeout_at(deadline, future)
    }

    /// The installed connection, if any.
    pub fn current(&self) -> Option<Arc<Connection>> {
        self.shared.current()
    }

    /// Connect unless already connected.
    ///
    /// Callers that queued behind an attempt which finished while they
    /// waited share its failure instead of dialling again.
    pub async fn ensure_connected(&self) -> Result<(), SenderError> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut gate = self.gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        if self.attempts.load(Ordering::Acquire) != seen
            && let Some(err) = &gate.last_failure
        {
            return Err(err.clone());
        }
        let result = self.connect_locked().await;
        gate.last_failure = result.as_ref().err().cloned();
        self.attempts.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn connect_locked(&self) -> Result<(), SenderError> {
        let _connecting = self.shared.begin_connecting();
        let transport = self.transport.clone();
        let timeout = self.timeout;
        let stream = self
            .runtime
            .spawn_blocking(move || connect_transport(&transport, timeout))
            .await
            .map_err(|err| SenderError::Cancelled(err.to_string()))??;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let listener: Weak<dyn TransportListener> = shared;
        let connection = Connection::open(id, stream, self.limits, listener)?;
        debug!("FluentSender connected to {} (connection {id})", self.transport);
        self.shared.install(Arc::new(connection));
        Ok(())
    }

    /// Tear down the connection `id` without draining, if still installed.
    pub fn discard(&self, id: u64) {
        if let Some(connection) = self.shared.detach(Some(id)) {
            debug!("FluentSender discarding connection {id}");
            connection.shutdown();
        }
    }

    /// Drain and tear down the installed connection. Idempotent.
    ///
    /// Waiting for an in-flight connect and draining share one timeout
    /// budget. The socket is shut down even if draining runs out of time;
    /// if the connect gate is never acquired nothing is closed.
    pub async fn close(&self) {
        let deadline = Instant::now() + self.timeout;
        let Ok(_gate) = self.timeout_at(deadline, self.gate.lock()).await else {
            warn!(
                "FluentSender close timed out after {:?} waiting for a connect",
                self.timeout
            );
            self.shared.errors.record(SenderError::Timeout(self.timeout));
            return;
        };
        let Some(connection) = self.shared.detach(None) else {
            return;
        };
        if self
            .timeout_at(deadline, connection.drain())
            .await
            .is_err()
        {
            warn!(
                "FluentSender close gave up draining {} bytes after {:?}",
                connection.buffered(),
                self.timeout
            );
            self.shared.errors.record(SenderError::Timeout(self.timeout));
        }
        connection.shutdown();
        debug!("FluentSender closed connection {}", connection.id());
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
