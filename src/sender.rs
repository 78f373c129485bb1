//! Public sender type exported by the crate.

use std::{fmt, sync::Arc};

use log::info;
use serde::Serialize;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    builder::SenderBuilder,
    config::SenderConfig,
    connection::{ConnectionManager, ConnectionState},
    encoder::{encode_record, resolve_tag},
    error::{BuildError, ErrorRecorder, SenderError},
    pipeline::SendPipeline,
    rate_limited_warner::RateLimitedWarner,
    time_value::TimeValue,
    transport::Transport,
};

struct Inner {
    tag_prefix: Option<String>,
    nanosecond_precision: bool,
    verbose: bool,
    pipeline: SendPipeline,
    errors: Arc<ErrorRecorder>,
    runtime: Handle,
}

/// Forwards records to a Fluentd-compatible collector.
///
/// Delivery failures never surface as `Err`: `emit*` returns `Ok(false)` and
/// the cause is available from [`last_error`](FluentSender::last_error).
/// Only an empty tag, a caller bug, is returned as `Err`.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct FluentSender {
    inner: Arc<Inner>,
}

impl FluentSender {
    /// Start building a sender.
    pub fn builder() -> SenderBuilder {
        SenderBuilder::new()
    }

    /// Construct a sender for `transport` with default settings on the
    /// current runtime.
    pub fn new(transport: Transport) -> Result<Self, BuildError> {
        SenderBuilder::new().with_transport(transport).build()
    }

    /// Construct the sender from a validated configuration.
    pub fn with_config(config: SenderConfig, runtime: Handle) -> Self {
        let errors = Arc::new(ErrorRecorder::new(config.error_hook.clone()));
        let connection = ConnectionManager::new(
            config.transport,
            config.write_limits,
            config.timeout,
            runtime.clone(),
            Arc::clone(&errors),
        );
        let pipeline = SendPipeline::new(
            connection,
            config.timeout,
            Arc::clone(&errors),
            RateLimitedWarner::new(config.warn_interval),
        );
        Self {
            inner: Arc::new(Inner {
                tag_prefix: config.tag_prefix,
                nanosecond_precision: config.nanosecond_precision,
                verbose: config.verbose,
                pipeline,
                errors,
                runtime,
            }),
        }
    }

    /// Emit `payload` under `label`, stamped with the current time.
    pub async fn emit<T>(&self, label: &str, payload: &T) -> Result<bool, SenderError>
    where
        T: Serialize + ?Sized,
    {
        let time = TimeValue::now(self.inner.nanosecond_precision);
        self.emit_with_time(label, time, payload).await
    }

    /// Emit with a fractional UNIX timestamp, kept to the nanosecond when
    /// nanosecond precision is enabled and truncated otherwise.
    pub async fn emit_at<T>(
        &self,
        label: &str,
        timestamp: f64,
        payload: &T,
    ) -> Result<bool, SenderError>
    where
        T: Serialize + ?Sized,
    {
        let time = TimeValue::from_secs_f64(timestamp, self.inner.nanosecond_precision);
        self.emit_with_time(label, time, payload).await
    }

    /// Emit with an explicit timestamp.
    ///
    /// An unencodable payload is recorded and reported as `Ok(false)`
    /// without touching the network.
    pub async fn emit_with_time<T>(
        &self,
        label: &str,
        time: TimeValue,
        payload: &T,
    ) -> Result<bool, SenderError>
    where
        T: Serialize + ?Sized,
    {
        match self.encode(label, time, payload)? {
            Some(bytes) => Ok(self.inner.pipeline.send(&bytes).await),
            None => Ok(false),
        }
    }

    /// Encode now and deliver on the sender's runtime.
    ///
    /// The returned handle resolves to the delivery result.
    pub fn emit_later<T>(&self, label: &str, payload: &T) -> Result<JoinHandle<bool>, SenderError>
    where
        T: Serialize + ?Sized,
    {
        let time = TimeValue::now(self.inner.nanosecond_precision);
        let bytes = self.encode(label, time, payload)?;
        let inner = Arc::clone(&self.inner);
        Ok(self.inner.runtime.spawn(async move {
            match bytes {
                Some(bytes) => inner.pipeline.send(&bytes).await,
                None => false,
            }
        }))
    }

    /// Encode a record stamped with the current time without sending it.
    pub fn pack<T>(&self, label: &str, payload: &T) -> Result<Vec<u8>, SenderError>
    where
        T: Serialize + ?Sized,
    {
        let time = TimeValue::now(self.inner.nanosecond_precision);
        self.pack_with_time(label, time, payload)
    }

    /// Encode a record with an explicit timestamp without sending it.
    pub fn pack_with_time<T>(
        &self,
        label: &str,
        time: TimeValue,
        payload: &T,
    ) -> Result<Vec<u8>, SenderError>
    where
        T: Serialize + ?Sized,
    {
        let tag = resolve_tag(self.inner.tag_prefix.as_deref(), label)?;
        Ok(encode_record(&tag, time, payload)?)
    }

    fn encode<T>(
        &self,
        label: &str,
        time: TimeValue,
        payload: &T,
    ) -> Result<Option<Vec<u8>>, SenderError>
    where
        T: Serialize + ?Sized,
    {
        let tag = resolve_tag(self.inner.tag_prefix.as_deref(), label)?;
        match encode_record(&tag, time, payload) {
            Ok(bytes) => {
                if self.inner.verbose {
                    info!("FluentSender packed {tag} at {time:?} ({} bytes)", bytes.len());
                }
                Ok(Some(bytes))
            }
            Err(err) => {
                self.inner.errors.record(err.into());
                Ok(None)
            }
        }
    }

    /// Drain and close the connection. Safe to call repeatedly; the next
    /// emit reconnects.
    pub async fn close(&self) {
        self.inner.pipeline.connection().close().await;
        self.inner.pipeline.flush_warnings();
    }

    /// The most recent error from any layer. Not cleared by later successes.
    pub fn last_error(&self) -> Option<SenderError> {
        self.inner.errors.last()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.pipeline.connection().state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.pipeline.connection().is_connected()
    }
}

impl fmt::Debug for FluentSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluentSender")
            .field("tag_prefix", &self.inner.tag_prefix)
            .field("nanosecond_precision", &self.inner.nanosecond_precision)
            .field("state", &self.connection_state())
            .finish()
    }
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
