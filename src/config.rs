//! Configuration consumed by [`FluentSender`](crate::FluentSender).
//!
//! `SenderBuilder` validates and assembles these values; the sender treats
//! them as immutable for its whole lifetime.

use std::{fmt, time::Duration};

use crate::{
    error::ErrorHook,
    rate_limited_warner::DEFAULT_WARN_INTERVAL,
    transport::{TcpTransport, Transport, WriteLimits},
};

/// Default collector host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default Fluentd forward port.
pub const DEFAULT_PORT: u16 = 24224;
/// Default write-buffer high water mark in bytes.
pub const DEFAULT_HIGH_WATER: usize = 256 * 1024;
/// Default bound on connect, flow wait and write for one send, and on the
/// drain performed by `close`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for one sender.
#[derive(Clone)]
pub struct SenderConfig {
    pub transport: Transport,
    /// Prepended to every label as `prefix.label`.
    pub tag_prefix: Option<String>,
    pub write_limits: WriteLimits,
    pub timeout: Duration,
    /// Send timestamps as EventTime rather than whole seconds.
    pub nanosecond_precision: bool,
    /// Log every packed record at info level.
    pub verbose: bool,
    pub warn_interval: Duration,
    pub error_hook: Option<ErrorHook>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp(TcpTransport {
                host: DEFAULT_HOST.into(),
                port: DEFAULT_PORT,
            }),
            tag_prefix: None,
            write_limits: WriteLimits::from_high(DEFAULT_HIGH_WATER),
            timeout: DEFAULT_TIMEOUT,
            nanosecond_precision: false,
            verbose: false,
            warn_interval: DEFAULT_WARN_INTERVAL,
            error_hook: None,
        }
    }
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("transport", &self.transport)
            .field("tag_prefix", &self.tag_prefix)
            .field("write_limits", &self.write_limits)
            .field("timeout", &self.timeout)
            .field("nanosecond_precision", &self.nanosecond_precision)
            .field("verbose", &self.verbose)
            .field("warn_interval", &self.warn_interval)
            .field("error_hook", &self.error_hook.is_some())
            .finish()
    }
}
