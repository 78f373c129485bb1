//! Builder for [`FluentSender`](crate::FluentSender).
//!
//! Exposes transport selection, timeout tuning, write-buffer water marks and
//! timestamp precision. Validation happens in [`SenderBuilder::build_config`]
//! so misconfiguration is reported before any socket is opened.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use tokio::runtime::Handle;

use crate::{
    config::SenderConfig,
    error::{BuildError, ErrorHook, SenderError},
    sender::FluentSender,
    transport::{RawStream, TcpTransport, Transport, UnixTransport, WriteLimits},
};

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing [`FluentSender`] instances.
#[derive(Clone, Default)]
pub struct SenderBuilder {
    transport: Option<Transport>,
    tag_prefix: Option<String>,
    timeout_ms: Option<u64>,
    high_water: Option<usize>,
    low_water: Option<usize>,
    warn_interval_ms: Option<u64>,
    nanosecond_precision: bool,
    verbose: bool,
    error_hook: Option<ErrorHook>,
    runtime: Option<Handle>,
}

impl SenderBuilder {
    /// Create a builder targeting `localhost:24224`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit transport.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Configure the builder to use TCP.
    pub fn with_tcp(self, host: impl Into<String>, port: u16) -> Self {
        self.with_transport(Transport::Tcp(TcpTransport {
            host: host.into(),
            port,
        }))
    }

    /// Configure the builder to use a Unix domain socket.
    pub fn with_unix_path(self, path: impl Into<PathBuf>) -> Self {
        self.with_transport(Transport::Unix(UnixTransport { path: path.into() }))
    }

    /// Parse `target` as a `unix://` path or a TCP host on `port`.
    pub fn with_target(self, target: &str, port: u16) -> Self {
        self.with_transport(Transport::parse(target, port))
    }

    /// Send over a socket the caller already connected.
    pub fn with_socket(self, stream: impl Into<RawStream>) -> Self {
        self.with_transport(Transport::adopt(stream))
    }

    /// Prefix every label as `prefix.label`.
    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = Some(prefix.into());
        self
    }

    option_setter!(
        #[doc = "Bound each send, and the drain on close, in milliseconds."]
        with_timeout_ms,
        timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Queued bytes above which senders wait for the transport."]
        with_high_water,
        high_water,
        usize
    );
    option_setter!(
        #[doc = "Queued bytes at or below which waiting senders resume."]
        with_low_water,
        low_water,
        usize
    );
    option_setter!(with_warn_interval_ms, warn_interval_ms, u64);

    /// Send timestamps with nanosecond precision.
    pub fn with_nanosecond_precision(mut self, enabled: bool) -> Self {
        self.nanosecond_precision = enabled;
        self
    }

    /// Log every packed record at info level.
    pub fn with_verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Invoke `hook` with every recorded error. Panics inside the hook are
    /// caught and logged.
    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SenderError) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Run connects, send timers and background emits on `runtime` instead
    /// of the runtime current at build time. Emits and `close` may then be
    /// awaited from another runtime, even one without a time driver.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        self.validate_transport()?;
        self.validate_timeouts()?;
        self.validate_water_marks()?;
        Ok(())
    }

    fn validate_transport(&self) -> Result<(), BuildError> {
        match &self.transport {
            Some(Transport::Tcp(tcp)) if tcp.host.trim().is_empty() => Err(
                BuildError::InvalidConfig("tcp host must not be empty".into()),
            ),
            Some(Transport::Tcp(tcp)) if tcp.port == 0 => {
                Err(BuildError::InvalidConfig("tcp port must not be zero".into()))
            }
            Some(Transport::Unix(unix)) if unix.path.as_os_str().is_empty() => Err(
                BuildError::InvalidConfig("unix socket path must not be empty".into()),
            ),
            _ => Ok(()),
        }
    }

    fn validate_timeouts(&self) -> Result<(), BuildError> {
        if let Some(timeout) = self.timeout_ms {
            ensure_positive!(timeout, "timeout_ms")?;
        }
        if let Some(interval) = self.warn_interval_ms {
            ensure_positive!(interval, "warn_interval_ms")?;
        }
        Ok(())
    }

    fn validate_water_marks(&self) -> Result<(), BuildError> {
        if let Some(high) = self.high_water {
            ensure_positive!(high, "high_water")?;
        }
        let limits = self.write_limits();
        if limits.low > limits.high {
            return Err(BuildError::InvalidConfig(format!(
                "low_water ({}) must not exceed high_water ({})",
                limits.low, limits.high
            )));
        }
        Ok(())
    }

    fn write_limits(&self) -> WriteLimits {
        let defaults = SenderConfig::default().write_limits;
        match (self.high_water, self.low_water) {
            (Some(high), Some(low)) => WriteLimits { high, low },
            (Some(high), None) => WriteLimits::from_high(high),
            (None, Some(low)) => WriteLimits {
                high: defaults.high,
                low,
            },
            (None, None) => defaults,
        }
    }

    /// Validate the builder and produce the sender configuration.
    pub fn build_config(&self) -> Result<SenderConfig, BuildError> {
        self.validate()?;
        let mut config = SenderConfig::default();
        if let Some(transport) = &self.transport {
            config.transport = transport.clone();
        }
        config.tag_prefix = self.tag_prefix.clone().filter(|p| !p.is_empty());
        config.write_limits = self.write_limits();
        if let Some(timeout) = self.timeout_ms {
            config.timeout = Duration::from_millis(timeout);
        }
        if let Some(interval) = self.warn_interval_ms {
            config.warn_interval = Duration::from_millis(interval);
        }
        config.nanosecond_precision = self.nanosecond_precision;
        config.verbose = self.verbose;
        config.error_hook = self.error_hook.clone();
        Ok(config)
    }

    /// Build the sender, resolving the runtime handle.
    pub fn build(&self) -> Result<FluentSender, BuildError> {
        let config = self.build_config()?;
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => {
                Handle::try_current().map_err(|err| BuildError::NoRuntime(err.to_string()))?
            }
        };
        Ok(FluentSender::with_config(config, runtime))
    }
}

impl fmt::Debug for SenderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderBuilder")
            .field("transport", &self.transport)
            .field("tag_prefix", &self.tag_prefix)
            .field("timeout_ms", &self.timeout_ms)
            .field("high_water", &self.high_water)
            .field("low_water", &self.low_water)
            .field("warn_interval_ms", &self.warn_interval_ms)
            .field("nanosecond_precision", &self.nanosecond_precision)
            .field("verbose", &self.verbose)
            .field("error_hook", &self.error_hook.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}
