//! Asynchronous client for the Fluentd forward protocol.
//!
//! [`FluentSender`] encodes `[tag, time, payload]` records as MessagePack and
//! writes them over one persistent TCP or Unix domain socket. Every send is
//! bounded by a timeout covering connect, backpressure and write; failures
//! are reported as `false` with the cause kept in
//! [`FluentSender::last_error`].

pub mod builder;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod flow;
pub mod pipeline;
pub mod rate_limited_warner;
pub mod sender;
pub mod time_value;
pub mod transport;

pub use builder::SenderBuilder;
pub use config::{DEFAULT_HIGH_WATER, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT, SenderConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use encoder::{encode_record, resolve_tag};
pub use error::{BuildError, EncodeError, ErrorHook, SenderError};
pub use flow::FlowController;
pub use pipeline::SendPipeline;
pub use sender::FluentSender;
pub use time_value::{EventTime, TimeValue};
pub use transport::{RawStream, TcpTransport, Transport, UnixTransport, WriteLimits};
