//! Socket transports for the sender.
//!
//! [`connect_transport`] dials a [`Transport`] target into a [`RawStream`];
//! [`Connection`] then drives that stream from dedicated worker threads and
//! reports loss and backpressure through a [`TransportListener`].

mod connect;
mod stream;
mod worker;

pub use connect::{
    AdoptedSocket, TcpTransport, Transport, UNIX_SCHEME, UnixTransport, connect_transport,
};
pub use stream::RawStream;
pub use worker::{Connection, MAX_DERIVED_LOW_WATER, TransportListener, WriteLimits};
