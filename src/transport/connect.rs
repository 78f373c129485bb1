//! Transport targets and the blocking connect routine.

use std::{
    fmt, io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use super::stream::RawStream;

/// Scheme prefix selecting a Unix domain socket target.
pub const UNIX_SCHEME: &str = "unix://";

/// Transport targeted by the sender.
#[derive(Clone, Debug)]
pub enum Transport {
    /// TCP stream to a host and port.
    Tcp(TcpTransport),
    /// Unix domain socket stream.
    Unix(UnixTransport),
    /// Socket connected by the caller before construction.
    Adopted(AdoptedSocket),
}

impl Transport {
    /// Interpret `target` as either a `unix://` path or a TCP host.
    pub fn parse(target: &str, port: u16) -> Self {
        match target.strip_prefix(UNIX_SCHEME) {
            Some(path) => Transport::Unix(UnixTransport { path: path.into() }),
            None => Transport::Tcp(TcpTransport {
                host: target.to_owned(),
                port,
            }),
        }
    }

    /// Wrap an already connected socket.
    pub fn adopt(stream: impl Into<RawStream>) -> Self {
        Transport::Adopted(AdoptedSocket::new(stream))
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp(tcp) => write!(f, "{}:{}", tcp.host, tcp.port),
            Transport::Unix(unix) => write!(f, "{UNIX_SCHEME}{}", unix.path.display()),
            Transport::Adopted(_) => f.write_str("adopted socket"),
        }
    }
}

/// TCP transport configuration.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    /// Hostname or IP address to connect to.
    pub host: String,
    /// TCP port number.
    pub port: u16,
}

impl TcpTransport {
    fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }
}

/// Unix domain socket configuration.
#[derive(Clone, Debug)]
pub struct UnixTransport {
    /// Path to the socket file.
    pub path: PathBuf,
}

/// Pre-connected socket handed over at construction.
///
/// The socket backs exactly one connection. Once that connection is torn
/// down, reconnecting reports `NotConnected` because there is nothing to
/// dial.
#[derive(Clone)]
pub struct AdoptedSocket(Arc<Mutex<Option<RawStream>>>);

impl AdoptedSocket {
    pub fn new(stream: impl Into<RawStream>) -> Self {
        Self(Arc::new(Mutex::new(Some(stream.into()))))
    }

    fn take(&self) -> Option<RawStream> {
        self.0.lock().take()
    }

    /// Whether the socket has not yet been used by a connection.
    pub fn is_available(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl fmt::Debug for AdoptedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdoptedSocket")
            .field("available", &self.is_available())
            .finish()
    }
}

fn connect_tcp(config: &TcpTransport, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in config.socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses resolved for {}:{}", config.host, config.port),
        )
    }))
}

/// Establish a socket connection using the provided transport definition.
///
/// Blocks for at most `connect_timeout` per resolved TCP address.
pub fn connect_transport(
    transport: &Transport,
    connect_timeout: Duration,
) -> io::Result<RawStream> {
    match transport {
        Transport::Tcp(config) => connect_tcp(config, connect_timeout).map(RawStream::Tcp),
        Transport::Unix(config) => {
            #[cfg(unix)]
            {
                let stream = UnixStream::connect(&config.path)?;
                Ok(RawStream::Unix(stream))
            }
            #[cfg(not(unix))]
            {
                let _ = (config, connect_timeout);
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix domain sockets are not supported on this platform",
                ))
            }
        }
        Transport::Adopted(socket) => {
            let stream = socket.take().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotConnected,
                    "adopted socket was already used by a previous connection",
                )
            })?;
            stream.set_blocking()?;
            Ok(stream)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn parses_unix_targets() {
        match Transport::parse("unix:///var/run/fluent.sock", 24224) {
            Transport::Unix(unix) => assert_eq!(unix.path, PathBuf::from("/var/run/fluent.sock")),
            other => panic!("expected unix transport, got {other:?}"),
        }
    }

    #[rstest]
    fn parses_tcp_targets() {
        match Transport::parse("collector.local", 24225) {
            Transport::Tcp(tcp) => {
                assert_eq!(tcp.host, "collector.local");
                assert_eq!(tcp.port, 24225);
            }
            other => panic!("expected tcp transport, got {other:?}"),
        }
    }

    #[rstest]
    fn refused_tcp_connect_reports_error() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let err = connect_transport(
            &Transport::parse("127.0.0.1", port),
            Duration::from_millis(500),
        )
        .expect_err("nothing listens");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[cfg(unix)]
    #[rstest]
    fn adopted_socket_is_used_once() {
        let (ours, _peer) = UnixStream::pair().expect("socket pair");
        let transport = Transport::adopt(ours);
        assert!(connect_transport(&transport, Duration::from_secs(1)).is_ok());
        let err = connect_transport(&transport, Duration::from_secs(1))
            .expect_err("second use must fail");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
