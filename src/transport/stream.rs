//! Blocking stream handle shared by the connection worker threads.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Connected socket driven by a [`Connection`](super::Connection).
#[derive(Debug)]
pub enum RawStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl RawStream {
    /// Duplicate the underlying descriptor.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            RawStream::Tcp(stream) => stream.try_clone().map(RawStream::Tcp),
            #[cfg(unix)]
            RawStream::Unix(stream) => stream.try_clone().map(RawStream::Unix),
        }
    }

    /// Shut down both directions, unblocking any thread parked on the socket.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            RawStream::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            RawStream::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }

    /// Force blocking mode; adopted sockets may arrive non-blocking.
    pub fn set_blocking(&self) -> io::Result<()> {
        match self {
            RawStream::Tcp(stream) => stream.set_nonblocking(false),
            #[cfg(unix)]
            RawStream::Unix(stream) => stream.set_nonblocking(false),
        }
    }
}

impl From<TcpStream> for RawStream {
    fn from(stream: TcpStream) -> Self {
        RawStream::Tcp(stream)
    }
}

#[cfg(unix)]
impl From<UnixStream> for RawStream {
    fn from(stream: UnixStream) -> Self {
        RawStream::Unix(stream)
    }
}

impl Read for RawStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RawStream::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            RawStream::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for RawStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RawStream::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            RawStream::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RawStream::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            RawStream::Unix(stream) => stream.flush(),
        }
    }
}
