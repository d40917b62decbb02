//! `std::net` backed connections for host-side development.
//!
//! [`PlainTcpConnector`] ignores every TLS field of the request and opens a
//! plain TCP stream. It exists to run the session against a local broker
//! (for example `mosquitto -p 1883`) and must not be used in production.

use super::tls::{ConnectRequest, TlsConnect};
use super::{Close, Connection, Error, Read, Write};
use std::io::{self, ErrorKind};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    /// Wraps `stream`, applying `timeout_ms` to reads and writes.
    pub fn new(stream: TcpStream, timeout_ms: u32) -> Result<Self, Error> {
        let timeout = Some(Duration::from_millis(timeout_ms.max(1) as u64));
        stream.set_read_timeout(timeout).map_err(map_io)?;
        stream.set_write_timeout(timeout).map_err(map_io)?;
        stream.set_nodelay(true).map_err(map_io)?;
        Ok(Self { stream })
    }
}

fn map_io(e: io::Error) -> Error {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
        ErrorKind::ConnectionRefused => Error::ConnectionRefused,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            Error::ConnectionClosed
        }
        ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        _ => Error::ReadError,
    }
}

impl Read for TcpConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match io::Read::read(&mut self.stream, buf) {
            Ok(0) if !buf.is_empty() => Err(Error::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) => Err(map_io(e)),
        }
    }
}

impl Write for TcpConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        io::Write::write(&mut self.stream, buf).map_err(|e| match map_io(e) {
            Error::ReadError => Error::WriteError,
            other => other,
        })
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        io::Write::flush(&mut self.stream).map_err(|_| Error::WriteError)
    }
}

impl Close for TcpConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // the peer may already have gone
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(map_io(e)),
        }
    }
}

impl Connection for TcpConnection {}

/// Opens unencrypted TCP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTcpConnector;

impl TlsConnect for PlainTcpConnector {
    type Connection = TcpConnection;

    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<TcpConnection, Error> {
        let addresses = (request.hostname, request.port)
            .to_socket_addrs()
            .map_err(|_| Error::ResolveFailed)?;
        let timeout = Duration::from_millis(request.timeout_ms.max(1) as u64);

        let mut last = Error::ResolveFailed;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => return TcpConnection::new(stream, request.timeout_ms),
                Err(e) => last = map_io(e),
            }
        }
        if last == Error::ReadError {
            last = Error::ConnectionRefused;
        }
        Err(last)
    }
}
