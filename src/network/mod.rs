//! A network abstraction layer for embedded systems
//!
//! This module provides the traits a platform implements to hand the session a
//! connected, TLS-secured byte stream, the adapter that turns such a stream into
//! the send/receive hooks used by the MQTT layer, and the application protocols
//! built on top of it.
//!

#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Application layer protocols (MQTT session and device shadow)
pub mod application;

/// TLS credentials, root certificate parsing and the connector trait
pub mod tls;

/// Send/receive adapter over a [`Connection`]
pub mod transport;

/// `std::net` backed connections for host-side development
#[cfg(feature = "std")]
pub mod tcp;

pub use error::Error;
pub use tls::{ConnectRequest, TlsConnect};
pub use transport::Transport;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Close, Connection, Read, TlsConnect, Write};
}

/// Read half of a connection.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug + Into<Error>;
    /// Read data from the connection.
    ///
    /// Implementations backed by a socket with a receive timeout should report
    /// an expired timeout as [`Error::Timeout`]; the transport treats that as
    /// "no data yet" rather than a failure.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Write half of a connection.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug + Into<Error>;
    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Teardown of a connection.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug + Into<Error>;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}
