//! Common error types for network operations

/// A common error type for network operations.
///
/// Returned by connection and connector implementations. The session maps
/// [`Error::HandshakeFailed`] to a TLS failure and everything else to a
/// network failure.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// An operation was attempted on a connection that is not open.
    NotOpen,
    /// An error occurred during a write operation.
    WriteError,
    /// An error occurred during a read operation.
    ReadError,
    /// The remote host name could not be resolved.
    ResolveFailed,
    /// A connection attempt was refused.
    ConnectionRefused,
    /// The TLS handshake failed, for example because the server chain did not
    /// validate against the supplied root certificate.
    HandshakeFailed,
    /// A timeout occurred.
    Timeout,
    /// The connection was closed.
    ConnectionClosed,
    /// An invalid address was provided.
    InvalidAddress,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Error::NotOpen => "connection not open",
            Error::WriteError => "write failed",
            Error::ReadError => "read failed",
            Error::ResolveFailed => "host name resolution failed",
            Error::ConnectionRefused => "connection refused",
            Error::HandshakeFailed => "TLS handshake failed",
            Error::Timeout => "timed out",
            Error::ConnectionClosed => "connection closed",
            Error::InvalidAddress => "invalid address",
        };
        f.write_str(text)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::NotOpen => defmt::write!(f, "NotOpen"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::ReadError => defmt::write!(f, "ReadError"),
            Error::ResolveFailed => defmt::write!(f, "ResolveFailed"),
            Error::ConnectionRefused => defmt::write!(f, "ConnectionRefused"),
            Error::HandshakeFailed => defmt::write!(f, "HandshakeFailed"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ConnectionClosed => defmt::write!(f, "ConnectionClosed"),
            Error::InvalidAddress => defmt::write!(f, "InvalidAddress"),
        }
    }
}
