//! Error types returned by session and shadow operations.

use crate::network;
use crate::network::application::mqtt::codec::CodecError;
use crate::network::tls::CertificateError;

/// Failure of a session or shadow operation.
///
/// Every public operation returns exactly one of these; nothing is retried
/// internally. `Network` and `Protocol` errors surfaced by the response pump
/// mean the connection is no longer usable and must be re-established with
/// `disconnect` + `connect`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// Certificate or key material is missing or malformed.
    Credential,
    /// Host resolution, socket, or transport I/O failure.
    Network(network::Error),
    /// The TLS handshake failed with every available root certificate.
    Tls,
    /// MQTT level failure.
    Protocol(ProtocolError),
    /// A fixed-capacity buffer is too small for the request or response.
    BufferTooSmall,
    /// No shadow response arrived within the configured window.
    Timeout,
    /// The requested key is not present in the last shadow document.
    NotFound,
    /// A configuration blob could not be decoded.
    InvalidConfig,
}

/// MQTT level failure detail.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProtocolError {
    /// The operation needs a connected session.
    NotConnected,
    /// The broker answered CONNECT with a non-zero return code.
    ConnectionRefused(u8),
    /// An inbound packet could not be decoded.
    MalformedPacket,
    /// A packet arrived that is not valid at this point of the exchange.
    UnexpectedPacket,
    /// A topic name or filter was rejected by the codec.
    InvalidTopic,
    /// A packet does not fit the session's packet buffer.
    PacketTooLarge,
    /// The broker refused a subscription (SUBACK return code 0x80).
    SubscribeRejected,
    /// The shadow service answered on a rejected topic.
    Rejected,
    /// A PINGREQ went unanswered.
    KeepAliveTimeout,
}

impl From<network::Error> for Error {
    fn from(e: network::Error) -> Self {
        Error::Network(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<CertificateError> for Error {
    fn from(_: CertificateError) -> Self {
        Error::Credential
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        let detail = match e {
            CodecError::BufferTooSmall => ProtocolError::PacketTooLarge,
            CodecError::InvalidTopic => ProtocolError::InvalidTopic,
            CodecError::MalformedPacket => ProtocolError::MalformedPacket,
            CodecError::UnexpectedPacket => ProtocolError::UnexpectedPacket,
        };
        Error::Protocol(detail)
    }
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::NotConnected => f.write_str("not connected"),
            ProtocolError::ConnectionRefused(code) => {
                write!(f, "connection refused (return code {})", code)
            }
            ProtocolError::MalformedPacket => f.write_str("malformed packet"),
            ProtocolError::UnexpectedPacket => f.write_str("unexpected packet"),
            ProtocolError::InvalidTopic => f.write_str("invalid topic"),
            ProtocolError::PacketTooLarge => f.write_str("packet too large"),
            ProtocolError::SubscribeRejected => f.write_str("subscription rejected"),
            ProtocolError::Rejected => f.write_str("request rejected"),
            ProtocolError::KeepAliveTimeout => f.write_str("keepalive timeout"),
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Credential => f.write_str("invalid credentials"),
            Error::Network(e) => write!(f, "network error: {}", e),
            Error::Tls => f.write_str("TLS handshake failed"),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::BufferTooSmall => f.write_str("buffer too small"),
            Error::Timeout => f.write_str("timed out waiting for response"),
            Error::NotFound => f.write_str("key not found"),
            Error::InvalidConfig => f.write_str("invalid configuration"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ProtocolError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ProtocolError::NotConnected => defmt::write!(f, "NotConnected"),
            ProtocolError::ConnectionRefused(code) => {
                defmt::write!(f, "ConnectionRefused({})", code)
            }
            ProtocolError::MalformedPacket => defmt::write!(f, "MalformedPacket"),
            ProtocolError::UnexpectedPacket => defmt::write!(f, "UnexpectedPacket"),
            ProtocolError::InvalidTopic => defmt::write!(f, "InvalidTopic"),
            ProtocolError::PacketTooLarge => defmt::write!(f, "PacketTooLarge"),
            ProtocolError::SubscribeRejected => defmt::write!(f, "SubscribeRejected"),
            ProtocolError::Rejected => defmt::write!(f, "Rejected"),
            ProtocolError::KeepAliveTimeout => defmt::write!(f, "KeepAliveTimeout"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Credential => defmt::write!(f, "Credential"),
            Error::Network(e) => defmt::write!(f, "Network({})", e),
            Error::Tls => defmt::write!(f, "Tls"),
            Error::Protocol(e) => defmt::write!(f, "Protocol({})", e),
            Error::BufferTooSmall => defmt::write!(f, "BufferTooSmall"),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::NotFound => defmt::write!(f, "NotFound"),
            Error::InvalidConfig => defmt::write!(f, "InvalidConfig"),
        }
    }
}
