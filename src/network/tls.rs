//! TLS credentials and the network interface seam.
//!
//! The handshake itself, chain validation and DNS are the platform's job. This
//! module only prepares what a platform TLS stack needs: the client
//! certificate and key (borrowed), and root certificates parsed once into an
//! owned DER form so they outlive the caller's credential buffers.

use super::{Connection, Error};
use base64ct::{Base64, Encoding};
use heapless::Vec;

/// Largest DER encoded root certificate that can be stored.
pub const MAX_CERTIFICATE_DER_LEN: usize = 2048;

/// Largest PEM body (base64 text without line breaks) accepted for a root
/// certificate.
const MAX_PEM_BODY_LEN: usize = (MAX_CERTIFICATE_DER_LEN / 3 + 1) * 4;

const PEM_BEGIN: &[u8] = b"-----BEGIN CERTIFICATE-----";
const PEM_END: &[u8] = b"-----END CERTIFICATE-----";

/// ASN.1 tag of a constructed SEQUENCE.
const DER_SEQUENCE: u8 = 0x30;

/// TLS credential bundle.
///
/// All material is borrowed from the caller. Byte spans carry their own
/// length; nothing relies on NUL termination.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    /// Client certificate (PEM or DER, passed through to the TLS stack).
    pub client_cert: &'a [u8],
    /// Client private key (PEM or DER, passed through to the TLS stack).
    pub client_key: &'a [u8],
    /// Primary root CA certificate (PEM or DER).
    pub root_ca: &'a [u8],
    /// Optional backup root CA, tried only when the primary handshake fails.
    pub backup_root_ca: Option<&'a [u8]>,
}

/// Reason a certificate could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateError {
    /// No certificate data was supplied.
    Empty,
    /// PEM armour was present but incomplete or not valid base64.
    InvalidPem,
    /// The decoded bytes are not a DER certificate.
    InvalidDer,
    /// The certificate is larger than [`MAX_CERTIFICATE_DER_LEN`].
    TooLarge,
}

/// A root certificate in DER form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8, MAX_CERTIFICATE_DER_LEN>,
}

impl Certificate {
    /// Parses a certificate given either as PEM text or as raw DER.
    pub fn parse(input: &[u8]) -> Result<Self, CertificateError> {
        let text = trim_ascii(input);
        if text.is_empty() {
            return Err(CertificateError::Empty);
        }

        // DER is binary, so only PEM input is trimmed
        let mut der: Vec<u8, MAX_CERTIFICATE_DER_LEN> = Vec::new();
        if text.starts_with(PEM_BEGIN) {
            decode_pem(text, &mut der)?;
        } else {
            der.extend_from_slice(input)
                .map_err(|_| CertificateError::TooLarge)?;
        }

        check_der(&der)?;
        Ok(Self { der })
    }

    /// DER encoding of the certificate.
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// Root certificates retained by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCertificates {
    primary: Certificate,
    backup: Option<Certificate>,
}

impl RootCertificates {
    /// Parses the primary and (optional) backup root certificates.
    ///
    /// A primary that fails to parse is an error. A backup that fails to parse
    /// is dropped with a warning.
    pub fn from_credentials(credentials: &Credentials<'_>) -> Result<Self, CertificateError> {
        let primary = Certificate::parse(credentials.root_ca)?;
        let backup = match credentials.backup_root_ca {
            Some(raw) => match Certificate::parse(raw) {
                Ok(cert) => Some(cert),
                Err(_) => {
                    warn!("backup root CA failed to parse, continuing without it");
                    None
                }
            },
            None => None,
        };

        Ok(Self { primary, backup })
    }

    /// The primary root.
    pub fn primary(&self) -> &Certificate {
        &self.primary
    }

    /// The backup root, if one parsed successfully.
    pub fn backup(&self) -> Option<&Certificate> {
        self.backup.as_ref()
    }
}

/// Everything a platform needs to open one TLS connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    /// Broker host name, used for DNS and as the TLS server name.
    pub hostname: &'a str,
    /// Broker port.
    pub port: u16,
    /// Socket send/receive timeout in milliseconds.
    pub timeout_ms: u32,
    /// Client certificate.
    pub client_cert: &'a [u8],
    /// Client private key.
    pub client_key: &'a [u8],
    /// Root certificate to validate the server chain against.
    pub root_ca: &'a Certificate,
}

/// A network interface able to open TLS connections.
///
/// Implementations resolve `hostname`, connect a socket, bind the client
/// certificate/key and the root certificate, and run the handshake.
/// Resolution failures should be reported as [`Error::ResolveFailed`] and
/// certificate/handshake failures as [`Error::HandshakeFailed`]; only the
/// latter makes the session retry with the backup root.
pub trait TlsConnect {
    /// Associated connection type
    type Connection: Connection;
    /// Open a connection
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<Self::Connection, Error>;
}

fn trim_ascii(mut input: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = input {
        if first.is_ascii_whitespace() || *first == 0 {
            input = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = input {
        if last.is_ascii_whitespace() || *last == 0 {
            input = rest;
        } else {
            break;
        }
    }
    input
}

fn decode_pem(
    input: &[u8],
    der: &mut Vec<u8, MAX_CERTIFICATE_DER_LEN>,
) -> Result<(), CertificateError> {
    let body = &input[PEM_BEGIN.len()..];
    let end = find(body, PEM_END).ok_or(CertificateError::InvalidPem)?;

    let mut text: Vec<u8, MAX_PEM_BODY_LEN> = Vec::new();
    for &byte in &body[..end] {
        if byte.is_ascii_whitespace() {
            continue;
        }
        text.push(byte).map_err(|_| CertificateError::TooLarge)?;
    }

    der.resize(MAX_CERTIFICATE_DER_LEN, 0)
        .map_err(|_| CertificateError::TooLarge)?;
    let len = Base64::decode(&text, der)
        .map_err(|_| CertificateError::InvalidPem)?
        .len();
    der.truncate(len);
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reads a DER tag/length header, returning `(tag, content_len, header_len)`.
fn der_header(bytes: &[u8]) -> Result<(u8, usize, usize), CertificateError> {
    let [tag, first, rest @ ..] = bytes else {
        return Err(CertificateError::InvalidDer);
    };

    if first & 0x80 == 0 {
        return Ok((*tag, *first as usize, 2));
    }

    let count = (first & 0x7F) as usize;
    if count == 0 || count > 2 || rest.len() < count {
        return Err(CertificateError::InvalidDer);
    }
    let len = rest[..count]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((*tag, len, 2 + count))
}

/// Checks the outer `Certificate ::= SEQUENCE { tbsCertificate SEQUENCE, .. }`
/// framing. Full X.509 validation is left to the TLS stack.
fn check_der(der: &[u8]) -> Result<(), CertificateError> {
    let (tag, len, header) = der_header(der)?;
    if tag != DER_SEQUENCE || header + len != der.len() {
        return Err(CertificateError::InvalidDer);
    }

    let (inner_tag, inner_len, inner_header) = der_header(&der[header..])?;
    if inner_tag != DER_SEQUENCE || inner_header + inner_len > len {
        return Err(CertificateError::InvalidDer);
    }

    Ok(())
}
