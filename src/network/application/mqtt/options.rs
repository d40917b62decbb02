//! Session configuration.

use crate::error::Error;
use serde::Deserialize;

/// Default broker port for MQTT over TLS.
pub const DEFAULT_PORT: u16 = 8883;

/// Configuration options for an MQTT session.
///
/// Every field has a default, so a partial JSON object is enough:
///
/// ```rust
/// use libshadow::network::application::mqtt::Options;
///
/// let options = Options::from_json(br#"{"keep_alive_seconds":30}"#).unwrap();
/// assert_eq!(options.keep_alive_seconds, 30);
/// assert_eq!(options.port, 8883);
/// assert!(options.clean_session);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Broker port.
    pub port: u16,

    /// The keep-alive time interval in seconds.
    ///
    /// The response pump sends PINGREQ once this much time has passed without
    /// any outbound packet. A value of 0 disables keep-alive. The application
    /// must call the pump at least this often or the broker will drop the
    /// connection.
    pub keep_alive_seconds: u16,

    /// Whether to start a clean session.
    ///
    /// Shadow subscriptions are re-established after each connect, so the
    /// broker never needs to keep session state for this client.
    pub clean_session: bool,

    /// Socket timeout handed to the network interface, and the limit for
    /// finishing a partially received packet or waiting for CONNACK.
    pub socket_timeout_ms: u32,

    /// How long a PINGREQ may stay unanswered before the pump fails.
    pub ping_timeout_ms: u32,

    /// How long shadow get/update calls wait for an accepted/rejected reply.
    pub shadow_timeout_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            keep_alive_seconds: 60,
            clean_session: true,
            socket_timeout_ms: 1_000,
            ping_timeout_ms: 5_000,
            shadow_timeout_ms: 5_000,
        }
    }
}

impl Options {
    /// Decodes options from a JSON object. Missing fields keep their defaults.
    pub fn from_json(json: &[u8]) -> Result<Self, Error> {
        serde_json_core::from_slice::<Options>(json)
            .map(|(options, _)| options)
            .map_err(|_| Error::InvalidConfig)
    }

    /// Keep-alive interval in milliseconds, `None` when disabled.
    pub fn keep_alive_ms(&self) -> Option<u32> {
        match self.keep_alive_seconds {
            0 => None,
            secs => Some(secs as u32 * 1_000),
        }
    }
}
