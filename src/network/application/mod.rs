//! # Application Layer Protocols
//!
//! - **[`mqtt`]**: MQTT 3.1.1 codec, session and response pump
//! - **[`shadow`]**: device shadow get/update protocol built on an MQTT session
//!
//! Both work with any type implementing [`Connection`](crate::network::Connection)
//! and use fixed-size buffers only.

/// MQTT client implementation.
///
/// Provides an MQTT 3.1.1 session for lightweight publish-subscribe messaging,
/// with the acknowledgement bookkeeping and keepalive the shadow layer needs.
pub mod mqtt;

/// Device shadow protocol engine.
pub mod shadow;
