//! An MQTT session over a TLS transport.

use super::codec::{self, Packet, Publish, QoS};
use super::{MAX_CLIENT_ID_LEN, MAX_PENDING_ACKS, MQTT_BUFFER_SIZE, Notify, Options};
use crate::error::{Error, ProtocolError};
use crate::network::tls::{ConnectRequest, Credentials, RootCertificates, TlsConnect};
use crate::network::{self, Connection, Transport};
use crate::time::Clock;
use heapless::{FnvIndexMap, String, Vec};

/// Last known state of the broker connection.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionStatus {
    /// No MQTT connection. The initial state.
    Disconnected,
    /// CONNACK accepted and no disconnect since.
    Connected,
}

/// Which request an acknowledgement belongs to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AckKind {
    /// SUBSCRIBE awaiting SUBACK.
    Subscribe,
    /// UNSUBSCRIBE awaiting UNSUBACK.
    Unsubscribe,
    /// QoS 1/2 PUBLISH awaiting PUBACK/PUBCOMP.
    Publish,
}

/// Progress of an acknowledged request.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AckStatus {
    /// Sent, no acknowledgement yet.
    Pending,
    /// Acknowledged by the broker.
    Acknowledged,
    /// The broker acknowledged with a failure code.
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct PendingAck {
    pub(super) kind: AckKind,
    pub(super) status: AckStatus,
}

/// One MQTT connection and everything needed to drive it.
///
/// Created with [`Session::initialize`]; the value is the session, there is no
/// hidden global instance. `N` is the capacity of the packet buffer shared by
/// outbound serialization and inbound parsing. Packets that do not fit are
/// rejected rather than truncated.
pub struct Session<C, K, H, const N: usize = MQTT_BUFFER_SIZE>
where
    C: Connection,
    K: Clock,
    H: Notify,
{
    pub(super) transport: Transport<C>,
    pub(super) clock: K,
    pub(super) handler: H,
    pub(super) options: Options,
    roots: RootCertificates,
    status: ConnectionStatus,
    thing_name: String<MAX_CLIENT_ID_LEN>,
    pub(super) buffer: Vec<u8, N>,
    next_packet_id: u16,
    pub(super) acks: FnvIndexMap<u16, PendingAck, MAX_PENDING_ACKS>,
    /// Time of the last packet handed to the transport.
    pub(super) last_sent_ms: u32,
    /// Time the outstanding PINGREQ was sent.
    pub(super) ping_sent_ms: Option<u32>,
    connections: u32,
}

impl<C, K, H, const N: usize> Session<C, K, H, N>
where
    C: Connection,
    K: Clock,
    H: Notify,
{
    /// Creates a session.
    ///
    /// Parses and retains the root CA certificate(s) from `credentials` and
    /// registers `handler` for application messages. A primary root CA that
    /// does not parse fails with [`Error::Credential`]; a bad backup root is
    /// logged and skipped.
    pub fn initialize(
        handler: H,
        credentials: &Credentials<'_>,
        clock: K,
        options: Options,
    ) -> Result<Self, Error> {
        let roots = RootCertificates::from_credentials(credentials).map_err(|e| {
            error!("root CA parse failed");
            Error::from(e)
        })?;

        Ok(Self {
            transport: Transport::new(),
            clock,
            handler,
            options,
            roots,
            status: ConnectionStatus::Disconnected,
            thing_name: String::new(),
            buffer: Vec::new(),
            next_packet_id: 1,
            acks: FnvIndexMap::new(),
            last_sent_ms: 0,
            ping_sent_ms: None,
            connections: 0,
        })
    }

    /// Establishes the TLS connection and the MQTT session.
    ///
    /// Opens a fresh socket through `network`, binding the client certificate
    /// and key from `credentials` and the primary root CA. If the handshake
    /// fails and a backup root CA is available, the connection is retried once
    /// with the backup. Then CONNECT is sent with `client_id` (which also
    /// becomes the thing name) and the CONNACK is awaited.
    ///
    /// # Errors
    ///
    /// * [`Error::Credential`] - client certificate or key missing
    /// * [`Error::BufferTooSmall`] - `client_id` longer than [`MAX_CLIENT_ID_LEN`]
    /// * [`Error::Network`] - resolution, socket or transport failure
    /// * [`Error::Tls`] - handshake failed with every root CA
    /// * [`Error::Protocol`] - CONNACK refused or malformed
    ///
    /// On any failure the socket is closed and the session stays disconnected.
    pub fn connect<T>(
        &mut self,
        network: &mut T,
        credentials: &Credentials<'_>,
        hostname: &str,
        client_id: &str,
    ) -> Result<(), Error>
    where
        T: TlsConnect<Connection = C>,
    {
        if credentials.client_cert.is_empty() || credentials.client_key.is_empty() {
            error!("client certificate or key missing");
            return Err(Error::Credential);
        }
        let thing_name: String<MAX_CLIENT_ID_LEN> =
            String::try_from(client_id).map_err(|_| Error::BufferTooSmall)?;

        // Sockets are never reused: drop whatever was there before.
        self.transport.close();
        self.status = ConnectionStatus::Disconnected;

        let connection = self.open_tls(network, credentials, hostname)?;
        self.transport.attach(connection);

        if let Err(e) = self.handshake(client_id) {
            error!("MQTT connect to {} failed: {}", hostname, e);
            self.transport.close();
            return Err(e);
        }

        self.thing_name = thing_name;
        self.status = ConnectionStatus::Connected;
        self.next_packet_id = 1;
        self.acks.clear();
        self.ping_sent_ms = None;
        self.connections = self.connections.wrapping_add(1);
        info!("connected to {} as {}", hostname, client_id);
        Ok(())
    }

    fn open_tls<T>(
        &self,
        interface: &mut T,
        credentials: &Credentials<'_>,
        hostname: &str,
    ) -> Result<C, Error>
    where
        T: TlsConnect<Connection = C>,
    {
        let mut request = ConnectRequest {
            hostname,
            port: self.options.port,
            timeout_ms: self.options.socket_timeout_ms,
            client_cert: credentials.client_cert,
            client_key: credentials.client_key,
            root_ca: self.roots.primary(),
        };

        match interface.connect(&request) {
            Ok(connection) => Ok(connection),
            Err(network::Error::HandshakeFailed) => {
                let Some(backup) = self.roots.backup() else {
                    error!("TLS handshake with {} failed", hostname);
                    return Err(Error::Tls);
                };
                warn!("TLS handshake failed with primary root CA, trying backup");
                request.root_ca = backup;
                match interface.connect(&request) {
                    Ok(connection) => Ok(connection),
                    Err(network::Error::HandshakeFailed) => {
                        error!("TLS handshake with {} failed with backup root CA", hostname);
                        Err(Error::Tls)
                    }
                    Err(e) => Err(Error::Network(e)),
                }
            }
            Err(e) => {
                error!("socket connect to {} failed: {}", hostname, e);
                Err(Error::Network(e))
            }
        }
    }

    /// CONNECT / CONNACK exchange on a freshly attached transport.
    fn handshake(&mut self, client_id: &str) -> Result<(), Error> {
        codec::encode_connect(
            &mut self.buffer,
            client_id,
            self.options.keep_alive_seconds,
            self.options.clean_session,
        )?;
        self.send_buffer()?;

        let header = self
            .read_packet(true)?
            .ok_or(Error::Network(network::Error::Timeout))?;

        match codec::decode(header, &self.buffer)? {
            Packet::ConnAck {
                return_code: 0,
                session_present,
            } => {
                debug!("CONNACK accepted, session present: {}", session_present);
                Ok(())
            }
            Packet::ConnAck { return_code, .. } => {
                Err(Error::Protocol(ProtocolError::ConnectionRefused(return_code)))
            }
            _ => Err(Error::Protocol(ProtocolError::UnexpectedPacket)),
        }
    }

    /// Returns `true` if the last connect succeeded and no disconnect followed.
    ///
    /// Does not touch the network.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Sends DISCONNECT (if connected) and closes the socket.
    ///
    /// The socket is closed and the status set to disconnected whatever the
    /// outcome of the DISCONNECT send; a send failure is still reported.
    /// Calling this while already disconnected does nothing and succeeds.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        let result = if self.is_connected() {
            self.send_raw(&codec::DISCONNECT_PACKET)
        } else {
            Ok(())
        };

        self.transport.close();
        self.status = ConnectionStatus::Disconnected;
        self.ping_sent_ms = None;

        if let Err(e) = result {
            warn!("DISCONNECT not delivered: {}", e);
        } else {
            info!("disconnected");
        }
        result
    }

    /// Subscribes to `filter`, returning the packet identifier used.
    ///
    /// The SUBACK is processed later by the response pump; its outcome can be
    /// read with [`Session::ack_status`]. Subscribing twice to the same filter
    /// is legal and succeeds both times.
    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<u16, Error> {
        self.ensure_connected()?;
        let packet_id = self.next_packet_id();
        codec::encode_subscribe(&mut self.buffer, packet_id, filter, qos)?;
        self.send_buffer()?;
        self.track_ack(packet_id, AckKind::Subscribe);
        debug!("SUBSCRIBE {} (packet {})", filter, packet_id);
        Ok(packet_id)
    }

    /// Unsubscribes from `filter`, returning the packet identifier used.
    pub fn unsubscribe(&mut self, filter: &str) -> Result<u16, Error> {
        self.ensure_connected()?;
        let packet_id = self.next_packet_id();
        codec::encode_unsubscribe(&mut self.buffer, packet_id, filter)?;
        self.send_buffer()?;
        self.track_ack(packet_id, AckKind::Unsubscribe);
        debug!("UNSUBSCRIBE {} (packet {})", filter, packet_id);
        Ok(packet_id)
    }

    /// Publishes `payload` to `topic`.
    ///
    /// At QoS 0 this returns as soon as the packet is handed to the transport.
    /// At QoS 1/2 the acknowledgement is tracked like a SUBACK.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), Error> {
        self.ensure_connected()?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(self.next_packet_id()),
        };

        let publish = Publish {
            topic,
            payload,
            qos,
            packet_id,
            dup: false,
            retain: false,
        };
        codec::encode_publish(&mut self.buffer, &publish)?;
        self.send_buffer()?;

        if let Some(id) = packet_id {
            self.track_ack(id, AckKind::Publish);
        }
        trace!("PUBLISH {} ({} bytes)", topic, payload.len());
        Ok(())
    }

    /// Acknowledgement state of a request sent by this session, if tracked.
    pub fn ack_status(&self, packet_id: u16) -> Option<AckStatus> {
        self.acks.get(&packet_id).map(|ack| ack.status)
    }

    /// Kind of request a tracked packet identifier belongs to.
    pub fn ack_kind(&self, packet_id: u16) -> Option<AckKind> {
        self.acks.get(&packet_id).map(|ack| ack.kind)
    }

    /// Stops tracking a packet identifier.
    pub fn release_ack(&mut self, packet_id: u16) {
        self.acks.remove(&packet_id);
    }

    /// Number of tracked requests still waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.acks
            .values()
            .filter(|ack| ack.status == AckStatus::Pending)
            .count()
    }

    /// The thing name (MQTT client identifier) of the last successful connect.
    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Number of successful connects so far, wrapping.
    ///
    /// Changes whenever the broker-side session is replaced, so state tied to
    /// one connection can be recognised as stale.
    pub fn connections(&self) -> u32 {
        self.connections
    }

    /// Options this session was created with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Current time according to the session clock.
    pub fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Root certificates parsed at initialization.
    pub fn root_certificates(&self) -> &RootCertificates {
        &self.roots
    }

    pub(super) fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Protocol(ProtocolError::NotConnected))
        }
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = match self.next_packet_id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }

    fn send_buffer(&mut self) -> Result<(), Error> {
        self.transport.send(&self.buffer)?;
        self.last_sent_ms = self.clock.now_ms();
        Ok(())
    }

    pub(super) fn send_raw(&mut self, packet: &[u8]) -> Result<(), Error> {
        self.transport.send(packet)?;
        self.last_sent_ms = self.clock.now_ms();
        Ok(())
    }

    fn track_ack(&mut self, packet_id: u16, kind: AckKind) {
        if self.acks.len() >= MAX_PENDING_ACKS && !self.acks.contains_key(&packet_id) {
            let settled = self
                .acks
                .iter()
                .find(|(_, ack)| ack.status != AckStatus::Pending)
                .map(|(id, _)| *id);
            match settled {
                Some(id) => {
                    self.acks.remove(&id);
                }
                None => {
                    warn!("ack table full, packet {} not tracked", packet_id);
                    return;
                }
            }
        }

        let ack = PendingAck {
            kind,
            status: AckStatus::Pending,
        };
        if self.acks.insert(packet_id, ack).is_err() {
            warn!("ack table full, packet {} not tracked", packet_id);
        }
    }

    pub(super) fn complete_ack(&mut self, packet_id: u16, status: AckStatus) {
        match self.acks.get_mut(&packet_id) {
            Some(ack) => {
                if status == AckStatus::Failed {
                    warn!("broker refused request {}", packet_id);
                }
                ack.status = status;
            }
            None => debug!("acknowledgement for untracked packet {}", packet_id),
        }
    }
}

impl<C, K, H, const N: usize> core::fmt::Debug for Session<C, K, H, N>
where
    C: Connection,
    K: Clock,
    H: Notify,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("thing_name", &self.thing_name.as_str())
            .field("options", &self.options)
            .field("tracked_acks", &self.acks.len())
            .finish_non_exhaustive()
    }
}
