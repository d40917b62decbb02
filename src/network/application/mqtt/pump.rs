//! Inbound packet processing and keepalive.

use super::codec::{self, Packet, QoS};
use super::session::{AckStatus, Session};
use super::{Intercept, Notify, PassThrough};
use crate::error::{Error, ProtocolError};
use crate::network::{self, Connection, Transport};
use crate::time::{Clock, elapsed_ms};

/// What to do once the decoded packet no longer borrows the buffer.
enum Followup {
    None,
    Send([u8; 4]),
    Complete(u16, AckStatus),
    PingResp,
}

impl<C, K, H, const N: usize> Session<C, K, H, N>
where
    C: Connection,
    K: Clock,
    H: Notify,
{
    /// Drains every packet available on the transport, then services the
    /// keepalive.
    ///
    /// Each PUBLISH is handed to the session's handler; acknowledgements update
    /// the bookkeeping visible through [`Session::ack_status`]. Must be called
    /// regularly, at least once per keepalive interval.
    ///
    /// Any error means the connection is no longer in a known state and should
    /// be re-established.
    pub fn process_responses(&mut self) -> Result<(), Error> {
        self.process_responses_with(&mut PassThrough)
    }

    /// Like [`Session::process_responses`], but each PUBLISH is first offered
    /// to `interceptor`. Messages it claims never reach the handler.
    pub fn process_responses_with<I: Intercept>(&mut self, interceptor: &mut I) -> Result<(), Error> {
        self.ensure_connected()?;

        while let Some(header) = self.read_packet(false)? {
            self.handle_packet(header, interceptor)?;
        }

        self.service_keepalive()
    }

    /// Reads one packet into the buffer and returns its first header byte.
    ///
    /// Returns `Ok(None)` if no packet has started and `wait` is false. Once a
    /// header byte is seen, the rest of the packet must arrive within the
    /// socket timeout.
    pub(super) fn read_packet(&mut self, wait: bool) -> Result<Option<u8>, Error> {
        let started = self.clock.now_ms();
        let timeout_ms = self.options.socket_timeout_ms;

        let mut header = [0u8; 1];
        while self.transport.recv(&mut header)? == 0 {
            if !wait {
                return Ok(None);
            }
            if elapsed_ms(&self.clock, started) >= timeout_ms {
                return Err(Error::Network(network::Error::Timeout));
            }
        }

        let mut length = [0u8; 4];
        let mut count = 0;
        let remaining = loop {
            recv_exact(
                &mut self.transport,
                &self.clock,
                timeout_ms,
                started,
                &mut length[count..count + 1],
            )?;
            count += 1;
            if let Some(len) = codec::decode_remaining_length(&length[..count])? {
                break len;
            }
        };

        self.buffer.clear();
        if remaining > N {
            warn!("inbound packet of {} bytes exceeds buffer, discarding", remaining);
            self.discard(remaining, started)?;
            return Err(Error::Protocol(ProtocolError::PacketTooLarge));
        }

        self.buffer
            .resize(remaining, 0)
            .map_err(|_| Error::BufferTooSmall)?;
        recv_exact(
            &mut self.transport,
            &self.clock,
            timeout_ms,
            started,
            &mut self.buffer,
        )?;

        Ok(Some(header[0]))
    }

    /// Reads and drops `len` bytes so the stream stays aligned on packet
    /// boundaries.
    fn discard(&mut self, mut len: usize, started: u32) -> Result<(), Error> {
        let mut scratch = [0u8; 64];
        while len > 0 {
            let chunk = len.min(scratch.len());
            recv_exact(
                &mut self.transport,
                &self.clock,
                self.options.socket_timeout_ms,
                started,
                &mut scratch[..chunk],
            )?;
            len -= chunk;
        }
        Ok(())
    }

    fn handle_packet<I: Intercept>(&mut self, header: u8, interceptor: &mut I) -> Result<(), Error> {
        let followup = match codec::decode(header, &self.buffer)? {
            Packet::Publish(publish) => {
                if !interceptor.intercept(publish.topic, publish.payload) {
                    self.handler.notify(publish.topic, publish.payload);
                }
                match (publish.qos, publish.packet_id) {
                    (QoS::AtLeastOnce, Some(id)) => {
                        Followup::Send(codec::encode_ack(codec::PUBACK, id))
                    }
                    (QoS::ExactlyOnce, Some(id)) => {
                        Followup::Send(codec::encode_ack(codec::PUBREC, id))
                    }
                    _ => Followup::None,
                }
            }
            Packet::PubAck(id) | Packet::PubComp(id) | Packet::UnsubAck(id) => {
                Followup::Complete(id, AckStatus::Acknowledged)
            }
            Packet::PubRec(id) => Followup::Send(codec::encode_ack(codec::PUBREL, id)),
            Packet::PubRel(id) => Followup::Send(codec::encode_ack(codec::PUBCOMP, id)),
            Packet::SubAck {
                packet_id,
                return_code,
            } => {
                let status = if return_code == codec::SUBACK_FAILURE {
                    AckStatus::Failed
                } else {
                    AckStatus::Acknowledged
                };
                Followup::Complete(packet_id, status)
            }
            Packet::PingResp => Followup::PingResp,
            Packet::ConnAck { .. } => {
                error!("CONNACK on an established session");
                return Err(Error::Protocol(ProtocolError::UnexpectedPacket));
            }
        };

        match followup {
            Followup::None => {}
            Followup::Send(packet) => self.send_raw(&packet)?,
            Followup::Complete(id, status) => self.complete_ack(id, status),
            Followup::PingResp => {
                trace!("PINGRESP");
                self.ping_sent_ms = None;
            }
        }
        Ok(())
    }

    fn service_keepalive(&mut self) -> Result<(), Error> {
        let Some(interval_ms) = self.options.keep_alive_ms() else {
            return Ok(());
        };

        if let Some(sent) = self.ping_sent_ms {
            if elapsed_ms(&self.clock, sent) >= self.options.ping_timeout_ms {
                error!("no PINGRESP within {} ms", self.options.ping_timeout_ms);
                return Err(Error::Protocol(ProtocolError::KeepAliveTimeout));
            }
            return Ok(());
        }

        if elapsed_ms(&self.clock, self.last_sent_ms) >= interval_ms {
            self.send_raw(&codec::PINGREQ_PACKET)?;
            self.ping_sent_ms = Some(self.last_sent_ms);
            trace!("PINGREQ");
        }
        Ok(())
    }
}

/// Fills `buf` completely, failing once `timeout_ms` has passed since
/// `started`.
fn recv_exact<C: Connection>(
    transport: &mut Transport<C>,
    clock: &impl Clock,
    timeout_ms: u32,
    started: u32,
    buf: &mut [u8],
) -> Result<(), Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match transport.recv(&mut buf[filled..])? {
            0 if elapsed_ms(clock, started) >= timeout_ms => {
                return Err(Error::Network(network::Error::Timeout));
            }
            0 => {}
            n => filled += n,
        }
    }
    Ok(())
}
