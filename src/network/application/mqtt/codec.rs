//! MQTT 3.1.1 packet codec.
//!
//! Serializes outbound control packets into a caller supplied fixed-capacity
//! buffer and decodes inbound packets in place. Nothing here allocates or grows
//! a buffer: a packet that does not fit fails with
//! [`CodecError::BufferTooSmall`].

use heapless::Vec;

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
pub const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
pub const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier (flags cleared).
pub const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
pub const PUBACK: u8 = 0x40;
/// MQTT PUBREC packet type identifier.
pub const PUBREC: u8 = 0x50;
/// MQTT PUBREL packet type identifier (with its mandatory flags).
pub const PUBREL: u8 = 0x62;
/// MQTT PUBCOMP packet type identifier.
pub const PUBCOMP: u8 = 0x70;
/// MQTT SUBSCRIBE packet type identifier (with its mandatory flags).
pub const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
pub const SUBACK: u8 = 0x90;
/// MQTT UNSUBSCRIBE packet type identifier (with its mandatory flags).
pub const UNSUBSCRIBE: u8 = 0xA2;
/// MQTT UNSUBACK packet type identifier.
pub const UNSUBACK: u8 = 0xB0;
/// MQTT PINGREQ packet type identifier.
pub const PINGREQ: u8 = 0xC0;
/// MQTT PINGRESP packet type identifier.
pub const PINGRESP: u8 = 0xD0;
/// MQTT DISCONNECT packet type identifier.
pub const DISCONNECT: u8 = 0xE0;

/// A complete PINGREQ packet.
pub const PINGREQ_PACKET: [u8; 2] = [PINGREQ, 0];
/// A complete DISCONNECT packet.
pub const DISCONNECT_PACKET: [u8; 2] = [DISCONNECT, 0];

/// SUBACK return code signalling a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// MQTT protocol name carried in CONNECT.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Largest value the variable-length "remaining length" field can hold.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Codec failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The output buffer cannot hold the packet.
    BufferTooSmall,
    /// A topic name or filter violates MQTT naming rules.
    InvalidTopic,
    /// Inbound bytes do not form a valid packet.
    MalformedPacket,
    /// The packet type is valid MQTT but never sent by a broker to a client.
    UnexpectedPacket,
}

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QoS {
    /// At most once delivery. Used for all shadow traffic.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(CodecError::MalformedPacket),
        }
    }
}

/// A PUBLISH packet, borrowed from a buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Publish<'a> {
    /// Topic name.
    pub topic: &'a str,
    /// Application payload.
    pub payload: &'a [u8],
    /// Delivery guarantee.
    pub qos: QoS,
    /// Packet identifier, present iff `qos` is above `AtMostOnce`.
    pub packet_id: Option<u16>,
    /// Redelivery flag.
    pub dup: bool,
    /// Retain flag.
    pub retain: bool,
}

/// A decoded inbound packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Packet<'a> {
    /// Connection acknowledgement.
    ConnAck {
        /// Whether the broker resumed a stored session.
        session_present: bool,
        /// 0 on success, 1-5 for the standard refusal reasons.
        return_code: u8,
    },
    /// Application message.
    Publish(Publish<'a>),
    /// QoS 1 publish acknowledgement.
    PubAck(u16),
    /// QoS 2 publish received.
    PubRec(u16),
    /// QoS 2 publish release.
    PubRel(u16),
    /// QoS 2 publish complete.
    PubComp(u16),
    /// Subscription acknowledgement for a single-filter SUBSCRIBE.
    SubAck {
        /// Identifier of the acknowledged SUBSCRIBE.
        packet_id: u16,
        /// Granted QoS (0-2) or [`SUBACK_FAILURE`].
        return_code: u8,
    },
    /// Unsubscription acknowledgement.
    UnsubAck(u16),
    /// Keepalive response.
    PingResp,
}

/// Appends MQTT fields to a fixed-capacity buffer.
struct Writer<'b, const N: usize> {
    buf: &'b mut Vec<u8, N>,
}

impl<'b, const N: usize> Writer<'b, N> {
    /// Clears `buf` and writes the fixed header for a packet whose variable
    /// header and payload are `remaining_len` bytes long.
    fn start(buf: &'b mut Vec<u8, N>, header: u8, remaining_len: usize) -> Result<Self, CodecError> {
        buf.clear();
        let mut writer = Self { buf };
        writer.byte(header)?;
        writer.remaining_length(remaining_len)?;
        if writer.buf.capacity() - writer.buf.len() < remaining_len {
            return Err(CodecError::BufferTooSmall);
        }
        Ok(writer)
    }

    fn byte(&mut self, value: u8) -> Result<(), CodecError> {
        self.buf.push(value).map_err(|_| CodecError::BufferTooSmall)
    }

    fn u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.bytes(&value.to_be_bytes())
    }

    fn bytes(&mut self, value: &[u8]) -> Result<(), CodecError> {
        self.buf
            .extend_from_slice(value)
            .map_err(|_| CodecError::BufferTooSmall)
    }

    /// Length-prefixed UTF-8 string.
    fn string(&mut self, value: &str) -> Result<(), CodecError> {
        self.u16(value.len() as u16)?;
        self.bytes(value.as_bytes())
    }

    /// Encode the remaining length field for an MQTT packet.
    ///
    /// Each byte carries 7 bits of the value; the high bit says another byte
    /// follows. At most four bytes are used.
    fn remaining_length(&mut self, mut len: usize) -> Result<(), CodecError> {
        if len > MAX_REMAINING_LENGTH {
            return Err(CodecError::BufferTooSmall);
        }
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            self.byte(byte)?;
            if len == 0 {
                return Ok(());
            }
        }
    }
}

/// Serializes a CONNECT packet.
pub fn encode_connect<const N: usize>(
    buf: &mut Vec<u8, N>,
    client_id: &str,
    keep_alive_seconds: u16,
    clean_session: bool,
) -> Result<(), CodecError> {
    if client_id.len() > u16::MAX as usize {
        return Err(CodecError::BufferTooSmall);
    }

    // protocol name (2 + 4), level, flags, keepalive (2), client id (2 + n)
    let remaining_len = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2 + 2 + client_id.len();
    let mut w = Writer::start(buf, CONNECT, remaining_len)?;

    w.u16(PROTOCOL_NAME.len() as u16)?;
    w.bytes(PROTOCOL_NAME)?;
    w.byte(PROTOCOL_LEVEL)?;

    let mut connect_flags = 0;
    if clean_session {
        connect_flags |= 0x02;
    }
    w.byte(connect_flags)?;
    w.u16(keep_alive_seconds)?;
    w.string(client_id)
}

/// Serializes a PUBLISH packet.
pub fn encode_publish<const N: usize>(
    buf: &mut Vec<u8, N>,
    publish: &Publish<'_>,
) -> Result<(), CodecError> {
    validate_topic_name(publish.topic)?;

    let packet_id = match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, _) => None,
        (_, Some(id)) if id != 0 => Some(id),
        _ => return Err(CodecError::MalformedPacket),
    };

    let mut header = PUBLISH | ((publish.qos as u8) << 1);
    if publish.dup {
        header |= 0x08;
    }
    if publish.retain {
        header |= 0x01;
    }

    let id_len = if packet_id.is_some() { 2 } else { 0 };
    let remaining_len = 2 + publish.topic.len() + id_len + publish.payload.len();
    let mut w = Writer::start(buf, header, remaining_len)?;

    w.string(publish.topic)?;
    if let Some(id) = packet_id {
        w.u16(id)?;
    }
    w.bytes(publish.payload)
}

/// Serializes a single-filter SUBSCRIBE packet.
pub fn encode_subscribe<const N: usize>(
    buf: &mut Vec<u8, N>,
    packet_id: u16,
    filter: &str,
    qos: QoS,
) -> Result<(), CodecError> {
    validate_topic_filter(filter)?;
    if packet_id == 0 {
        return Err(CodecError::MalformedPacket);
    }

    let remaining_len = 2 + 2 + filter.len() + 1;
    let mut w = Writer::start(buf, SUBSCRIBE, remaining_len)?;
    w.u16(packet_id)?;
    w.string(filter)?;
    w.byte(qos as u8)
}

/// Serializes a single-filter UNSUBSCRIBE packet.
pub fn encode_unsubscribe<const N: usize>(
    buf: &mut Vec<u8, N>,
    packet_id: u16,
    filter: &str,
) -> Result<(), CodecError> {
    validate_topic_filter(filter)?;
    if packet_id == 0 {
        return Err(CodecError::MalformedPacket);
    }

    let remaining_len = 2 + 2 + filter.len();
    let mut w = Writer::start(buf, UNSUBSCRIBE, remaining_len)?;
    w.u16(packet_id)?;
    w.string(filter)
}

/// Builds a two-byte-identifier acknowledgement (PUBACK, PUBREC, PUBREL or
/// PUBCOMP).
pub fn encode_ack(packet_type: u8, packet_id: u16) -> [u8; 4] {
    let [hi, lo] = packet_id.to_be_bytes();
    [packet_type, 2, hi, lo]
}

/// Feeds the bytes of a remaining length field seen so far.
///
/// Returns `Ok(Some(len))` once the field is complete, `Ok(None)` if another
/// byte is needed, and an error if the field runs past four bytes.
pub fn decode_remaining_length(bytes: &[u8]) -> Result<Option<usize>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in bytes.iter().enumerate() {
        if i >= 4 {
            return Err(CodecError::MalformedPacket);
        }
        value += (byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
        multiplier *= 128;
    }
    if bytes.len() >= 4 {
        return Err(CodecError::MalformedPacket);
    }
    Ok(None)
}

/// Decodes a packet from its first header byte and its body (everything
/// after the remaining length field).
pub fn decode(header: u8, body: &[u8]) -> Result<Packet<'_>, CodecError> {
    match header & 0xF0 {
        PUBLISH => decode_publish(header, body).map(Packet::Publish),
        CONNACK => {
            expect_flags(header, 0)?;
            let [flags, return_code] = body else {
                return Err(CodecError::MalformedPacket);
            };
            Ok(Packet::ConnAck {
                session_present: flags & 0x01 != 0,
                return_code: *return_code,
            })
        }
        PUBACK => packet_id_only(header, 0, body).map(Packet::PubAck),
        PUBREC => packet_id_only(header, 0, body).map(Packet::PubRec),
        0x60 => packet_id_only(header, PUBREL & 0x0F, body).map(Packet::PubRel),
        PUBCOMP => packet_id_only(header, 0, body).map(Packet::PubComp),
        SUBACK => {
            expect_flags(header, 0)?;
            let [hi, lo, return_code, ..] = body else {
                return Err(CodecError::MalformedPacket);
            };
            Ok(Packet::SubAck {
                packet_id: u16::from_be_bytes([*hi, *lo]),
                return_code: *return_code,
            })
        }
        UNSUBACK => packet_id_only(header, 0, body).map(Packet::UnsubAck),
        PINGRESP => {
            expect_flags(header, 0)?;
            if !body.is_empty() {
                return Err(CodecError::MalformedPacket);
            }
            Ok(Packet::PingResp)
        }
        CONNECT | 0x80 | 0xA0 | PINGREQ | DISCONNECT => Err(CodecError::UnexpectedPacket),
        _ => Err(CodecError::MalformedPacket),
    }
}

fn decode_publish(header: u8, body: &[u8]) -> Result<Publish<'_>, CodecError> {
    let qos = QoS::try_from((header >> 1) & 0x03)?;

    let [hi, lo, rest @ ..] = body else {
        return Err(CodecError::MalformedPacket);
    };
    let topic_len = u16::from_be_bytes([*hi, *lo]) as usize;
    if rest.len() < topic_len {
        return Err(CodecError::MalformedPacket);
    }
    let (topic, rest) = rest.split_at(topic_len);
    let topic = core::str::from_utf8(topic).map_err(|_| CodecError::MalformedPacket)?;

    let (packet_id, payload) = match qos {
        QoS::AtMostOnce => (None, rest),
        _ => {
            let [hi, lo, payload @ ..] = rest else {
                return Err(CodecError::MalformedPacket);
            };
            (Some(u16::from_be_bytes([*hi, *lo])), payload)
        }
    };

    Ok(Publish {
        topic,
        payload,
        qos,
        packet_id,
        dup: header & 0x08 != 0,
        retain: header & 0x01 != 0,
    })
}

fn expect_flags(header: u8, flags: u8) -> Result<(), CodecError> {
    if header & 0x0F == flags {
        Ok(())
    } else {
        Err(CodecError::MalformedPacket)
    }
}

fn packet_id_only(header: u8, flags: u8, body: &[u8]) -> Result<u16, CodecError> {
    expect_flags(header, flags)?;
    match body {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(CodecError::MalformedPacket),
    }
}

/// Topic names must be non-empty and free of wildcards and NUL.
fn validate_topic_name(topic: &str) -> Result<(), CodecError> {
    if topic.is_empty()
        || topic.len() > u16::MAX as usize
        || topic.contains(['+', '#', '\0'])
    {
        return Err(CodecError::InvalidTopic);
    }
    Ok(())
}

/// Topic filters may use `+` for a whole level and `#` for a trailing level.
fn validate_topic_filter(filter: &str) -> Result<(), CodecError> {
    if filter.is_empty() || filter.len() > u16::MAX as usize || filter.contains('\0') {
        return Err(CodecError::InvalidTopic);
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let is_last = levels.peek().is_none();
        match level {
            "+" => {}
            "#" if is_last => {}
            _ if level.contains(['+', '#']) => return Err(CodecError::InvalidTopic),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_matches_wire_format() {
        let mut buf: Vec<u8, 64> = Vec::new();
        encode_connect(&mut buf, "dev", 60, true).unwrap();
        assert_eq!(
            buf.as_slice(),
            &[
                0x10, 15, 0, 4, b'M', b'Q', b'T', b'T', 4, 0x02, 0, 60, 0, 3, b'd', b'e', b'v'
            ]
        );
    }

    #[test]
    fn qos0_publish_has_no_packet_id() {
        let mut buf: Vec<u8, 64> = Vec::new();
        let publish = Publish {
            topic: "a/b",
            payload: b"hi",
            qos: QoS::AtMostOnce,
            packet_id: Some(7),
            dup: false,
            retain: false,
        };
        encode_publish(&mut buf, &publish).unwrap();
        assert_eq!(buf.as_slice(), &[0x30, 7, 0, 3, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn qos1_publish_requires_packet_id() {
        let mut buf: Vec<u8, 64> = Vec::new();
        let mut publish = Publish {
            topic: "t",
            payload: b"",
            qos: QoS::AtLeastOnce,
            packet_id: None,
            dup: false,
            retain: false,
        };
        assert_eq!(
            encode_publish(&mut buf, &publish),
            Err(CodecError::MalformedPacket)
        );

        publish.packet_id = Some(0x0102);
        encode_publish(&mut buf, &publish).unwrap();
        assert_eq!(buf.as_slice(), &[0x32, 5, 0, 1, b't', 0x01, 0x02]);
    }

    #[test]
    fn publish_rejects_wildcards_and_oversize() {
        let mut small: Vec<u8, 8> = Vec::new();
        let publish = Publish {
            topic: "sensors/#",
            payload: b"",
            qos: QoS::AtMostOnce,
            packet_id: None,
            dup: false,
            retain: false,
        };
        assert_eq!(
            encode_publish(&mut small, &publish),
            Err(CodecError::InvalidTopic)
        );

        let publish = Publish {
            topic: "sensors/temp",
            ..publish
        };
        assert_eq!(
            encode_publish(&mut small, &publish),
            Err(CodecError::BufferTooSmall)
        );
    }

    #[test]
    fn subscribe_matches_wire_format() {
        let mut buf: Vec<u8, 64> = Vec::new();
        encode_subscribe(&mut buf, 1, "x/+", QoS::AtMostOnce).unwrap();
        assert_eq!(buf.as_slice(), &[0x82, 8, 0, 1, 0, 3, b'x', b'/', b'+', 0]);

        encode_unsubscribe(&mut buf, 2, "x/+").unwrap();
        assert_eq!(buf.as_slice(), &[0xA2, 7, 0, 2, 0, 3, b'x', b'/', b'+']);
    }

    #[test]
    fn filter_wildcard_rules() {
        assert!(validate_topic_filter("a/+/c").is_ok());
        assert!(validate_topic_filter("a/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert_eq!(validate_topic_filter("a/#/c"), Err(CodecError::InvalidTopic));
        assert_eq!(validate_topic_filter("a/b+"), Err(CodecError::InvalidTopic));
        assert_eq!(validate_topic_filter(""), Err(CodecError::InvalidTopic));
    }

    #[test]
    fn remaining_length_spans_multiple_bytes() {
        let mut buf: Vec<u8, 256> = Vec::new();
        let payload = [0u8; 200];
        let publish = Publish {
            topic: "t",
            payload: &payload,
            qos: QoS::AtMostOnce,
            packet_id: None,
            dup: false,
            retain: false,
        };
        encode_publish(&mut buf, &publish).unwrap();
        // 203 = 0xCB -> 0xCB | 0x80, 0x01
        assert_eq!(&buf[..3], &[0x30, 0xCB, 0x01]);
        assert_eq!(decode_remaining_length(&buf[1..3]), Ok(Some(203)));
        assert_eq!(decode_remaining_length(&buf[1..2]), Ok(None));
        assert_eq!(
            decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Err(CodecError::MalformedPacket)
        );
    }

    #[test]
    fn decodes_inbound_publish() {
        let body = [0, 3, b'a', b'/', b'b', 0x00, 0x09, b'o', b'k'];
        let packet = decode(0x33, &body).unwrap();
        assert_eq!(
            packet,
            Packet::Publish(Publish {
                topic: "a/b",
                payload: b"ok",
                qos: QoS::AtLeastOnce,
                packet_id: Some(9),
                dup: false,
                retain: true,
            })
        );
    }

    #[test]
    fn decodes_control_packets() {
        assert_eq!(
            decode(CONNACK, &[0, 5]),
            Ok(Packet::ConnAck {
                session_present: false,
                return_code: 5
            })
        );
        assert_eq!(
            decode(SUBACK, &[0, 4, SUBACK_FAILURE]),
            Ok(Packet::SubAck {
                packet_id: 4,
                return_code: SUBACK_FAILURE
            })
        );
        assert_eq!(decode(UNSUBACK, &[0, 2]), Ok(Packet::UnsubAck(2)));
        assert_eq!(decode(PUBREL, &[1, 0]), Ok(Packet::PubRel(256)));
        assert_eq!(decode(PINGRESP, &[]), Ok(Packet::PingResp));
    }

    #[test]
    fn rejects_bad_inbound_packets() {
        assert_eq!(decode(0x36, &[0, 1, b'a']), Err(CodecError::MalformedPacket));
        assert_eq!(decode(0x30, &[0, 9, b'a']), Err(CodecError::MalformedPacket));
        assert_eq!(decode(0x60, &[0, 1]), Err(CodecError::MalformedPacket));
        assert_eq!(decode(CONNECT, &[]), Err(CodecError::UnexpectedPacket));
        assert_eq!(decode(0x00, &[]), Err(CodecError::MalformedPacket));
    }

    #[test]
    fn ack_layout() {
        assert_eq!(encode_ack(PUBACK, 0x1234), [0x40, 2, 0x12, 0x34]);
    }
}
