//! Wire format of the BattlEye RCon protocol.
//!
//! ```text
//! 'B' 'E' | crc32 (LE, over the rest) | 0xFF | type | payload
//! ```
use crate::{crc, error::RconError};

/// Length of `'B' 'E' | crc32 | 0xFF | type`.
pub const HEADER_SIZE: usize = 8;

const MARKER: [u8; 2] = *b"BE";
// First byte covered by the checksum, always present before the type.
const SEQUENCE_MARKER: u8 = 0xFF;
// Leading byte of a command response body that announces a multipart reply.
const MULTIPART_MARKER: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Login,
    Command,
    Message,
}

impl PacketType {
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::Login => 0x00,
            PacketType::Command => 0x01,
            PacketType::Message => 0x02,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = RconError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketType::Login),
            0x01 => Ok(PacketType::Command),
            0x02 => Ok(PacketType::Message),
            other => Err(RconError::UnknownPacketType(other)),
        }
    }
}

/// A packet sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Login { password: String },
    /// An empty `command` doubles as the keepalive probe.
    Command { sequence: u8, command: String },
    /// Echoes the token of a server message back to the server.
    MessageAck { token: u8 },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Login { .. } => PacketType::Login,
            Packet::Command { .. } => PacketType::Command,
            Packet::MessageAck { .. } => PacketType::Message,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Packet::Login { password } => payload.extend_from_slice(password.as_bytes()),
            Packet::Command { sequence, command } => {
                payload.push(*sequence);
                payload.extend_from_slice(command.as_bytes());
            }
            Packet::MessageAck { token } => payload.push(*token),
        }
        frame(self.packet_type(), &payload)
    }

    /// Parses a client-originated datagram. This is the server's view of the
    /// wire and is what the loopback [crate::server::Server] uses.
    pub fn unpack(datagram: &[u8]) -> Result<Self, RconError> {
        let (packet_type, payload) = verify(datagram)?;
        match packet_type {
            PacketType::Login => Ok(Packet::Login {
                password: String::from_utf8_lossy(payload).into_owned(),
            }),
            PacketType::Command => {
                let (&sequence, command) = payload
                    .split_first()
                    .ok_or(RconError::TruncatedPayload(packet_type))?;
                Ok(Packet::Command {
                    sequence,
                    command: String::from_utf8_lossy(command).into_owned(),
                })
            }
            PacketType::Message => {
                let &token = payload
                    .first()
                    .ok_or(RconError::TruncatedPayload(packet_type))?;
                Ok(Packet::MessageAck { token })
            }
        }
    }
}

/// A packet sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Login { success: bool },
    /// A command reply without a body. Acknowledges keepalive probes.
    Ack { sequence: u8 },
    Command { sequence: u8, body: String },
    /// One piece of a reply too long for a single datagram. The body is kept
    /// as raw bytes since a fragment boundary may split a UTF-8 character.
    Fragment {
        sequence: u8,
        total: u8,
        index: u8,
        body: Vec<u8>,
    },
    /// Server-pushed notice. `token` must be echoed back with
    /// [Packet::MessageAck].
    Message { token: u8, body: String },
}

impl Response {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Response::Login { .. } => PacketType::Login,
            Response::Ack { .. } | Response::Command { .. } | Response::Fragment { .. } => {
                PacketType::Command
            }
            Response::Message { .. } => PacketType::Message,
        }
    }

    pub fn unpack(datagram: &[u8]) -> Result<Self, RconError> {
        let (packet_type, payload) = verify(datagram)?;
        let truncated = RconError::TruncatedPayload(packet_type);
        match packet_type {
            PacketType::Login => {
                let &flag = payload.first().ok_or(truncated)?;
                Ok(Response::Login {
                    success: flag == 0x01,
                })
            }
            PacketType::Command => match payload {
                [] => Err(truncated),
                [sequence] => Ok(Response::Ack {
                    sequence: *sequence,
                }),
                [sequence, MULTIPART_MARKER, rest @ ..] => match rest {
                    [total, index, body @ ..] => Ok(Response::Fragment {
                        sequence: *sequence,
                        total: *total,
                        index: *index,
                        body: body.to_vec(),
                    }),
                    _ => Err(truncated),
                },
                [sequence, body @ ..] => Ok(Response::Command {
                    sequence: *sequence,
                    body: String::from_utf8_lossy(body).into_owned(),
                }),
            },
            PacketType::Message => {
                let (&token, body) = payload.split_first().ok_or(truncated)?;
                Ok(Response::Message {
                    token,
                    body: String::from_utf8_lossy(body).into_owned(),
                })
            }
        }
    }

    /// Stamps a server-originated datagram.
    pub fn pack(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Response::Login { success } => payload.push(u8::from(*success)),
            Response::Ack { sequence } => payload.push(*sequence),
            Response::Command { sequence, body } => {
                payload.push(*sequence);
                payload.extend_from_slice(body.as_bytes());
            }
            Response::Fragment {
                sequence,
                total,
                index,
                body,
            } => {
                payload.extend_from_slice(&[*sequence, MULTIPART_MARKER, *total, *index]);
                payload.extend_from_slice(body);
            }
            Response::Message { token, body } => {
                payload.push(*token);
                payload.extend_from_slice(body.as_bytes());
            }
        }
        frame(self.packet_type(), &payload)
    }
}

fn frame(packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut checked = Vec::with_capacity(payload.len() + 2);
    checked.push(SEQUENCE_MARKER);
    checked.push(packet_type.to_byte());
    checked.extend_from_slice(payload);

    let mut datagram = Vec::with_capacity(HEADER_SIZE + payload.len());
    datagram.extend_from_slice(&MARKER);
    datagram.extend_from_slice(&crc::checksum(&checked).to_le_bytes());
    datagram.extend_from_slice(&checked);
    datagram
}

// Checks length, marker and checksum, returning the type and the payload
// that follows it.
fn verify(datagram: &[u8]) -> Result<(PacketType, &[u8]), RconError> {
    if datagram.len() < HEADER_SIZE {
        return Err(RconError::PacketTooShort(datagram.len()));
    }
    if datagram[..2] != MARKER {
        return Err(RconError::BadMarker);
    }
    let expected = u32::from_le_bytes([datagram[2], datagram[3], datagram[4], datagram[5]]);
    let computed = crc::checksum(&datagram[6..]);
    if expected != computed {
        return Err(RconError::ChecksumMismatch { expected, computed });
    }
    let packet_type = PacketType::try_from(datagram[7])?;
    Ok((packet_type, &datagram[HEADER_SIZE..]))
}
