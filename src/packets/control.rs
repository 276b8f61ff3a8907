//! AppleMIDI control packets (§4.1): session initiation, clock sync,
//! receiver feedback, and bitrate receive limit.
//!
//! Decoded and encoded as owned, slice-advancing values rather than
//! borrowed zerocopy views, so a `ClockSync`'s three timestamps are always
//! read eagerly instead of left for a caller to forget.

use bytes::{BufMut, BytesMut};

use crate::error::PacketError;
use crate::util::{take_optional_cstr, take_u16_be, take_u32_be, take_u64_be, take_u8};

pub const CONTROL_MAGIC: [u8; 2] = [0xFF, 0xFF];
const PROTOCOL_VERSION: u32 = 2;

const CMD_INVITATION: [u8; 2] = *b"IN";
const CMD_ACCEPTED: [u8; 2] = *b"OK";
const CMD_REJECTED: [u8; 2] = *b"NO";
const CMD_END: [u8; 2] = *b"BY";
const CMD_CLOCK_SYNC: [u8; 2] = *b"CK";
const CMD_RECEIVER_FEEDBACK: [u8; 2] = *b"RS";
const CMD_BITRATE_LIMIT: [u8; 2] = *b"RL";

/// Body shared by invitation, acceptance, rejection, and end packets.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInitiation {
    pub token: u32,
    pub ssrc: u32,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClockSync {
    pub ssrc: u32,
    pub count: u8,
    pub timestamps: [u64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverFeedback {
    pub ssrc: u32,
    pub sequence_number: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitrateReceiveLimit {
    pub ssrc: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlPacket {
    Invitation(SessionInitiation),
    Accepted(SessionInitiation),
    Rejected(SessionInitiation),
    End(SessionInitiation),
    ClockSync(ClockSync),
    ReceiverFeedback(ReceiverFeedback),
    BitrateReceiveLimit(BitrateReceiveLimit),
}

impl ControlPacket {
    pub fn is_control_packet(bytes: &[u8]) -> bool {
        bytes.starts_with(&CONTROL_MAGIC)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let (magic, rest) = crate::util::take_n(bytes, 2)?;
        if magic != CONTROL_MAGIC {
            return Err(PacketError::WrongMagic);
        }
        let (command, rest) = crate::util::take_n(rest, 2)?;
        let command: [u8; 2] = command.try_into().unwrap();

        match command {
            CMD_INVITATION => Ok(ControlPacket::Invitation(Self::decode_session_initiation(rest)?)),
            CMD_ACCEPTED => Ok(ControlPacket::Accepted(Self::decode_session_initiation(rest)?)),
            CMD_REJECTED => Ok(ControlPacket::Rejected(Self::decode_session_initiation(rest)?)),
            CMD_END => Ok(ControlPacket::End(Self::decode_session_initiation(rest)?)),
            CMD_CLOCK_SYNC => Ok(ControlPacket::ClockSync(Self::decode_clock_sync(rest)?)),
            CMD_RECEIVER_FEEDBACK => Ok(ControlPacket::ReceiverFeedback(Self::decode_receiver_feedback(rest)?)),
            CMD_BITRATE_LIMIT => Ok(ControlPacket::BitrateReceiveLimit(Self::decode_bitrate_limit(rest)?)),
            other => Err(PacketError::UnknownCommand(other)),
        }
    }

    fn decode_session_initiation(bytes: &[u8]) -> Result<SessionInitiation, PacketError> {
        let (_version, rest) = take_u32_be(bytes)?;
        let (token, rest) = take_u32_be(rest)?;
        let (ssrc, rest) = take_u32_be(rest)?;
        let (name, _rest) = take_optional_cstr(rest)?;
        Ok(SessionInitiation { token, ssrc, name })
    }

    fn decode_clock_sync(bytes: &[u8]) -> Result<ClockSync, PacketError> {
        let (ssrc, rest) = take_u32_be(bytes)?;
        let (count, rest) = take_u8(rest)?;
        let (_reserved, rest) = crate::util::take_n(rest, 3)?;
        let (ts1, rest) = take_u64_be(rest)?;
        let (ts2, rest) = take_u64_be(rest)?;
        let (ts3, _rest) = take_u64_be(rest)?;
        Ok(ClockSync { ssrc, count, timestamps: [ts1, ts2, ts3] })
    }

    fn decode_receiver_feedback(bytes: &[u8]) -> Result<ReceiverFeedback, PacketError> {
        let (ssrc, rest) = take_u32_be(bytes)?;
        let (sequence_number, rest) = take_u16_be(rest)?;
        let (_padding, _rest) = take_u16_be(rest)?;
        Ok(ReceiverFeedback { ssrc, sequence_number })
    }

    fn decode_bitrate_limit(bytes: &[u8]) -> Result<BitrateReceiveLimit, PacketError> {
        let (ssrc, rest) = take_u32_be(bytes)?;
        let (limit, _rest) = take_u32_be(rest)?;
        Ok(BitrateReceiveLimit { ssrc, limit })
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(&CONTROL_MAGIC);
        match self {
            ControlPacket::Invitation(body) => {
                buf.put_slice(&CMD_INVITATION);
                Self::encode_session_initiation(&mut buf, body);
            }
            ControlPacket::Accepted(body) => {
                buf.put_slice(&CMD_ACCEPTED);
                Self::encode_session_initiation(&mut buf, body);
            }
            ControlPacket::Rejected(body) => {
                buf.put_slice(&CMD_REJECTED);
                Self::encode_session_initiation(&mut buf, body);
            }
            ControlPacket::End(body) => {
                buf.put_slice(&CMD_END);
                Self::encode_session_initiation(&mut buf, body);
            }
            ControlPacket::ClockSync(sync) => {
                buf.put_slice(&CMD_CLOCK_SYNC);
                buf.put_u32(sync.ssrc);
                buf.put_u8(sync.count);
                buf.put_slice(&[0, 0, 0]);
                for ts in sync.timestamps {
                    buf.put_u64(ts);
                }
            }
            ControlPacket::ReceiverFeedback(feedback) => {
                buf.put_slice(&CMD_RECEIVER_FEEDBACK);
                buf.put_u32(feedback.ssrc);
                buf.put_u16(feedback.sequence_number);
                buf.put_u16(0);
            }
            ControlPacket::BitrateReceiveLimit(limit) => {
                buf.put_slice(&CMD_BITRATE_LIMIT);
                buf.put_u32(limit.ssrc);
                buf.put_u32(limit.limit);
            }
        }
        buf
    }

    fn encode_session_initiation(buf: &mut BytesMut, body: &SessionInitiation) {
        buf.put_u32(PROTOCOL_VERSION);
        buf.put_u32(body.token);
        buf.put_u32(body.ssrc);
        if let Some(name) = &body.name {
            buf.put_slice(name.as_bytes());
            buf.put_u8(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_round_trips() {
        let packet = ControlPacket::Invitation(SessionInitiation { token: 0xAABBCCDD, ssrc: 0x01020304, name: Some("A".to_string()) });
        let bytes = packet.encode();
        assert_eq!(
            &bytes[..],
            &[0xFF, 0xFF, 0x49, 0x4E, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0x01, 0x02, 0x03, 0x04, b'A', 0x00][..]
        );
        assert_eq!(ControlPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn clock_sync_decodes_real_timestamps() {
        let bytes = [
            0xFF, 0xFF, 0x43, 0x4B, 0xF5, 0x19, 0xAE, 0xB9, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03,
        ];
        let packet = ControlPacket::decode(&bytes).unwrap();
        assert_eq!(packet, ControlPacket::ClockSync(ClockSync { ssrc: 0xF519AEB9, count: 2, timestamps: [1, 2, 3] }));
    }

    #[test]
    fn unknown_command_is_an_error() {
        let bytes = [0xFF, 0xFF, 0x00, 0x00];
        assert_eq!(ControlPacket::decode(&bytes), Err(PacketError::UnknownCommand([0, 0])));
    }

    #[test]
    fn end_packet_may_have_unterminated_name() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&CONTROL_MAGIC);
        bytes.put_slice(&CMD_END);
        bytes.put_u32(PROTOCOL_VERSION);
        bytes.put_u32(1);
        bytes.put_u32(2);
        bytes.put_slice(b"no-nul");
        let packet = ControlPacket::decode(&bytes).unwrap();
        assert_eq!(packet, ControlPacket::End(SessionInitiation { token: 1, ssrc: 2, name: Some("no-nul".to_string()) }));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = [0x00, 0x00, 0x43, 0x4B];
        assert_eq!(ControlPacket::decode(&bytes), Err(PacketError::WrongMagic));
    }
}
