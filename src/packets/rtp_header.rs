//! The 12-byte (+ optional CSRC/extension) RTP header carried by every
//! RTP-MIDI payload packet (§4.1).

use bytes::{BufMut, BytesMut};

use crate::error::PacketError;
use crate::util::{take_n, take_u16_be, take_u32_be, take_u8};

/// Payload type AppleMIDI reserves for RTP-MIDI.
pub const RTP_MIDI_PAYLOAD_TYPE: u8 = 0x61;
const RTP_VERSION: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct RtpHeader {
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
}

impl RtpHeader {
    pub fn new(sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self { padding: false, marker: false, payload_type: RTP_MIDI_PAYLOAD_TYPE, sequence_number, timestamp, ssrc, csrcs: Vec::new() }
    }

    /// Parses the fixed header, any CSRC list, and skips a header
    /// extension if present. Returns the header and the payload that
    /// follows it.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        let (byte0, rest) = take_u8(bytes)?;
        let (byte1, rest) = take_u8(rest)?;
        let version = byte0 >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::LengthMismatch);
        }
        let padding = byte0 & 0b0010_0000 != 0;
        let extension = byte0 & 0b0001_0000 != 0;
        let csrc_count = byte0 & 0x0F;
        let marker = byte1 & 0b1000_0000 != 0;
        let payload_type = byte1 & 0x7F;

        let (sequence_number, rest) = take_u16_be(rest)?;
        let (timestamp, rest) = take_u32_be(rest)?;
        let (ssrc, mut rest) = take_u32_be(rest)?;

        let mut csrcs = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            let (csrc, next) = take_u32_be(rest)?;
            csrcs.push(csrc);
            rest = next;
        }

        if extension {
            let (_id, next) = take_u16_be(rest)?;
            let (ext_len_words, next) = take_u16_be(next)?;
            let (_ext_payload, next) = take_n(next, ext_len_words as usize * 4)?;
            rest = next;
        }

        Ok((Self { padding, marker, payload_type, sequence_number, timestamp, ssrc, csrcs }, rest))
    }

    /// Writes the canonical fixed 12-byte header this crate always emits:
    /// no padding, no CSRCs, no extension.
    pub fn encode(&self, buf: &mut BytesMut) {
        let byte0 = (RTP_VERSION << 6) | (if self.padding { 0b0010_0000 } else { 0 });
        let byte1 = (if self.marker { 0b1000_0000 } else { 0 }) | (self.payload_type & 0x7F);
        buf.put_u8(byte0);
        buf.put_u8(byte1);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrcs {
            buf.put_u32(*csrc);
        }
    }
}
