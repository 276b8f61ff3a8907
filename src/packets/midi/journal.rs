//! Recovery journal structural parser (§4.1 "Journal section", §1 Non-goals).
//!
//! Only the journal's presence-bit structure is parsed, well enough to
//! preserve its length-aware boundaries and re-emit it unchanged; chapter
//! payloads are kept as opaque bytes, never interpreted.

use bytes::{BufMut, BytesMut};

use crate::error::PacketError;
use crate::util::{take_n, take_u16_be, take_u8};

/// A system-journal entry: chapter contents kept opaque, structure and
/// length preserved for re-emission. `chapter_flags` holds the six
/// chapter-present bits (S,D,V,Q,F,X) right-aligned in the low 6 bits; the
/// top 2 bits of the wire byte are the chapter length's high bits, packed
/// the same way the channel journal packs its header.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemJournal {
    pub chapter_flags: u8,
    pub chapters: Vec<u8>,
}

/// One channel's journal entry: header fields kept, chapter bytes opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelJournal {
    pub single_loss: bool,
    pub channel: u8,
    pub enhanced: bool,
    pub chapter_presence: u8,
    pub chapters: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Journal {
    pub single_packet_loss: bool,
    pub enhanced_encoding: bool,
    pub checkpoint_seq: u16,
    pub system: Option<SystemJournal>,
    pub channels: Vec<ChannelJournal>,
}

const SINGLE_PACKET_LOSS: u8 = 0b1000_0000;
const SYSTEM_PRESENT: u8 = 0b0100_0000;
const CHANNEL_PRESENT: u8 = 0b0010_0000;
const ENHANCED_ENCODING: u8 = 0b0001_0000;

impl Journal {
    /// Decodes the journal header, optional system journal, and each
    /// channel journal named by the header's channel count.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        let (header, rest) = take_u8(bytes)?;
        let single_packet_loss = header & SINGLE_PACKET_LOSS != 0;
        let enhanced_encoding = header & ENHANCED_ENCODING != 0;
        let total_channels = (header & 0x0F) as usize + 1;
        let (checkpoint_seq, mut rest) = take_u16_be(rest)?;

        let system = if header & SYSTEM_PRESENT != 0 {
            let (byte0, next) = take_u8(rest)?;
            let (len_lo, next) = take_u8(next)?;
            let chapter_flags = byte0 >> 2;
            let length = (((byte0 & 0x03) as usize) << 8) | len_lo as usize;
            let (chapters, next) = take_n(next, length)?;
            rest = next;
            Some(SystemJournal { chapter_flags, chapters: chapters.to_vec() })
        } else {
            None
        };

        let mut channels = Vec::new();
        if header & CHANNEL_PRESENT != 0 {
            for _ in 0..total_channels {
                let (byte0, next) = take_u8(rest)?;
                let (byte1, next) = take_u8(next)?;
                let single_loss = byte0 & 0b1000_0000 != 0;
                let channel = (byte0 >> 3) & 0x0F;
                let enhanced = byte0 & 0b0000_0100 != 0;
                let length = (((byte0 & 0x03) as usize) << 8) | byte1 as usize;
                let (chapter_presence, next) = take_u8(next)?;
                let (chapters, next) = take_n(next, length)?;
                rest = next;
                channels.push(ChannelJournal { single_loss, channel, enhanced, chapter_presence, chapters: chapters.to_vec() });
            }
        }

        Ok((Journal { single_packet_loss, enhanced_encoding, checkpoint_seq, system, channels }, rest))
    }

    /// Re-emits the journal byte-for-byte equivalent to what `decode` would
    /// have consumed, for the `J`-flagged re-emit case.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut header = 0u8;
        if self.single_packet_loss {
            header |= SINGLE_PACKET_LOSS;
        }
        if self.enhanced_encoding {
            header |= ENHANCED_ENCODING;
        }
        if self.system.is_some() {
            header |= SYSTEM_PRESENT;
        }
        if !self.channels.is_empty() {
            header |= CHANNEL_PRESENT;
        }
        header |= (self.channels.len().max(1) as u8 - 1) & 0x0F;
        buf.put_u8(header);
        buf.put_u16(self.checkpoint_seq);

        if let Some(system) = &self.system {
            let length = system.chapters.len() as u16;
            let byte0 = ((system.chapter_flags & 0x3F) << 2) | (((length >> 8) as u8) & 0x03);
            buf.put_u8(byte0);
            buf.put_u8((length & 0xFF) as u8);
            buf.put_slice(&system.chapters);
        }

        for channel in &self.channels {
            let length = channel.chapters.len() as u16;
            let mut byte0 = (channel.channel & 0x0F) << 3;
            if channel.single_loss {
                byte0 |= 0b1000_0000;
            }
            if channel.enhanced {
                byte0 |= 0b0000_0100;
            }
            byte0 |= ((length >> 8) as u8) & 0x03;
            buf.put_u8(byte0);
            buf.put_u8((length & 0xFF) as u8);
            buf.put_u8(channel.chapter_presence);
            buf.put_slice(&channel.chapters);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_header_with_no_sections() {
        let bytes = [0x00u8, 0x00, 0x05, 0xAA];
        let (journal, rest) = Journal::decode(&bytes).unwrap();
        assert!(!journal.single_packet_loss);
        assert_eq!(journal.checkpoint_seq, 5);
        assert!(journal.system.is_none());
        assert!(journal.channels.is_empty());
        assert_eq!(rest, &[0xAA]);
    }

    #[test]
    fn decodes_system_journal_length() {
        let mut bytes = vec![SYSTEM_PRESENT, 0x00, 0x01, 0x00, 0x03];
        bytes.extend_from_slice(&[0x11, 0x22, 0x33]);
        let (journal, rest) = Journal::decode(&bytes).unwrap();
        let system = journal.system.unwrap();
        assert_eq!(system.chapters, vec![0x11, 0x22, 0x33]);
        assert!(rest.is_empty());
    }

    #[test]
    fn decodes_enhanced_encoding_flag() {
        let bytes = [ENHANCED_ENCODING, 0x00, 0x05, 0xAA];
        let (journal, rest) = Journal::decode(&bytes).unwrap();
        assert!(journal.enhanced_encoding);
        assert_eq!(rest, &[0xAA]);

        let mut buf = BytesMut::new();
        journal.encode(&mut buf);
        assert_eq!(buf[0] & ENHANCED_ENCODING, ENHANCED_ENCODING);
    }

    #[test]
    fn decodes_one_channel_journal() {
        let mut bytes = vec![CHANNEL_PRESENT, 0x00, 0x07];
        bytes.push(0b0000_1000); // channel 1, length high bits 0
        bytes.push(0x02); // length low byte = 2
        bytes.push(0xFF); // chapter presence
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let (journal, rest) = Journal::decode(&bytes).unwrap();
        assert_eq!(journal.channels.len(), 1);
        let ch = &journal.channels[0];
        assert_eq!(ch.channel, 1);
        assert_eq!(ch.chapter_presence, 0xFF);
        assert_eq!(ch.chapters, vec![0xAA, 0xBB]);
        assert!(rest.is_empty());
    }

    #[test]
    fn encode_decode_round_trips() {
        let journal = Journal {
            single_packet_loss: true,
            enhanced_encoding: true,
            checkpoint_seq: 42,
            system: Some(SystemJournal { chapter_flags: 0b0010_1000, chapters: vec![1, 2, 3] }),
            channels: vec![
                ChannelJournal { single_loss: false, channel: 3, enhanced: true, chapter_presence: 0x7F, chapters: vec![9, 9] },
                ChannelJournal { single_loss: true, channel: 0, enhanced: false, chapter_presence: 0x01, chapters: vec![] },
            ],
        };
        let mut buf = BytesMut::new();
        journal.encode(&mut buf);
        let (decoded, rest) = Journal::decode(&buf).unwrap();
        assert_eq!(decoded, journal);
        assert!(rest.is_empty());
    }
}
