//! RTP-MIDI payload packet: command-list header flags, per-command
//! delta-time and message pairing, recovery journal trailer. Decoded and
//! encoded as one owned, slice-advancing codec.

pub mod command;
pub mod delta_time;
pub mod journal;

use bytes::{BufMut, BytesMut};

use crate::error::PacketError;
use crate::packets::rtp_header::RtpHeader;
use crate::util::take_u8;
use command::RtpMidiMessage;
use delta_time::{delta_time_len, read_delta_time, write_delta_time};
use journal::Journal;

const FLAG_B: u8 = 0b1000_0000;
const FLAG_J: u8 = 0b0100_0000;
const FLAG_Z: u8 = 0b0010_0000;
const FLAG_P: u8 = 0b0001_0000;

#[derive(Debug, Clone, PartialEq)]
pub struct MidiEvent {
    pub delta_time: u32,
    pub message: RtpMidiMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MidiPacket {
    pub header: RtpHeader,
    pub phantom: bool,
    pub events: Vec<MidiEvent>,
    pub journal: Option<Journal>,
}

impl MidiPacket {
    pub fn new(sequence_number: u16, timestamp: u32, ssrc: u32, events: Vec<MidiEvent>) -> Self {
        Self { header: RtpHeader::new(sequence_number, timestamp, ssrc), phantom: false, events, journal: None }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let (header, payload) = RtpHeader::decode(bytes)?;
        let (flags_byte, rest) = take_u8(payload)?;
        let phantom = flags_byte & FLAG_P != 0;
        let has_journal = flags_byte & FLAG_J != 0;
        let first_has_delta_time = flags_byte & FLAG_Z != 0;

        let (length, rest) = if flags_byte & FLAG_B != 0 {
            let (low, rest) = take_u8(rest)?;
            (((flags_byte & 0x0F) as u16) << 8 | low as u16, rest)
        } else {
            ((flags_byte & 0x0F) as u16, rest)
        };
        let length = length as usize;

        let (mut command_bytes, after_commands) = crate::util::take_n(rest, length)?;

        let mut events = Vec::new();
        let mut running_status: Option<u8> = None;
        let mut first = true;
        while !command_bytes.is_empty() {
            let include_delta = !first || first_has_delta_time;
            let (delta_time, after_delta) = if include_delta { read_delta_time(command_bytes)? } else { (0, command_bytes) };
            match RtpMidiMessage::decode(after_delta, running_status)? {
                Some((message, after_message, status)) => {
                    running_status = Some(status);
                    events.push(MidiEvent { delta_time, message });
                    command_bytes = after_message;
                    first = false;
                }
                // SysEx continuation sentinel: stop decoding the list,
                // keeping whatever commands were already decoded.
                None => break,
            }
        }

        let (journal, rest) = if has_journal { let (j, r) = Journal::decode(after_commands)?; (Some(j), r) } else { (None, after_commands) };
        let _ = rest;

        Ok(Self { header, phantom, events, journal })
    }

    pub fn encode(&self) -> BytesMut {
        let mut commands = BytesMut::new();
        let mut running_status: Option<u8> = None;
        let first_has_delta_time = self.events.first().is_some_and(|e| e.delta_time != 0);

        for (i, event) in self.events.iter().enumerate() {
            if i != 0 || first_has_delta_time {
                write_delta_time(&mut commands, event.delta_time);
            }
            event.message.write(&mut commands, running_status);
            running_status = Some(event.message.status());
        }

        let length = commands.len();
        let needs_b = length > 0x0F;
        let mut flags = 0u8;
        if needs_b {
            flags |= FLAG_B;
        }
        if self.journal.is_some() {
            flags |= FLAG_J;
        }
        if first_has_delta_time {
            flags |= FLAG_Z;
        }
        if self.phantom {
            flags |= FLAG_P;
        }

        let mut buf = BytesMut::new();
        self.header.encode(&mut buf);
        if needs_b {
            flags |= ((length >> 8) as u8) & 0x0F;
            buf.put_u8(flags);
            buf.put_u8((length & 0xFF) as u8);
        } else {
            flags |= length as u8 & 0x0F;
            buf.put_u8(flags);
        }
        buf.put_slice(&commands);
        if let Some(journal) = &self.journal {
            journal.encode(&mut buf);
        }
        buf
    }
}

/// Byte length of the command-list section that `events` would encode to,
/// without materializing it. Used by the scheduler to decide bundling.
pub fn encoded_commands_len(events: &[MidiEvent]) -> usize {
    let first_has_delta_time = events.first().is_some_and(|e| e.delta_time != 0);
    let mut running_status: Option<u8> = None;
    let mut len = 0;
    for (i, event) in events.iter().enumerate() {
        if i != 0 || first_has_delta_time {
            len += delta_time_len(event.delta_time);
        }
        let status = event.message.status();
        if running_status != Some(status) || matches!(event.message, RtpMidiMessage::SysEx(_)) {
            len += 1;
        }
        len += event.message.body_len();
        running_status = Some(status);
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use command::RtpMidiMessage;
    use midi_types::{Channel, MidiMessage, Note, Value7};

    #[test]
    fn scenario_midi_round_trip() {
        let events = vec![
            MidiEvent { delta_time: 0, message: RtpMidiMessage::Channel(MidiMessage::NoteOn(Channel::from(0), Note::from(60), Value7::from(127))) },
            MidiEvent { delta_time: 240, message: RtpMidiMessage::Channel(MidiMessage::NoteOff(Channel::from(0), Note::from(60), Value7::from(0))) },
        ];
        let packet = MidiPacket::new(1, 50000, 0x11223344, events);
        let bytes = packet.encode();

        // header(12) + flags byte. NoteOn and NoteOff carry different
        // status bytes (0x90 vs 0x80), so running status cannot elide
        // either: 3 (note on) + 2 (varint(240)) + 3 (note off) = 8.
        let flags_byte = bytes[12];
        assert_eq!(flags_byte & 0xF0, 0x00); // no B, J, Z, P
        assert_eq!(flags_byte & 0x0F, 8);

        let decoded = MidiPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.header.sequence_number, 1);
        assert_eq!(decoded.events.len(), 2);
        assert_eq!(decoded.events[0].delta_time, 0);
        assert_eq!(decoded.events[1].delta_time, 240);
    }

    #[test]
    fn scenario_running_status_on_decode() {
        let bytes = [0x03, 0x90, 0x3C, 0x7F, 0x00, 0x3C, 0x00];
        let mut full = Vec::new();
        let header = RtpHeader::new(1, 0, 1);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        full.extend_from_slice(&buf);
        full.extend_from_slice(&bytes);

        let packet = MidiPacket::decode(&full).unwrap();
        assert_eq!(packet.events.len(), 2);
        for event in &packet.events {
            assert_eq!(event.message.status(), 0x90);
        }
    }

    #[test]
    fn long_payload_sets_b_flag() {
        let events: Vec<_> = (0..10)
            .map(|i| MidiEvent {
                delta_time: if i == 0 { 0 } else { 1 },
                message: RtpMidiMessage::Channel(MidiMessage::NoteOn(Channel::from(0), Note::from(i), Value7::from(100))),
            })
            .collect();
        let packet = MidiPacket::new(1, 0, 1, events);
        let bytes = packet.encode();
        assert!(bytes[12] & FLAG_B != 0);
        let decoded = MidiPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.events.len(), 10);
    }

    #[test]
    fn sysex_continuation_sentinel_preserves_already_decoded_commands() {
        let header = RtpHeader::new(1, 0, 1);
        let mut full = BytesMut::new();
        header.encode(&mut full);
        // command list: NoteOn (3 bytes, no leading delta since Z is unset),
        // a zero delta-time for the second command, then a SysEx start
        // immediately followed by a continuation sentinel (0x90, not 0xF7)
        // instead of a terminator.
        full.put_u8(0x07);
        full.put_slice(&[0x90, 0x3C, 0x7F, 0x00, 0xF0, 0x01, 0x90]);

        let packet = MidiPacket::decode(&full).unwrap();
        assert_eq!(packet.events.len(), 1);
        assert_eq!(packet.events[0].message, RtpMidiMessage::Channel(MidiMessage::NoteOn(Channel::from(0), Note::from(0x3C), Value7::from(0x7F))));
    }
}
