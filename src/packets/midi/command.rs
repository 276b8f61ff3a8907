//! A single decoded RTP-MIDI command: either a channel-voice/system
//! real-time message from `midi-types`, or an opaque SysEx payload.
//!
//! Running status and SysEx termination are applied uniformly regardless
//! of message kind.

use bytes::{BufMut, BytesMut};
use midi_types::{Channel, Control, MidiMessage, Note, Program, QuarterFrame, Value7, Value14, status};

use crate::error::PacketError;
use crate::util::StatusBit;

#[derive(Debug, Clone, PartialEq)]
pub enum RtpMidiMessage {
    Channel(MidiMessage),
    /// Raw bytes between `0xF0` and the terminating `0xF7` (exclusive of
    /// both delimiters).
    SysEx(Vec<u8>),
}

impl RtpMidiMessage {
    pub fn status(&self) -> u8 {
        match self {
            RtpMidiMessage::SysEx(_) => 0xF0,
            RtpMidiMessage::Channel(msg) => status_of(msg),
        }
    }

    /// Decodes one command starting at `status_byte`, which the caller has
    /// already consumed from `data` (or is reusing as running status).
    /// Returns the message and the remainder of `data` after its payload, or
    /// `Ok(None)` for a SysEx continuation sentinel: a high-bit byte found
    /// before `0xF7` means this command is not pushed and decoding of the
    /// command list stops here, which is not a packet-level error.
    fn decode_body(status_byte: u8, data: &[u8]) -> Result<Option<(Self, &[u8])>, PacketError> {
        if status_byte == 0xF0 {
            let terminator = data.iter().position(|&b| b.status_bit());
            return match terminator {
                Some(idx) if data[idx] == 0xF7 => Ok(Some((RtpMidiMessage::SysEx(data[..idx].to_vec()), &data[idx + 1..]))),
                Some(_) => Ok(None),
                None => Err(PacketError::UnterminatedSysEx),
            };
        }

        let channel = Channel::from(status_byte & 0x0F);
        let (msg, rest) = if status_byte < 0xF0 {
            match status_byte & 0xF0 {
                s if s == status::NOTE_OFF => take2(data, |a, b| MidiMessage::NoteOff(channel, Note::from(a), Value7::from(b)))?,
                s if s == status::NOTE_ON => take2(data, |a, b| MidiMessage::NoteOn(channel, Note::from(a), Value7::from(b)))?,
                s if s == status::KEY_PRESSURE => take2(data, |a, b| MidiMessage::KeyPressure(channel, Note::from(a), Value7::from(b)))?,
                s if s == status::CONTROL_CHANGE => take2(data, |a, b| MidiMessage::ControlChange(channel, Control::from(a), Value7::from(b)))?,
                s if s == status::PROGRAM_CHANGE => take1(data, |a| MidiMessage::ProgramChange(channel, Program::from(a)))?,
                s if s == status::CHANNEL_PRESSURE => take1(data, |a| MidiMessage::ChannelPressure(channel, Value7::from(a)))?,
                s if s == status::PITCH_BEND_CHANGE => take2(data, |a, b| MidiMessage::PitchBendChange(channel, Value14::from((a, b))))?,
                _ => return Err(PacketError::InvalidStatus(status_byte)),
            }
        } else {
            match status_byte {
                s if s == status::QUARTER_FRAME => take1(data, |a| MidiMessage::QuarterFrame(QuarterFrame::from(a)))?,
                s if s == status::SONG_POSITION_POINTER => take2(data, |a, b| MidiMessage::SongPositionPointer(Value14::from((a, b))))?,
                s if s == status::SONG_SELECT => take1(data, |a| MidiMessage::SongSelect(Value7::from(a)))?,
                s if s == status::TUNE_REQUEST => (MidiMessage::TuneRequest, data),
                s if s == status::TIMING_CLOCK => (MidiMessage::TimingClock, data),
                s if s == status::START => (MidiMessage::Start, data),
                s if s == status::CONTINUE => (MidiMessage::Continue, data),
                s if s == status::STOP => (MidiMessage::Stop, data),
                s if s == status::ACTIVE_SENSING => (MidiMessage::ActiveSensing, data),
                s if s == status::RESET => (MidiMessage::Reset, data),
                _ => return Err(PacketError::InvalidStatus(status_byte)),
            }
        };
        Ok(Some((RtpMidiMessage::Channel(msg), rest)))
    }

    /// Decodes the next command: `status_byte_hint` is the running status
    /// in effect, if any. `data` starts right after any delta-time. Returns
    /// `Ok(None)` when a SysEx continuation sentinel is hit, signalling the
    /// caller to stop decoding the command list without treating it as an
    /// error.
    pub fn decode(data: &[u8], running_status: Option<u8>) -> Result<Option<(Self, &[u8], u8)>, PacketError> {
        let (first, _) = crate::util::take_u8(data)?;
        let (status_byte, body) = if first.status_bit() {
            (first, &data[1..])
        } else {
            (running_status.ok_or(PacketError::NoRunningStatus)?, data)
        };
        Ok(Self::decode_body(status_byte, body)?.map(|(msg, rest)| (msg, rest, status_byte)))
    }

    /// Bytes written by [`Self::write`] after the (possibly elided) status
    /// byte: 2 for most channel-voice messages, 1 for program change and
    /// channel pressure, 0 for realtime/common messages with no data, and
    /// `data.len() + 1` (including the `0xF7` terminator) for SysEx.
    pub fn body_len(&self) -> usize {
        match self {
            RtpMidiMessage::SysEx(data) => data.len() + 1,
            RtpMidiMessage::Channel(msg) => match msg {
                MidiMessage::NoteOn(..) | MidiMessage::NoteOff(..) | MidiMessage::KeyPressure(..) => 2,
                MidiMessage::ControlChange(..) => 2,
                MidiMessage::ProgramChange(..) => 1,
                MidiMessage::ChannelPressure(..) => 1,
                MidiMessage::PitchBendChange(..) => 2,
                MidiMessage::QuarterFrame(_) => 1,
                MidiMessage::SongPositionPointer(_) => 2,
                MidiMessage::SongSelect(_) => 1,
                MidiMessage::TuneRequest
                | MidiMessage::TimingClock
                | MidiMessage::Start
                | MidiMessage::Continue
                | MidiMessage::Stop
                | MidiMessage::ActiveSensing
                | MidiMessage::Reset => 0,
            },
        }
    }

    pub fn write(&self, buf: &mut BytesMut, running_status: Option<u8>) {
        let status = self.status();
        if running_status != Some(status) || matches!(self, RtpMidiMessage::SysEx(_)) {
            buf.put_u8(status);
        }
        match self {
            RtpMidiMessage::SysEx(data) => {
                buf.put_slice(data);
                buf.put_u8(0xF7);
            }
            RtpMidiMessage::Channel(msg) => write_channel_body(buf, msg),
        }
    }
}

fn take1<T>(data: &[u8], f: impl FnOnce(u8) -> T) -> Result<(T, &[u8]), PacketError> {
    let (a, rest) = crate::util::take_u8(data)?;
    Ok((f(a), rest))
}

fn take2<T>(data: &[u8], f: impl FnOnce(u8, u8) -> T) -> Result<(T, &[u8]), PacketError> {
    let (a, rest) = crate::util::take_u8(data)?;
    let (b, rest) = crate::util::take_u8(rest)?;
    Ok((f(a, b), rest))
}

fn status_of(msg: &MidiMessage) -> u8 {
    match msg {
        MidiMessage::NoteOn(channel, _, _) => status::NOTE_ON | u8::from(*channel),
        MidiMessage::NoteOff(channel, _, _) => status::NOTE_OFF | u8::from(*channel),
        MidiMessage::KeyPressure(channel, _, _) => status::KEY_PRESSURE | u8::from(*channel),
        MidiMessage::ControlChange(channel, _, _) => status::CONTROL_CHANGE | u8::from(*channel),
        MidiMessage::ProgramChange(channel, _) => status::PROGRAM_CHANGE | u8::from(*channel),
        MidiMessage::ChannelPressure(channel, _) => status::CHANNEL_PRESSURE | u8::from(*channel),
        MidiMessage::PitchBendChange(channel, _) => status::PITCH_BEND_CHANGE | u8::from(*channel),
        MidiMessage::QuarterFrame(_) => status::QUARTER_FRAME,
        MidiMessage::SongPositionPointer(_) => status::SONG_POSITION_POINTER,
        MidiMessage::SongSelect(_) => status::SONG_SELECT,
        MidiMessage::TuneRequest => status::TUNE_REQUEST,
        MidiMessage::TimingClock => status::TIMING_CLOCK,
        MidiMessage::Start => status::START,
        MidiMessage::Continue => status::CONTINUE,
        MidiMessage::Stop => status::STOP,
        MidiMessage::ActiveSensing => status::ACTIVE_SENSING,
        MidiMessage::Reset => status::RESET,
    }
}

fn write_channel_body(buf: &mut BytesMut, msg: &MidiMessage) {
    match msg {
        MidiMessage::NoteOn(_, note, velocity) | MidiMessage::NoteOff(_, note, velocity) | MidiMessage::KeyPressure(_, note, velocity) => {
            buf.put_u8(u8::from(*note));
            buf.put_u8(u8::from(*velocity));
        }
        MidiMessage::ControlChange(_, controller, value) => {
            buf.put_u8(u8::from(*controller));
            buf.put_u8(u8::from(*value));
        }
        MidiMessage::ProgramChange(_, program) => buf.put_u8(u8::from(*program)),
        MidiMessage::ChannelPressure(_, pressure) => buf.put_u8(u8::from(*pressure)),
        MidiMessage::PitchBendChange(_, value) => {
            let raw: u16 = u16::from(*value);
            buf.put_u8((raw & 0x7F) as u8);
            buf.put_u8(((raw >> 7) & 0x7F) as u8);
        }
        MidiMessage::QuarterFrame(qf) => buf.put_u8(u8::from(*qf)),
        MidiMessage::SongPositionPointer(value) => {
            let raw: u16 = u16::from(*value);
            buf.put_u8((raw & 0x7F) as u8);
            buf.put_u8(((raw >> 7) & 0x7F) as u8);
        }
        MidiMessage::SongSelect(value) => buf.put_u8(u8::from(*value)),
        MidiMessage::TuneRequest
        | MidiMessage::TimingClock
        | MidiMessage::Start
        | MidiMessage::Continue
        | MidiMessage::Stop
        | MidiMessage::ActiveSensing
        | MidiMessage::Reset => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_round_trips() {
        let msg = RtpMidiMessage::Channel(MidiMessage::NoteOn(Channel::from(4), Note::from(0x40), Value7::from(0x7F)));
        let mut buf = BytesMut::new();
        msg.write(&mut buf, None);
        assert_eq!(&buf[..], &[0x94, 0x40, 0x7F]);
        let (decoded, rest, status) = RtpMidiMessage::decode(&buf, None).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(status, 0x94);
        assert!(rest.is_empty());
    }

    #[test]
    fn running_status_is_reused_on_decode() {
        let bytes = [0x3C, 0x7F];
        let (decoded, rest, status) = RtpMidiMessage::decode(&bytes, Some(0x90)).unwrap().unwrap();
        assert_eq!(status, 0x90);
        assert_eq!(decoded, RtpMidiMessage::Channel(MidiMessage::NoteOn(Channel::from(0), Note::from(0x3C), Value7::from(0x7F))));
        assert!(rest.is_empty());
    }

    #[test]
    fn running_status_is_omitted_on_encode_when_unchanged() {
        let msg = RtpMidiMessage::Channel(MidiMessage::NoteOn(Channel::from(0), Note::from(0x3C), Value7::from(0x00)));
        let mut buf = BytesMut::new();
        msg.write(&mut buf, Some(0x90));
        assert_eq!(&buf[..], &[0x3C, 0x00]);
    }

    #[test]
    fn sysex_round_trips() {
        let msg = RtpMidiMessage::SysEx(vec![0x01, 0x02, 0x03]);
        let mut buf = BytesMut::new();
        msg.write(&mut buf, None);
        assert_eq!(&buf[..], &[0xF0, 0x01, 0x02, 0x03, 0xF7]);
        let (decoded, rest, status) = RtpMidiMessage::decode(&buf, None).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(status, 0xF0);
        assert!(rest.is_empty());
    }

    #[test]
    fn sysex_with_no_high_bit_byte_at_all_is_an_error() {
        let bytes = [0xF0, 0x01, 0x02];
        assert_eq!(RtpMidiMessage::decode(&bytes, None), Err(PacketError::UnterminatedSysEx));
    }

    #[test]
    fn sysex_continuation_sentinel_stops_without_erroring() {
        // 0x90 is a high-bit byte that isn't 0xF7: a continuation sentinel,
        // not a terminator. The command is not pushed and decoding stops,
        // rather than failing the whole packet.
        let bytes = [0xF0, 0x01, 0x90, 0x3C, 0x7F];
        assert_eq!(RtpMidiMessage::decode(&bytes, None), Ok(None));
    }

    #[test]
    fn no_running_status_is_an_error() {
        let bytes = [0x3C, 0x7F];
        assert_eq!(RtpMidiMessage::decode(&bytes, None), Err(PacketError::NoRunningStatus));
    }
}
