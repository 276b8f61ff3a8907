//! Packet dispatch (§4.1): every RTP-MIDI/AppleMIDI datagram is either an
//! AppleMIDI control packet (`0xFFFF` magic) or an RTP-MIDI payload packet.

pub mod control;
pub mod midi;
pub mod rtp_header;

use crate::error::PacketError;
use control::ControlPacket;
use midi::MidiPacket;

#[derive(Debug, Clone, PartialEq)]
pub enum RtpMidiPacket {
    Control(ControlPacket),
    Midi(MidiPacket),
}

impl RtpMidiPacket {
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        if ControlPacket::is_control_packet(bytes) {
            ControlPacket::decode(bytes).map(RtpMidiPacket::Control)
        } else {
            MidiPacket::decode(bytes).map(RtpMidiPacket::Midi)
        }
    }
}
