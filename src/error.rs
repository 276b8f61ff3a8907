//! Crate-wide error types.
//!
//! Parse failures (§7.1) are modelled by [`PacketError`] and never panic on
//! attacker-controlled bytes. Transport and bind failures (§7.2) are modelled
//! by [`SessionError`] and surfaced through the session's `error` event
//! rather than unwound as exceptions.

use thiserror::Error;

/// Failure decoding a control or RTP-MIDI packet from the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a valid packet")]
    TooShort,
    #[error("packet does not start with the AppleMIDI control magic 0xFFFF")]
    WrongMagic,
    #[error("unknown control command {0:?}")]
    UnknownCommand([u8; 2]),
    #[error("SysEx message missing 0xF7 terminator")]
    UnterminatedSysEx,
    #[error("MIDI command used running status with none established")]
    NoRunningStatus,
    #[error("unrecognised MIDI status byte {0:#04x}")]
    InvalidStatus(u8),
    #[error("declared length does not match remaining buffer")]
    LengthMismatch,
    #[error("display name is not valid UTF-8")]
    InvalidName,
}

/// Transport-level failure: a bind or send error at the session boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to bind session sockets on port {port}: {source}")]
    Bind { port: u16, #[source] source: std::io::Error },
    #[error("send on {channel} channel to {addr} failed: {source}")]
    Send {
        channel: &'static str,
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("session is not started")]
    NotStarted,
    #[error("session already started")]
    AlreadyStarted,
}
