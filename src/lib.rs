//! Core of an Apple-style RTP-MIDI / AppleMIDI transport.
//!
//! This crate implements the four subsystems that make up the hard part of
//! the protocol: the session handshake and stream state machine, the
//! three-timestamp clock synchronization exchange, the RTP-MIDI wire codec,
//! and the session scheduler that bundles outbound commands into packets.
//!
//! # Features
//! - **Async**: built on `tokio`.
//! - **mDNS** (`mdns` feature): advertises and browses `_apple-midi._udp`
//!   services via `mdns-sd`. Without the feature, advertisement is a no-op.
//!
//! ## Unsupported
//! - **Recovery journal contents**: the wire structure of the journal is
//!   parsed and can be re-emitted, but lost-command recovery is not
//!   implemented.
pub mod clock;
pub mod error;
pub mod events;
pub mod mdns;
pub mod packets;
pub mod participant;
pub mod session;
pub mod stream;
pub(crate) mod timers;
mod util;

pub use error::{PacketError, SessionError};
pub use events::{ControlMessageEvent, ErrorEvent, EventType, MessageEvent, ReadyEvent, StreamAddedEvent, StreamRemovedEvent};
pub use participant::Participant;
pub use session::{Session, SessionConfig, SessionRecord, SessionStorage};
pub use stream::{Stream, StreamState};
