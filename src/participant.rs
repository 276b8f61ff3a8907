//! A remote peer of one [`crate::stream::Stream`] (§3 data model).
//!
//! A control-port address plus the bookkeeping the handshake and clock
//! sync need. The RTP-MIDI network is peer-to-peer per-stream, so one
//! `Participant` is owned by exactly one `Stream`, not shared across a
//! session.

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Instant;

/// A participant reachable at `ctrl_addr` (its data port is always
/// `ctrl_addr.port() + 1`, per §4.1's even/odd channel convention).
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    ctrl_addr: SocketAddr,
    ssrc: u32,
    name: Option<String>,
    /// `Some(token)` if we sent the invitation (initiator); `None` if the
    /// remote invited us (we're the acceptor).
    initiator_token: Option<u32>,
    last_clock_sync: Option<Instant>,
}

impl Participant {
    pub fn new(ctrl_addr: SocketAddr, ssrc: u32, name: Option<String>, initiator_token: Option<u32>) -> Self {
        Self { ctrl_addr, ssrc, name, initiator_token, last_clock_sync: None }
    }

    pub fn ctrl_addr(&self) -> SocketAddr {
        self.ctrl_addr
    }

    pub fn data_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ctrl_addr.ip(), self.ctrl_addr.port() + 1)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub(crate) fn set_ssrc(&mut self, ssrc: u32) {
        self.ssrc = ssrc;
    }

    pub(crate) fn is_initiator(&self) -> bool {
        self.initiator_token.is_some()
    }

    pub(crate) fn initiator_token(&self) -> Option<u32> {
        self.initiator_token
    }

    pub(crate) fn last_clock_sync(&self) -> Option<Instant> {
        self.last_clock_sync
    }

    pub(crate) fn mark_clock_synced(&mut self) {
        self.last_clock_sync = Some(Instant::now());
    }
}

impl Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Participant {{ name: {}, addr: {}, ssrc: {:#010x} }}", self.name.as_deref().unwrap_or("(unnamed)"), self.ctrl_addr, self.ssrc)
    }
}
