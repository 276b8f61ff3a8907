//! The session (§4.3, C3): owns the control/data UDP sockets, demultiplexes
//! inbound packets to streams, and bundles/flushes outbound MIDI.
//!
//! Control and data sockets each run their own receive loop, demultiplexing
//! inbound packets by source address into the explicit
//! [`crate::stream::Stream`] state machine rather than a side-table of
//! pending invitations. Logging goes through `tracing`.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::clock::{SessionClock, SESSION_RATE};
use crate::error::SessionError;
use crate::events::EventListeners;
pub use crate::events::{ControlMessageEvent, ErrorEvent, EventType, MessageEvent, ReadyEvent, StreamAddedEvent, StreamRemovedEvent};
use crate::packets::control::{ClockSync, ControlPacket, ReceiverFeedback, SessionInitiation};
use crate::packets::midi::command::RtpMidiMessage;
use crate::packets::midi::{MidiEvent, MidiPacket};
use crate::packets::RtpMidiPacket;
use crate::stream::{Stream, StreamState};
use crate::timers::{next_turn_or_cancel, sleep_or_cancel, Fired, Interval, RetrySchedule};

const MAX_UDP_PACKET_SIZE: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

/// Session identity and configuration (§3, §6.3 `create(...)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub local_name: String,
    pub bonjour_name: String,
    /// Control port; data port is always `port + 1` (even base port).
    pub port: u16,
    pub ip_version: IpVersion,
    pub published: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { local_name: "rtpmidi-core".to_string(), bonjour_name: "rtpmidi-core".to_string(), port: 5004, ip_version: IpVersion::V4, published: false }
    }
}

/// One queued outbound command awaiting the next flush (§4.3 "Outbound
/// bundling").
struct QueuedCommand {
    comex_time: u64,
    message: RtpMidiMessage,
}

/// A per-session record for the persistence interface (§6.4, §14). No
/// concrete storage backend ships; callers provide their own
/// [`SessionStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub bonjour_name: String,
    pub local_name: String,
    pub ssrc: u32,
    pub port: u16,
    pub published: bool,
    pub activated: bool,
    pub streams: Vec<u32>,
}

pub trait SessionStorage: Send + Sync {
    fn read(&self) -> Result<Vec<SessionRecord>, SessionError>;
    fn write(&self, records: &[SessionRecord]) -> Result<(), SessionError>;
}

/// Owns two UDP endpoints and the streams connected through them (§4.3, C3).
pub struct Session {
    ssrc: u32,
    config: SessionConfig,
    clock: SessionClock,
    control_socket: OnceCell<Arc<UdpSocket>>,
    data_socket: OnceCell<Arc<UdpSocket>>,
    streams: Mutex<Vec<Stream>>,
    pending: Mutex<Vec<QueuedCommand>>,
    flush_queued: Mutex<bool>,
    feedback_tokens: Mutex<HashMap<u32, CancellationToken>>,
    events: EventListeners,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            ssrc: rand::random(),
            config,
            clock: SessionClock::new(),
            control_socket: OnceCell::new(),
            data_socket: OnceCell::new(),
            streams: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            flush_queued: Mutex::new(false),
            feedback_tokens: Mutex::new(HashMap::new()),
            events: EventListeners::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registers an event listener (§6.3). Must be called before [`Self::start`]
    /// is handed off behind an `Arc`, since listener storage is not
    /// independently synchronized.
    pub fn on<E: EventType, F>(&mut self, callback: F)
    where
        F: for<'a> Fn(E::Data<'a>) + Send + Sync + 'static,
    {
        self.events.on::<E, _>(callback);
    }

    fn bind_addr(&self, port: u16) -> SocketAddr {
        match self.config.ip_version {
            IpVersion::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            IpVersion::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        }
    }

    /// Binds both sockets and begins the receive loops (§4.3, §6.3
    /// `start()`). Emits `ready` once both are listening. Publishes via mDNS
    /// if `config.published` and an advertiser is supplied.
    #[instrument(skip_all, fields(name = %self.config.local_name, ssrc = self.ssrc))]
    pub async fn start(self: &Arc<Self>, mdns: Option<Arc<dyn crate::mdns::MdnsAdvertiser>>) -> Result<(), SessionError> {
        let control_addr = self.bind_addr(self.config.port);
        let control = UdpSocket::bind(control_addr).await.map_err(|source| SessionError::Bind { port: self.config.port, source })?;
        self.control_socket.set(Arc::new(control)).map_err(|_| SessionError::AlreadyStarted)?;

        let data_port = self.config.port + 1;
        let data_addr = self.bind_addr(data_port);
        let data = UdpSocket::bind(data_addr).await.map_err(|source| SessionError::Bind { port: data_port, source })?;
        self.data_socket.set(Arc::new(data)).map_err(|_| SessionError::AlreadyStarted)?;

        if self.config.published {
            if let Some(advertiser) = &mdns {
                if let Err(err) = advertiser.publish(&self.config.bonjour_name, self.config.port) {
                    warn!("mdns publish failed: {err}");
                }
            }
        }

        self.spawn_receive_loop(self.control_socket.get().unwrap().clone(), false);
        self.spawn_receive_loop(self.data_socket.get().unwrap().clone(), true);

        debug!("session listening on {}/{}", control_addr, data_addr);
        self.events.notify_ready();
        Ok(())
    }

    fn spawn_receive_loop(self: &Arc<Self>, socket: Arc<UdpSocket>, via_data_channel: bool) {
        let session = self.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    recv = socket.recv_from(&mut buf) => {
                        match recv {
                            Ok((amount, src)) => session.handle_datagram(&buf[..amount], src, via_data_channel).await,
                            Err(err) => {
                                session.events.notify_error(&SessionError::Send { channel: if via_data_channel { "data" } else { "control" }, addr: src_placeholder(), source: err });
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Inbound demux (§4.3 "Inbound demultiplex"): control packets take
    /// priority by magic bytes, everything else is attempted as RTP-MIDI.
    async fn handle_datagram(self: &Arc<Self>, bytes: &[u8], src: SocketAddr, via_data_channel: bool) {
        match RtpMidiPacket::parse(bytes) {
            Ok(RtpMidiPacket::Control(packet)) => self.handle_control(packet, src, via_data_channel).await,
            Ok(RtpMidiPacket::Midi(packet)) => self.handle_midi(packet).await,
            Err(_) => {
                // Parse failures are dropped silently (§7.1).
            }
        }
    }

    async fn handle_control(self: &Arc<Self>, packet: ControlPacket, src: SocketAddr, via_data_channel: bool) {
        self.events.notify_control_message(&packet);
        match packet {
            ControlPacket::Invitation(body) => self.handle_invitation(body, src, via_data_channel).await,
            ControlPacket::Accepted(body) => self.handle_accepted(body, src, via_data_channel).await,
            ControlPacket::Rejected(body) => self.handle_rejected(body).await,
            ControlPacket::End(body) => self.handle_end(body).await,
            ControlPacket::ClockSync(sync) => self.handle_clock_sync(sync).await,
            ControlPacket::ReceiverFeedback(_) | ControlPacket::BitrateReceiveLimit(_) => {}
        }
    }

    async fn handle_invitation(self: &Arc<Self>, body: SessionInitiation, src: SocketAddr, via_data_channel: bool) {
        let mut streams = self.streams.lock().await;
        let existing = streams.iter().position(|s| s.ssrc() == body.ssrc && s.ssrc() != 0);

        if via_data_channel {
            // Second invitation: the peer's data-channel leg (§4.2 "As acceptor").
            if let Some(idx) = existing {
                streams[idx].on_second_invitation();
                let reply = ControlPacket::Accepted(SessionInitiation { token: body.token, ssrc: self.ssrc, name: Some(self.config.local_name.clone()) });
                drop(streams);
                let _ = self.send_to(src, &reply.encode(), true).await;
                return;
            }
        }

        if existing.is_none() {
            let mut stream = Stream::acceptor(src, body.ssrc, body.name.clone());
            if via_data_channel {
                stream.on_second_invitation();
            }
            streams.push(stream);
            let idx = streams.len() - 1;
            self.events.notify_stream_added(&streams[idx]);
            drop(streams);
            let reply = ControlPacket::Accepted(SessionInitiation { token: body.token, ssrc: self.ssrc, name: Some(self.config.local_name.clone()) });
            let _ = self.send_to(src, &reply.encode(), via_data_channel).await;
        }
    }

    async fn handle_accepted(self: &Arc<Self>, body: SessionInitiation, src: SocketAddr, via_data_channel: bool) {
        let mut streams = self.streams.lock().await;
        let Some(idx) = streams.iter().position(|s| s.token() == Some(body.token)) else {
            return;
        };

        if !via_data_channel && streams[idx].state() == StreamState::InvitingControl {
            streams[idx].on_control_accepted(body.ssrc, body.name.clone());
            let data_addr = SocketAddr::new(src.ip(), src.port() + 1);
            let token = streams[idx].token().unwrap();
            drop(streams);
            let invitation = ControlPacket::Invitation(SessionInitiation { token, ssrc: self.ssrc, name: Some(self.config.local_name.clone()) });
            let _ = self.send_to(data_addr, &invitation.encode(), true).await;
        } else if via_data_channel && streams[idx].state() == StreamState::InvitingData {
            streams[idx].on_data_accepted();
            let ssrc = streams[idx].ssrc();
            drop(streams);
            debug!(ssrc, "stream connected");
            self.start_clock_sync_cadence(ssrc);
        }
    }

    async fn handle_rejected(self: &Arc<Self>, body: SessionInitiation) {
        let mut streams = self.streams.lock().await;
        if let Some(idx) = streams.iter().position(|s| s.token() == Some(body.token)) {
            streams[idx].reject();
            let removed = streams.remove(idx);
            self.events.notify_stream_removed(&removed);
        }
    }

    async fn handle_end(self: &Arc<Self>, body: SessionInitiation) {
        let mut streams = self.streams.lock().await;
        if let Some(idx) = streams.iter().position(|s| s.ssrc() == body.ssrc) {
            let removed = streams.remove(idx);
            self.events.notify_stream_removed(&removed);
        }
    }

    async fn handle_clock_sync(self: &Arc<Self>, sync: ClockSync) {
        let mut streams = self.streams.lock().await;
        let Some(idx) = streams.iter().position(|s| s.ssrc() == sync.ssrc) else {
            return;
        };
        let reply = streams[idx].receive_clock_sync(&sync, &self.clock);
        let addr = streams[idx].participant().data_addr();
        drop(streams);
        if let Some(reply) = reply {
            let _ = self.send_to(addr, &ControlPacket::ClockSync(reply).encode(), true).await;
        }
    }

    async fn handle_midi(self: &Arc<Self>, packet: MidiPacket) {
        let mut streams = self.streams.lock().await;
        let Some(idx) = streams.iter().position(|s| s.ssrc() == packet.header.ssrc) else {
            return;
        };
        let stream = &mut streams[idx];
        let Some(offset) = stream.offset() else {
            return;
        };
        let rearm = stream.record_received_sequence(packet.header.sequence_number);
        // Base event time per §4.2 "Deriving per-command event time".
        let base = offset.time_difference - offset.latency + packet.header.timestamp as i64;
        let mut cumulative: i64 = 0;
        for event in &packet.events {
            cumulative += event.delta_time as i64;
            let absolute = (base + cumulative) as u32;
            let delta_seconds = event.delta_time as f64 / SESSION_RATE as f64;
            let mut buf = BytesMut::new();
            event.message.write(&mut buf, None);
            self.events.notify_message(delta_seconds, &buf, absolute);
        }
        let ssrc = packet.header.ssrc;
        drop(streams);
        if rearm {
            self.arm_receiver_feedback(ssrc);
        }
    }

    /// Starts the periodic clock-sync cadence for `ssrc` (§4.2, §4.4):
    /// resends a fresh `count=0` exchange every 1500ms until ten samples
    /// converge, then every 10s.
    fn start_clock_sync_cadence(self: &Arc<Self>, ssrc: u32) {
        let session = self.clone();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            loop {
                let cadence = {
                    let streams = session.streams.lock().await;
                    match streams.iter().find(|s| s.ssrc() == ssrc) {
                        Some(stream) => stream.sync_cadence(),
                        None => break,
                    }
                };
                if sleep_or_cancel(cadence, &shutdown).await == Fired::Cancelled {
                    break;
                }
                let mut streams = session.streams.lock().await;
                let Some(idx) = streams.iter().position(|s| s.ssrc() == ssrc) else {
                    break;
                };
                let sync = streams[idx].start_clock_sync(&session.clock);
                let addr = streams[idx].participant().data_addr();
                drop(streams);
                let _ = session.send_to(addr, &ControlPacket::ClockSync(sync).encode(), true).await;
            }
        });
    }

    /// Arms (or re-arms) the single-shot 1-second receiver-feedback timer
    /// for `ssrc` (§4.2, §4.4).
    fn arm_receiver_feedback(self: &Arc<Self>, ssrc: u32) {
        let session = self.clone();
        tokio::spawn(async move {
            let token = CancellationToken::new();
            {
                let mut tokens = session.feedback_tokens.lock().await;
                if let Some(old) = tokens.insert(ssrc, token.clone()) {
                    old.cancel();
                }
            }
            if sleep_or_cancel(std::time::Duration::from_secs(1), &token).await == Fired::Cancelled {
                return;
            }
            let mut streams = session.streams.lock().await;
            let Some(idx) = streams.iter().position(|s| s.ssrc() == ssrc) else {
                return;
            };
            let Some(sequence_number) = streams[idx].last_received_sequence() else {
                return;
            };
            streams[idx].take_lost_sequence_numbers();
            let addr = streams[idx].participant().ctrl_addr();
            drop(streams);
            let feedback = ControlPacket::ReceiverFeedback(ReceiverFeedback { ssrc: session.ssrc, sequence_number });
            let _ = session.send_to(addr, &feedback.encode(), false).await;
        });
    }

    /// Channel selection on send (§4.3): even peer port -> control socket,
    /// odd -> data socket. `prefer_data` breaks the tie when `addr`'s port
    /// parity is ambiguous relative to the caller's intent (e.g. invitation
    /// replies always targeting a specific leg).
    async fn send_to(&self, addr: SocketAddr, bytes: &[u8], prefer_data: bool) -> Result<(), SessionError> {
        let even = addr.port() % 2 == 0;
        let (socket, channel) = if even && !prefer_data {
            (self.control_socket.get(), "control")
        } else {
            (self.data_socket.get(), "data")
        };
        let Some(socket) = socket else {
            return Err(SessionError::NotStarted);
        };
        socket.send_to(bytes, addr).await.map(|_| ()).map_err(|source| {
            let err = SessionError::Send { channel, addr, source };
            self.events.notify_error(&err);
            err
        })
    }

    /// Enqueues raw MIDI command bytes for the next flush (§4.3, §6.3
    /// `send_message`). Uses the current session tick as `comexTime`.
    pub async fn send_message(self: &Arc<Self>, bytes: &[u8]) -> Result<(), SessionError> {
        self.send_message_at(self.clock.ticks64(), bytes).await
    }

    pub async fn send_message_at(self: &Arc<Self>, comex_time: u64, bytes: &[u8]) -> Result<(), SessionError> {
        let (message, _rest, _status) = RtpMidiMessage::decode(bytes, None).map_err(|_| SessionError::NotStarted)?.ok_or(SessionError::NotStarted)?;
        self.pending.lock().await.push(QueuedCommand { comex_time, message });
        self.schedule_flush();
        Ok(())
    }

    /// Defers a flush to the next scheduler turn, collapsing bursts queued
    /// within the same turn into one packet (§4.4 "Flush").
    fn schedule_flush(self: &Arc<Self>) {
        let already_queued = match self.flush_queued.try_lock() {
            Ok(mut guard) => {
                let was_queued = *guard;
                *guard = true;
                was_queued
            }
            Err(_) => true,
        };
        if already_queued {
            return;
        }
        let session = self.clone();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            if next_turn_or_cancel(&shutdown).await == Fired::Elapsed {
                session.flush().await;
            }
        });
    }

    /// Snapshots and encodes the pending queue into one packet per connected
    /// stream (§4.3 "Flush procedure").
    pub async fn flush(self: &Arc<Self>) {
        *self.flush_queued.lock().await = false;
        let mut queue: Vec<QueuedCommand> = std::mem::take(&mut *self.pending.lock().await);
        if queue.is_empty() {
            return;
        }
        queue.sort_by_key(|c| c.comex_time);

        let now = self.clock.ticks64();
        let base = queue[0].comex_time.min(now);

        let mut events = Vec::with_capacity(queue.len());
        let mut previous = base;
        for command in queue {
            let delta = command.comex_time.saturating_sub(previous) as u32;
            events.push(MidiEvent { delta_time: delta, message: command.message });
            previous = command.comex_time;
        }

        let mut streams = self.streams.lock().await;
        for stream in streams.iter_mut().filter(|s| s.can_send()) {
            let seq = stream.next_sequence_number();
            let packet = MidiPacket::new(seq, self.clock.now(), self.ssrc, events.clone());
            let addr = stream.participant().data_addr();
            let bytes = packet.encode();
            if let Some(socket) = self.data_socket.get() {
                let _ = socket.send_to(&bytes, addr).await;
            }
        }
    }

    /// Initiates an outbound stream as the invitation's sender (§4.2 "As
    /// initiator", §6.3 `connect(rinfo)`).
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<(), SessionError> {
        let token = rand::random::<u32>();
        let stream = Stream::initiator(addr, token);
        {
            let mut streams = self.streams.lock().await;
            streams.push(stream);
            let idx = streams.len() - 1;
            self.events.notify_stream_added(&streams[idx]);
        }
        self.spawn_invitation_retries(addr, token);
        Ok(())
    }

    fn spawn_invitation_retries(self: &Arc<Self>, addr: SocketAddr, token: u32) {
        let session = self.clone();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            let schedule = &RetrySchedule::INVITATION;
            let interval = Interval::new(schedule.interval, shutdown.clone());
            loop {
                {
                    let streams = session.streams.lock().await;
                    match streams.iter().find(|s| s.token() == Some(token)) {
                        Some(s) if s.state() == StreamState::InvitingControl => {}
                        _ => break, // accepted, rejected, or removed already
                    }
                }
                let invitation = ControlPacket::Invitation(SessionInitiation { token, ssrc: session.ssrc, name: Some(session.config.local_name.clone()) });
                let _ = session.send_to(addr, &invitation.encode(), false).await;

                if interval.tick().await.is_none() {
                    break;
                }

                let mut streams = session.streams.lock().await;
                if let Some(idx) = streams.iter().position(|s| s.token() == Some(token)) {
                    if streams[idx].note_invitation_retry() {
                        let removed = streams.remove(idx);
                        drop(streams);
                        warn!(token, "invitation retries exhausted");
                        session.events.notify_stream_removed(&removed);
                        break;
                    }
                }
            }
        });
    }

    /// Lists currently connected streams (§6.3 `get_streams()`).
    pub async fn connected_streams(&self) -> Vec<u32> {
        self.streams.lock().await.iter().filter(|s| s.can_send()).map(|s| s.ssrc()).collect()
    }

    /// Orderly shutdown (§3 "A session is ... released on `end`"): cancels
    /// all per-stream timers transitively and closes both sockets.
    pub async fn end(&self) {
        self.shutdown.cancel();
        let mut streams = self.streams.lock().await;
        for stream in streams.iter_mut() {
            stream.begin_ending();
            stream.close();
        }
        streams.clear();
    }

    pub fn to_record(&self, activated: bool, stream_ssrcs: Vec<u32>) -> SessionRecord {
        SessionRecord {
            bonjour_name: self.config.bonjour_name.clone(),
            local_name: self.config.local_name.clone(),
            ssrc: self.ssrc,
            port: self.config.port,
            published: self.config.published,
            activated,
            streams: stream_ssrcs,
        }
    }
}

fn src_placeholder() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 5004);
        assert_eq!(config.ip_version, IpVersion::V4);
        assert!(!config.published);
    }

    #[tokio::test]
    async fn new_session_has_no_connected_streams() {
        let session = Session::new(SessionConfig::default());
        assert!(session.connected_streams().await.is_empty());
    }
}
