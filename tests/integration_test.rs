//! End-to-end handshake, clock sync, and MIDI exchange between two
//! in-process sessions bound to real loopback UDP ports.

mod common;

use common::find_consecutive_ports;
use midi_types::{Channel, MidiMessage, Note, Value7};
use rtpmidi_core::events::MessageEvent;
use rtpmidi_core::packets::midi::command::RtpMidiMessage;
use rtpmidi_core::session::{IpVersion, Session, SessionConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn config(name: &str, port: u16) -> SessionConfig {
    SessionConfig { local_name: name.to_string(), bonjour_name: name.to_string(), port, ip_version: IpVersion::V4, published: false }
}

async fn wait_until_connected(session: &Arc<Session>) {
    timeout(Duration::from_secs(10), async {
        loop {
            if !session.connected_streams().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("stream did not reach connected within the timeout");
}

#[tokio::test]
async fn two_sessions_handshake_sync_and_exchange_midi() {
    let (port1, _) = find_consecutive_ports();
    let (port2, _) = find_consecutive_ports();

    let mut session1 = Session::new(config("session1", port1));
    let (tx1, mut rx1) = mpsc::unbounded_channel::<Vec<u8>>();
    session1.on::<MessageEvent, _>(move |(_secs, bytes, _ts)| {
        let _ = tx1.send(bytes.to_vec());
    });
    let session1 = Arc::new(session1);
    session1.start(None).await.expect("session1 should bind its sockets");

    let mut session2 = Session::new(config("session2", port2));
    let (tx2, mut rx2) = mpsc::unbounded_channel::<Vec<u8>>();
    session2.on::<MessageEvent, _>(move |(_secs, bytes, _ts)| {
        let _ = tx2.send(bytes.to_vec());
    });
    let session2 = Arc::new(session2);
    session2.start(None).await.expect("session2 should bind its sockets");

    let addr2: SocketAddr = format!("127.0.0.1:{port2}").parse().unwrap();
    session1.connect(addr2).await.expect("connect should register an outbound stream");

    wait_until_connected(&session1).await;
    wait_until_connected(&session2).await;

    let note_on = RtpMidiMessage::Channel(MidiMessage::NoteOn(Channel::from(0), Note::from(60), Value7::from(100)));
    let mut encoded = bytes::BytesMut::new();
    note_on.write(&mut encoded, None);
    session1.send_message(&encoded[..]).await.expect("send_message should queue the note");

    let forwarded = timeout(Duration::from_secs(5), rx2.recv()).await.expect("session2 should receive session1's note").expect("event channel stayed open");
    let (decoded, _rest, _status) = RtpMidiMessage::decode(&forwarded, None).expect("session2 should decode the forwarded note").expect("note should not be a continuation sentinel");
    assert_eq!(decoded, note_on);

    let note_off = RtpMidiMessage::Channel(MidiMessage::NoteOff(Channel::from(0), Note::from(60), Value7::from(0)));
    let mut encoded_off = bytes::BytesMut::new();
    note_off.write(&mut encoded_off, None);
    session2.send_message(&encoded_off[..]).await.expect("send_message should queue the note-off");

    let forwarded = timeout(Duration::from_secs(5), rx1.recv()).await.expect("session1 should receive session2's note-off").expect("event channel stayed open");
    let (decoded, _rest, _status) = RtpMidiMessage::decode(&forwarded, None).expect("session1 should decode the forwarded note-off").expect("note-off should not be a continuation sentinel");
    assert_eq!(decoded, note_off);

    session1.end().await;
    session2.end().await;

    assert!(session1.connected_streams().await.is_empty());
    assert!(session2.connected_streams().await.is_empty());
}

#[tokio::test]
async fn connect_with_no_listener_stays_unconnected() {
    // session1 invites a port nobody is listening on; the only observable
    // behaviour without a 40-attempt/60s wait is that the stream is added
    // immediately in the inviting state and no panic/hang occurs starting
    // the retry loop.
    let (port1, _) = find_consecutive_ports();
    let (port2, _) = find_consecutive_ports();

    let session1 = Arc::new(Session::new(config("session1", port1)));
    session1.start(None).await.expect("session1 should bind its sockets");

    let addr2: SocketAddr = format!("127.0.0.1:{port2}").parse().unwrap();
    session1.connect(addr2).await.expect("connect should register an outbound stream even with no listener");

    assert!(session1.connected_streams().await.is_empty());
    session1.end().await;
}
