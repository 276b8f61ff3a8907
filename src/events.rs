//! Session event registration (§6.3): `ready`, `streamAdded`, `streamRemoved`,
//! `message`, `controlMessage`, `error`.
//!
//! A generic `EventType`/`EventListeners` pattern carries each event's
//! payload type through a GAT, so adding a new event kind never touches
//! the listener storage machinery.

use crate::error::SessionError;
use crate::packets::control::ControlPacket;
use crate::stream::Stream;

type ReadyListener = dyn Fn() + Send + Sync + 'static;
type StreamListener = dyn Fn(&Stream) + Send + Sync + 'static;
type MessageListener = dyn Fn(f64, &[u8], u32) + Send + Sync + 'static;
type ControlMessageListener = dyn Fn(&ControlPacket) + Send + Sync + 'static;
type ErrorListener = dyn Fn(&SessionError) + Send + Sync + 'static;

pub struct ReadyEvent;
pub struct StreamAddedEvent;
pub struct StreamRemovedEvent;
pub struct MessageEvent;
pub struct ControlMessageEvent;
pub struct ErrorEvent;

pub trait EventType {
    type Data<'a>;

    fn add_listener_to_storage<F>(listeners: &mut EventListeners, callback: F)
    where
        F: for<'a> Fn(Self::Data<'a>) + Send + Sync + 'static;
}

impl EventType for ReadyEvent {
    type Data<'a> = ();

    fn add_listener_to_storage<F>(listeners: &mut EventListeners, callback: F)
    where
        F: for<'a> Fn(Self::Data<'a>) + Send + Sync + 'static,
    {
        listeners.ready.push(Box::new(move |_: ()| callback(())));
    }
}

impl EventType for StreamAddedEvent {
    type Data<'a> = &'a Stream;

    fn add_listener_to_storage<F>(listeners: &mut EventListeners, callback: F)
    where
        F: for<'a> Fn(Self::Data<'a>) + Send + Sync + 'static,
    {
        listeners.stream_added.push(Box::new(callback));
    }
}

impl EventType for StreamRemovedEvent {
    type Data<'a> = &'a Stream;

    fn add_listener_to_storage<F>(listeners: &mut EventListeners, callback: F)
    where
        F: for<'a> Fn(Self::Data<'a>) + Send + Sync + 'static,
    {
        listeners.stream_removed.push(Box::new(callback));
    }
}

impl EventType for MessageEvent {
    type Data<'a> = (f64, &'a [u8], u32);

    fn add_listener_to_storage<F>(listeners: &mut EventListeners, callback: F)
    where
        F: for<'a> Fn(Self::Data<'a>) + Send + Sync + 'static,
    {
        listeners.message.push(Box::new(move |(secs, bytes, ts)| callback((secs, bytes, ts))));
    }
}

impl EventType for ControlMessageEvent {
    type Data<'a> = &'a ControlPacket;

    fn add_listener_to_storage<F>(listeners: &mut EventListeners, callback: F)
    where
        F: for<'a> Fn(Self::Data<'a>) + Send + Sync + 'static,
    {
        listeners.control_message.push(Box::new(callback));
    }
}

impl EventType for ErrorEvent {
    type Data<'a> = &'a SessionError;

    fn add_listener_to_storage<F>(listeners: &mut EventListeners, callback: F)
    where
        F: for<'a> Fn(Self::Data<'a>) + Send + Sync + 'static,
    {
        listeners.error.push(Box::new(callback));
    }
}

#[derive(Default)]
pub struct EventListeners {
    ready: Vec<Box<ReadyListener>>,
    stream_added: Vec<Box<StreamListener>>,
    stream_removed: Vec<Box<StreamListener>>,
    message: Vec<Box<MessageListener>>,
    control_message: Vec<Box<ControlMessageListener>>,
    error: Vec<Box<ErrorListener>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<E: EventType, F>(&mut self, callback: F)
    where
        F: for<'a> Fn(E::Data<'a>) + Send + Sync + 'static,
    {
        E::add_listener_to_storage(self, callback);
    }

    pub(crate) fn notify_ready(&self) {
        for listener in &self.ready {
            listener();
        }
    }

    pub(crate) fn notify_stream_added(&self, stream: &Stream) {
        for listener in &self.stream_added {
            listener(stream);
        }
    }

    pub(crate) fn notify_stream_removed(&self, stream: &Stream) {
        for listener in &self.stream_removed {
            listener(stream);
        }
    }

    pub(crate) fn notify_message(&self, delta_seconds: f64, bytes: &[u8], absolute_timestamp: u32) {
        for listener in &self.message {
            listener(delta_seconds, bytes, absolute_timestamp);
        }
    }

    pub(crate) fn notify_control_message(&self, packet: &ControlPacket) {
        for listener in &self.control_message {
            listener(packet);
        }
    }

    pub(crate) fn notify_error(&self, error: &SessionError) {
        for listener in &self.error {
            listener(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn ready_listener_fires() {
        let mut listeners = EventListeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        listeners.on::<ReadyEvent, _>(move |()| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        listeners.notify_ready();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
