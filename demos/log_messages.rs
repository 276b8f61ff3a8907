//! Starts a session, accepts invitations, and logs every inbound MIDI
//! message and control packet until Ctrl+C.

use rtpmidi_core::events::{ControlMessageEvent, MessageEvent};
use rtpmidi_core::session::{Session, SessionConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();

    let mut session = Session::new(SessionConfig { local_name: "log-messages demo".to_string(), ..SessionConfig::default() });

    session.on::<MessageEvent, _>(|(delta_seconds, bytes, timestamp)| {
        info!(?bytes, timestamp, delta_seconds, "received MIDI command");
    });
    session.on::<ControlMessageEvent, _>(|packet| {
        info!(?packet, "received control packet");
    });

    let session = Arc::new(session);
    session.start(None).await?;

    info!(port = session.config().port, "listening");
    tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    session.end().await;
    Ok(())
}
