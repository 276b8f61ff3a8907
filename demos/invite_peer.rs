//! Starts a session and invites a single peer given on the command line
//! (`cargo run --example invite_peer --features demos -- 192.168.0.28:5006`).

use rtpmidi_core::session::{Session, SessionConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();

    let addr: SocketAddr = std::env::args().nth(1).expect("usage: invite_peer <addr:port>").parse()?;

    let session = Arc::new(Session::new(SessionConfig { local_name: "invite-peer demo".to_string(), ..SessionConfig::default() }));
    session.start(None).await?;
    session.connect(addr).await?;

    info!(%addr, "invitation sent, waiting for handshake to complete");
    tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    session.end().await;
    Ok(())
}
