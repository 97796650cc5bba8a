//! Space Racers headless server
//!
//! Usage: `space-racers-server [settings.json] [track.json]`
//!
//! Without a track file a built-in oval is used. With no transport attached
//! the session races its CPU field to the finish and logs the standings.

use std::process::ExitCode;
use std::sync::Arc;

use glam::Vec2;
use tokio::sync::{Notify, mpsc};

use space_racers::ServerSettings;
use space_racers::server::{Inbound, Outgoing, ServerSession, run_server};
use space_racers::sim::actor::ActorKind;
use space_racers::sim::events::LogSubscriber;
use space_racers::sim::track::{MapDescriptor, Track};

const CHANNEL_CAPACITY: usize = 1024;
const CPU_FIELD: [(ActorKind, f32); 4] = [
    (ActorKind::Car, 0.9),
    (ActorKind::Bike, 0.7),
    (ActorKind::Ship, 0.5),
    (ActorKind::Car, 0.3),
];

fn load_session() -> Result<ServerSession, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => ServerSettings::load(path)?,
        None => ServerSettings::default(),
    };
    let track = match args.next() {
        Some(path) => Track::load(path)?,
        None => Track::from_descriptor(&MapDescriptor::oval(Vec2::new(1200.0, 700.0), 24, 200.0))?,
    };

    let mut session = ServerSession::new(settings, track);
    session.subscribe(Box::new(LogSubscriber));
    for (kind, skill) in CPU_FIELD {
        session.add_cpu(kind, skill)?;
    }
    Ok(session)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Space Racers server starting...");

    let session = match load_session() {
        Ok(session) => session,
        Err(e) => {
            log::error!("Failed to start session: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // The transport would own these ends
    let (_inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outgoing>(CHANNEL_CAPACITY);
    let shutdown = Arc::new(Notify::new());

    tokio::spawn(async move {
        let mut sent = 0u64;
        while let Some(outgoing) = outbound_rx.recv().await {
            sent += 1;
            log::trace!("-> {:?} {:?}", outgoing.recipient, outgoing.message);
        }
        log::debug!("Transport drained {} messages", sent);
    });

    let ctrl_c = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.notify_one();
        }
    });

    let session = run_server(session, inbound_rx, outbound_tx, shutdown).await;
    log::info!(
        "Session ended in phase {} after {} ticks",
        session.race().phase().name(),
        session.world().tick()
    );
    ExitCode::SUCCESS
}
