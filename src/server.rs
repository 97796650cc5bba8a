//! Authoritative server session
//!
//! [`ServerSession`] owns the world, the race state machine and the CPU
//! drivers. It is fed wall-clock deltas and drives two independent fixed
//! tickers: the simulation tick (physics, race rules, CPU inputs) and the
//! slower network tick (snapshots). Transport lives outside; clients reach
//! the session only through [`Inbound`] events and leave it through
//! [`Outgoing`] messages.
//!
//! [`run_server`] is the async task wrapper: it owns the session, drains the
//! inbound queue once per tick and forwards everything queued for sending.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::net::protocol::{ClientMessage, Delivery, ServerMessage};
use crate::settings::ServerSettings;
use crate::sim::actor::{ActorId, ActorKind, Pose};
use crate::sim::cpu::CpuDriver;
use crate::sim::events::EventSubscriber;
use crate::sim::race::{RacePhase, RaceSession};
use crate::sim::ticker::FixedTicker;
use crate::sim::track::Track;
use crate::sim::world::{SimContext, World};

/// Transport-assigned connection identity
pub type ClientId = u32;

/// Events handed to the session by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connect { client: ClientId, kind: ActorKind },
    Message { client: ClientId, message: ClientMessage },
    Disconnect { client: ClientId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Client(ClientId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub recipient: Recipient,
    pub message: ServerMessage,
}

impl Outgoing {
    pub fn delivery(&self) -> Delivery {
        self.message.delivery()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("session is full ({0} players)")]
    Full(usize),

    #[error("race already in progress")]
    RaceInProgress,

    #[error("client {0} is already connected")]
    DuplicateClient(ClientId),

    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    #[error("{0:?} is not a vehicle")]
    NotAVehicle(ActorKind),
}

pub struct ServerSession {
    settings: ServerSettings,
    world: World,
    race: RaceSession,
    clients: BTreeMap<ClientId, ActorId>,
    cpus: BTreeMap<ActorId, CpuDriver>,
    /// Start grid; each slot holds the actor placed on it
    grid: Vec<(Pose, Option<ActorId>)>,
    sim_ticker: FixedTicker,
    net_ticker: FixedTicker,
    outbox: Vec<Outgoing>,
    subscribers: Vec<Box<dyn EventSubscriber + Send>>,
}

impl ServerSession {
    pub fn new(settings: ServerSettings, track: Track) -> Self {
        let grid = track
            .start_grid(settings.max_players)
            .into_iter()
            .map(|pose| (pose, None))
            .collect();
        let mut world = World::new(SimContext::new(settings.tuning.clone(), track), &settings);
        let asteroids = world.spawn_asteroids(&settings, settings.max_players);
        let race = RaceSession::new(&settings, Arc::clone(&world.context().track));
        info!(
            "Session created: {} mode, {} laps, {} asteroids",
            settings.mode.as_str(),
            settings.lap_count,
            asteroids
        );

        Self {
            sim_ticker: FixedTicker::new(settings.sim_hz),
            net_ticker: FixedTicker::new(settings.net_hz).with_max_steps(1),
            settings,
            world,
            race,
            clients: BTreeMap::new(),
            cpus: BTreeMap::new(),
            grid,
            outbox: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn race(&self) -> &RaceSession {
        &self.race
    }

    pub fn is_finished(&self) -> bool {
        self.race.is_over()
    }

    /// Actor controlled by `client`
    pub fn actor_of(&self, client: ClientId) -> Option<ActorId> {
        self.clients.get(&client).copied()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber + Send>) {
        self.subscribers.push(subscriber);
    }

    /// Take every message queued for the transport
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Add a CPU racer on the next free grid slot
    pub fn add_cpu(&mut self, kind: ActorKind, skill: f32) -> Result<ActorId, ServerError> {
        let id = self.spawn_racer(kind, true)?;
        self.cpus.insert(id, CpuDriver::with_skill(skill));
        info!("CPU {} joined as {}", id, kind.as_str());
        if let Some(actor) = self.world.actor(id) {
            let spawned = ServerMessage::vehicle_spawned(id, actor.kind, actor.pose());
            self.send(Recipient::All, spawned);
        }
        Ok(id)
    }

    pub fn connect(&mut self, client: ClientId, kind: ActorKind) -> Result<ActorId, ServerError> {
        if self.clients.contains_key(&client) {
            return Err(ServerError::DuplicateClient(client));
        }
        let id = self.spawn_racer(kind, false)?;
        self.clients.insert(client, id);
        info!("Client {} joined as {} {}", client, kind.as_str(), id);

        self.send(
            Recipient::Client(client),
            ServerMessage::Welcome {
                actor_id: id,
                mode: self.settings.mode,
                lap_count: self.settings.lap_count,
            },
        );
        // Everyone already on the grid, then the newcomer to everyone
        let existing: Vec<ServerMessage> = self
            .world
            .vehicles()
            .filter(|actor| actor.server_id != id)
            .map(|actor| ServerMessage::vehicle_spawned(actor.server_id, actor.kind, actor.pose()))
            .collect();
        for message in existing {
            self.send(Recipient::Client(client), message);
        }
        if let Some(actor) = self.world.actor(id) {
            let spawned = ServerMessage::vehicle_spawned(id, actor.kind, actor.pose());
            self.send(Recipient::All, spawned);
        }
        Ok(id)
    }

    /// Remove a client's actor and any inputs still queued for it
    pub fn disconnect(&mut self, client: ClientId) -> Result<ActorId, ServerError> {
        let id = self
            .clients
            .remove(&client)
            .ok_or(ServerError::UnknownClient(client))?;
        self.world.despawn(id);
        self.race.remove_player(id);
        for (_, occupant) in &mut self.grid {
            if *occupant == Some(id) {
                *occupant = None;
            }
        }
        info!("Client {} left, actor {} removed", client, id);
        self.send(Recipient::All, ServerMessage::ActorRemoved { actor_id: id });
        self.flush_events();
        Ok(id)
    }

    pub fn handle(&mut self, event: Inbound) -> Result<(), ServerError> {
        match event {
            Inbound::Connect { client, kind } => self.connect(client, kind).map(|_| ()),
            Inbound::Disconnect { client } => self.disconnect(client).map(|_| ()),
            Inbound::Message { client, message } => {
                let id = self
                    .actor_of(client)
                    .ok_or(ServerError::UnknownClient(client))?;
                match message {
                    ClientMessage::ClientInput { .. } => {
                        if let Some(input) = message.input()
                            && !self.world.record_input(id, input)
                        {
                            debug!("Dropped stale input {} from client {}", input.timestamp, client);
                        }
                    }
                    ClientMessage::Ready { ready } => {
                        self.race.set_ready(id, ready);
                    }
                    ClientMessage::Pause { paused } => {
                        self.race.set_paused(paused);
                        self.flush_events();
                    }
                }
                Ok(())
            }
        }
    }

    /// Feed a wall-clock delta; runs every simulation and network tick due
    pub fn advance(&mut self, dt: f32) {
        for _ in 0..self.sim_ticker.advance(dt) {
            self.sim_step();
        }
        if self.net_ticker.advance(dt) > 0 {
            self.net_step();
        }
    }

    /// One fixed simulation tick
    pub fn sim_step(&mut self) {
        let dt = self.sim_ticker.step();
        let timestamp = ((self.world.tick() + 1) as f64 * 1e6 / self.settings.sim_hz as f64) as i64;

        let mut inputs = Vec::with_capacity(self.cpus.len());
        for (&id, driver) in &self.cpus {
            let Some(actor) = self.world.actor(id) else {
                continue;
            };
            let Some(settings) = self.world.tuning().for_kind(actor.kind) else {
                continue;
            };
            let waypoint = self.race.player(id).map_or(0, |p| p.current_waypoint);
            let input = driver.drive(actor, settings, self.world.track(), waypoint, timestamp, dt);
            inputs.push((id, input));
        }
        for (id, input) in inputs {
            self.world.record_input(id, input);
        }

        self.world.step(dt);
        self.race.update(&mut self.world, dt);
        self.flush_events();
    }

    /// One network tick: reconciliation to owners, snapshots to everyone
    pub fn net_step(&mut self) {
        let timestamp = (self.world.tick() as f64 * 1000.0 / self.settings.sim_hz as f64) as i64;

        for (&client, &id) in &self.clients {
            let Some(actor) = self.world.actor(id) else {
                continue;
            };
            self.outbox.push(Outgoing {
                recipient: Recipient::Client(client),
                message: ServerMessage::ClientUpdate {
                    x: actor.position.x,
                    y: actor.position.y,
                    rotation: actor.rotation,
                    vel_x: actor.velocity.x,
                    vel_y: actor.velocity.y,
                    vel_rot: actor.angular_velocity,
                    client_timestamp: self.world.last_applied_input(id).unwrap_or(0),
                    collision_flags: actor.collision_flags,
                    state_flags: actor.state.bits,
                },
            });
        }

        for actor in self.world.actors() {
            let message = if actor.is_vehicle() {
                let last_input = self
                    .world
                    .history(actor.server_id)
                    .and_then(|history| history.last_consumed())
                    .map_or(0, |input| input.flags.bits);
                ServerMessage::VehicleActorUpdate {
                    server_id: actor.server_id,
                    x: actor.position.x,
                    y: actor.position.y,
                    rotation: actor.rotation,
                    vel_x: actor.velocity.x,
                    vel_y: actor.velocity.y,
                    timestamp,
                    last_input,
                    state_flags: actor.state.bits,
                }
            } else {
                ServerMessage::ActorUpdate {
                    server_id: actor.server_id,
                    x: actor.position.x,
                    y: actor.position.y,
                    vel_x: actor.velocity.x,
                    vel_y: actor.velocity.y,
                    timestamp,
                }
            };
            self.outbox.push(Outgoing {
                recipient: Recipient::All,
                message,
            });
        }
    }

    fn spawn_racer(&mut self, kind: ActorKind, is_cpu: bool) -> Result<ActorId, ServerError> {
        if !kind.is_vehicle() {
            return Err(ServerError::NotAVehicle(kind));
        }
        if *self.race.phase() != RacePhase::Prepping {
            return Err(ServerError::RaceInProgress);
        }
        let slot = self
            .grid
            .iter()
            .position(|(_, occupant)| occupant.is_none())
            .ok_or(ServerError::Full(self.grid.len()))?;
        let pose = self.grid[slot].0;
        let id = self
            .world
            .spawn_vehicle(kind, slot as u8, pose)
            .ok_or(ServerError::NotAVehicle(kind))?;
        self.grid[slot].1 = Some(id);
        self.race.add_player(id, is_cpu);
        Ok(id)
    }

    fn send(&mut self, recipient: Recipient, message: ServerMessage) {
        self.outbox.push(Outgoing { recipient, message });
    }

    // Race events go to local subscribers and out as reliable broadcasts
    fn flush_events(&mut self) {
        for event in self.race.publish_events(&mut self.subscribers) {
            self.send(Recipient::All, ServerMessage::from_event(&event));
        }
    }
}

/// Drive a session until the race is over or `shutdown` is notified
///
/// Returns the session so the caller can inspect the final state.
pub async fn run_server(
    mut session: ServerSession,
    mut inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Outgoing>,
    shutdown: Arc<Notify>,
) -> ServerSession {
    let mut interval = tokio::time::interval(Duration::from_secs_f32(session.settings().sim_dt()));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("Server shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        while let Ok(event) = inbound.try_recv() {
            if let Err(e) = session.handle(event) {
                warn!("Rejected client event: {}", e);
            }
        }

        let now = Instant::now();
        session.advance(now.duration_since(last).as_secs_f32());
        last = now;

        for message in session.drain_outgoing() {
            if outbound.send(message).await.is_err() {
                warn!("Outbound channel closed, stopping server");
                return session;
            }
        }

        if session.is_finished() {
            info!("Race over after {} ticks", session.world().tick());
            break;
        }
    }
    session
}
