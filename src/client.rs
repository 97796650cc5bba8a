//! Client session
//!
//! The local vehicle is predicted: sampled input is recorded into an
//! [`InputHistory`] on every fixed tick, integrated at once through the same
//! integrator the server uses, and sent upstream. Server corrections go
//! through the [`ClientPredictor`]. Every other actor is dead-reckoned from
//! the snapshots the server broadcasts.

use std::collections::BTreeMap;

use glam::Vec2;
use log::{debug, warn};

use crate::net::dead_reckoning::{DeadReckonState, Snapshot};
use crate::net::protocol::{ClientMessage, Delivery, ServerMessage};
use crate::net::reconciliation::{ClientPredictor, Correction, ServerState};
use crate::settings::{GameMode, VehicleTuning};
use crate::sim::actor::{Actor, ActorId, ActorKind, Pose, StateFlags};
use crate::sim::input::{Input, InputFlags, InputHistory};
use crate::sim::ticker::FixedTicker;

/// Share of the visual correction offset kept each tick
const CORRECTION_RETAIN: f32 = 0.85;

/// An actor this client does not control
#[derive(Debug, Clone)]
pub struct RemoteActor {
    pub kind: ActorKind,
    pub state_flags: StateFlags,
    /// Controls the vehicle last applied on the server (thrusters, brake lights)
    pub last_input: InputFlags,
    spawn: Pose,
    reckoning: DeadReckonState,
}

impl RemoteActor {
    fn new(kind: ActorKind, spawn: Pose) -> Self {
        Self {
            kind,
            state_flags: StateFlags::normal(),
            last_input: InputFlags::empty(),
            spawn,
            reckoning: DeadReckonState::new(),
        }
    }

    pub fn position(&self) -> Vec2 {
        match self.reckoning.last_update() {
            Some(_) => self.reckoning.position(),
            None => self.spawn.position,
        }
    }

    pub fn rotation(&self) -> f32 {
        match self.reckoning.last_update() {
            Some(_) => self.reckoning.rotation(),
            None => self.spawn.rotation,
        }
    }

    pub fn velocity(&self) -> Vec2 {
        self.reckoning.velocity()
    }

    pub fn reckoning(&self) -> &DeadReckonState {
        &self.reckoning
    }
}

/// The locally controlled vehicle
#[derive(Debug, Clone)]
struct LocalVehicle {
    actor: Actor,
    history: InputHistory,
    predictor: ClientPredictor,
    collision_flags: u8,
}

pub struct ClientSession {
    tuning: VehicleTuning,
    ticker: FixedTicker,
    tick: u64,
    mode: GameMode,
    lap_count: u32,
    local_id: Option<ActorId>,
    local: Option<LocalVehicle>,
    held: Input,
    remotes: BTreeMap<ActorId, RemoteActor>,
    outbox: Vec<ClientMessage>,
    events: Vec<ServerMessage>,
    last_correction: Option<Correction>,
}

impl ClientSession {
    pub fn new(tuning: VehicleTuning, sim_hz: f32) -> Self {
        Self {
            tuning,
            ticker: FixedTicker::new(sim_hz),
            tick: 0,
            mode: GameMode::default(),
            lap_count: 0,
            local_id: None,
            local: None,
            held: Input::default(),
            remotes: BTreeMap::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            last_correction: None,
        }
    }

    pub fn local_id(&self) -> Option<ActorId> {
        self.local_id
    }

    pub fn local_actor(&self) -> Option<&Actor> {
        self.local.as_ref().map(|local| &local.actor)
    }

    /// Predicted position plus the decaying correction offset
    pub fn local_render_position(&self) -> Option<Vec2> {
        self.local
            .as_ref()
            .map(|local| local.predictor.render_position(&local.actor))
    }

    /// Collision flags from the latest server update
    pub fn local_collision_flags(&self) -> u8 {
        self.local.as_ref().map_or(0, |local| local.collision_flags)
    }

    pub fn pending_inputs(&self) -> usize {
        self.local
            .as_ref()
            .map_or(0, |local| local.predictor.pending_inputs())
    }

    pub fn last_correction(&self) -> Option<Correction> {
        self.last_correction
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn lap_count(&self) -> u32 {
        self.lap_count
    }

    pub fn remote(&self, id: ActorId) -> Option<&RemoteActor> {
        self.remotes.get(&id)
    }

    pub fn remotes(&self) -> impl Iterator<Item = (&ActorId, &RemoteActor)> + '_ {
        self.remotes.iter()
    }

    /// Latch the controls held right now; applied on the next fixed tick
    pub fn sample_input(&mut self, flags: InputFlags, steering: f32, acceleration: f32) {
        self.held = Input::with_multipliers(0, flags, steering, acceleration);
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.outbox.push(ClientMessage::Ready { ready });
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.outbox.push(ClientMessage::Pause { paused });
    }

    /// Messages to send, oldest first
    pub fn take_outgoing(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Reliable server messages for presentation (VFX, audio, UI)
    pub fn drain_events(&mut self) -> Vec<ServerMessage> {
        std::mem::take(&mut self.events)
    }

    /// Feed a wall-clock delta; runs every fixed tick due
    pub fn advance(&mut self, dt: f32) {
        for _ in 0..self.ticker.advance(dt) {
            self.step();
        }
    }

    /// One fixed tick: predict the local vehicle, extrapolate the rest
    pub fn step(&mut self) {
        let dt = self.ticker.step();
        self.tick += 1;

        if let Some(local) = &mut self.local {
            let timestamp = (self.tick as f64 * 1e6 * dt as f64) as i64;
            let input = Input {
                timestamp,
                ..self.held
            };
            local.history.record(input);
            for input in local.history.drain() {
                local.predictor.predict(&mut local.actor, input, dt);
                self.outbox.push(ClientMessage::from_input(&input));
            }
            local.predictor.decay_correction(CORRECTION_RETAIN);
        }

        for remote in self.remotes.values_mut() {
            remote.reckoning.tick(dt);
        }
    }

    pub fn handle(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::ClientUpdate {
                collision_flags, ..
            } => {
                let (Some(state), Some(local)) =
                    (ServerState::from_message(&message), &mut self.local)
                else {
                    return;
                };
                local.collision_flags = collision_flags;
                let correction =
                    local
                        .predictor
                        .reconcile(&mut local.actor, &state, self.ticker.step());
                if correction.is_some() {
                    self.last_correction = correction;
                }
            }
            ServerMessage::VehicleActorUpdate {
                server_id,
                x,
                y,
                rotation,
                vel_x,
                vel_y,
                timestamp,
                last_input,
                state_flags,
            } => {
                if Some(server_id) == self.local_id {
                    return;
                }
                let Some(remote) = self.remotes.get_mut(&server_id) else {
                    debug!("Update for unknown vehicle {}", server_id);
                    return;
                };
                remote.reckoning.apply_update(Snapshot {
                    position: Vec2::new(x, y),
                    velocity: Vec2::new(vel_x, vel_y),
                    rotation,
                    angular_velocity: None,
                    timestamp,
                });
                remote.state_flags = StateFlags::from_bits(state_flags);
                remote.last_input = InputFlags::from_bits(last_input);
            }
            ServerMessage::ActorUpdate {
                server_id,
                x,
                y,
                vel_x,
                vel_y,
                timestamp,
            } => {
                // Asteroids are never announced; the first update creates them
                let remote = self
                    .remotes
                    .entry(server_id)
                    .or_insert_with(|| RemoteActor::new(ActorKind::Asteroid, Pose::default()));
                remote.reckoning.apply_update(Snapshot {
                    position: Vec2::new(x, y),
                    velocity: Vec2::new(vel_x, vel_y),
                    rotation: 0.0,
                    angular_velocity: None,
                    timestamp,
                });
            }
            ServerMessage::Welcome {
                actor_id,
                mode,
                lap_count,
            } => {
                self.local_id = Some(actor_id);
                self.mode = mode;
                self.lap_count = lap_count;
                self.events.push(message);
            }
            ServerMessage::VehicleSpawned {
                actor_id,
                kind,
                x,
                y,
                rotation,
            } => {
                let pose = Pose {
                    position: Vec2::new(x, y),
                    rotation,
                };
                if Some(actor_id) == self.local_id {
                    self.spawn_local(actor_id, kind, pose);
                } else {
                    self.remotes.insert(actor_id, RemoteActor::new(kind, pose));
                }
                self.events.push(message);
            }
            ServerMessage::ActorRemoved { actor_id } => {
                if Some(actor_id) == self.local_id {
                    self.local = None;
                    self.local_id = None;
                } else {
                    self.remotes.remove(&actor_id);
                }
                self.events.push(message);
            }
            other => {
                debug_assert_eq!(other.delivery(), Delivery::Reliable);
                self.events.push(other);
            }
        }
    }

    // First spawn creates the vehicle; later ones are respawns
    fn spawn_local(&mut self, id: ActorId, kind: ActorKind, pose: Pose) {
        if let Some(local) = &mut self.local {
            local.actor.respawn_at(pose);
            local.history.clear();
            local.predictor.reset();
            return;
        }
        let Some(settings) = self.tuning.for_kind(kind).copied() else {
            warn!("Cannot drive a {}", kind.as_str());
            return;
        };
        self.local = Some(LocalVehicle {
            actor: Actor::vehicle(id, 0, kind, &settings, pose),
            history: InputHistory::default(),
            predictor: ClientPredictor::new(settings),
            collision_flags: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIM_HZ;

    fn welcomed(id: ActorId) -> ClientSession {
        let mut client = ClientSession::new(VehicleTuning::default(), SIM_HZ);
        client.handle(ServerMessage::Welcome {
            actor_id: id,
            mode: GameMode::Race,
            lap_count: 3,
        });
        client.handle(ServerMessage::VehicleSpawned {
            actor_id: id,
            kind: ActorKind::Car,
            x: 10.0,
            y: 20.0,
            rotation: 0.0,
        });
        client
    }

    fn update_for(actor: &Actor, client_timestamp: i64, state_flags: u8) -> ServerMessage {
        ServerMessage::ClientUpdate {
            x: actor.position.x,
            y: actor.position.y,
            rotation: actor.rotation,
            vel_x: actor.velocity.x,
            vel_y: actor.velocity.y,
            vel_rot: actor.angular_velocity,
            client_timestamp,
            collision_flags: 0,
            state_flags,
        }
    }

    #[test]
    fn test_local_vehicle_is_predicted() {
        let mut client = welcomed(5);
        let spawn = client.local_actor().unwrap().clone();
        assert!(spawn.state.contains(StateFlags::DISABLED));
        assert_eq!(client.lap_count(), 3);

        // Race start arrives through the reconciliation state flags
        client.handle(update_for(&spawn, 0, StateFlags::NORMAL));
        assert!(client.last_correction().is_none());

        client.sample_input(InputFlags::from_bits(InputFlags::ACCELERATE), 1.0, 1.0);
        for _ in 0..10 {
            client.step();
        }
        let actor = client.local_actor().unwrap();
        assert!(actor.position.x > spawn.position.x);
        assert_eq!(client.pending_inputs(), 10);

        let sent = client.take_outgoing();
        assert_eq!(sent.len(), 10);
        let stamps: Vec<i64> = sent
            .iter()
            .filter_map(|m| m.input().map(|i| i.timestamp))
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_correction_replays_on_server_state() {
        let mut client = welcomed(5);
        let spawn = client.local_actor().unwrap().clone();
        client.handle(update_for(&spawn, 0, StateFlags::NORMAL));
        client.sample_input(InputFlags::from_bits(InputFlags::ACCELERATE), 1.0, 1.0);
        for _ in 0..6 {
            client.step();
        }
        let acked = client.take_outgoing()[2].input().unwrap().timestamp;

        let mut server = spawn.clone();
        server.position += Vec2::new(0.0, 30.0);
        client.handle(update_for(&server, acked, StateFlags::NORMAL));

        let correction = client.last_correction().unwrap();
        assert_eq!(correction.replayed, 3);
        assert_eq!(client.pending_inputs(), 3);
        assert!(client.local_actor().unwrap().position.y > spawn.position.y + 29.0);
    }

    #[test]
    fn test_remote_vehicles_are_dead_reckoned() {
        let mut client = welcomed(1);
        client.handle(ServerMessage::VehicleSpawned {
            actor_id: 2,
            kind: ActorKind::Bike,
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
        });
        assert_eq!(client.remote(2).unwrap().position(), Vec2::ZERO);

        let update = |timestamp, x| ServerMessage::VehicleActorUpdate {
            server_id: 2,
            x,
            y: 0.0,
            rotation: 0.0,
            vel_x: 100.0,
            vel_y: 0.0,
            timestamp,
            last_input: InputFlags::ACCELERATE,
            state_flags: 0,
        };
        client.handle(update(1000, 50.0));
        client.handle(update(1100, 60.0));
        // Snapped to 60 and pushed 100ms ahead
        let remote = client.remote(2).unwrap();
        assert!((remote.position().x - 70.0).abs() < 1e-3);
        assert!(remote.last_input.accelerate());

        client.handle(update(1050, -500.0));
        client.step();
        assert!(client.remote(2).unwrap().position().x > 70.0);

        // Updates about our own vehicle never create a remote
        client.handle(ServerMessage::VehicleActorUpdate {
            server_id: 1,
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            vel_x: 0.0,
            vel_y: 0.0,
            timestamp: 1000,
            last_input: 0,
            state_flags: 0,
        });
        assert!(client.remote(1).is_none());
    }

    #[test]
    fn test_asteroids_appear_and_actors_leave() {
        let mut client = welcomed(1);
        client.handle(ServerMessage::ActorUpdate {
            server_id: 40,
            x: 5.0,
            y: 5.0,
            vel_x: 0.0,
            vel_y: 0.0,
            timestamp: 10,
        });
        assert_eq!(client.remote(40).unwrap().kind, ActorKind::Asteroid);

        client.handle(ServerMessage::ActorRemoved { actor_id: 40 });
        assert!(client.remote(40).is_none());
        client.handle(ServerMessage::ActorRemoved { actor_id: 1 });
        assert!(client.local_actor().is_none());

        let events = client.drain_events();
        assert!(matches!(events[0], ServerMessage::Welcome { .. }));
        assert!(matches!(events.last(), Some(ServerMessage::ActorRemoved { actor_id: 1 })));
    }

    #[test]
    fn test_respawn_resets_prediction() {
        let mut client = welcomed(3);
        client.sample_input(InputFlags::from_bits(InputFlags::ACCELERATE), 1.0, 1.0);
        client.step();
        client.step();
        assert_eq!(client.pending_inputs(), 2);
        client.handle(ServerMessage::VehicleSpawned {
            actor_id: 3,
            kind: ActorKind::Car,
            x: -40.0,
            y: 0.0,
            rotation: 1.0,
        });
        assert_eq!(client.pending_inputs(), 0);
        assert_eq!(client.local_actor().unwrap().position, Vec2::new(-40.0, 0.0));
    }
}
