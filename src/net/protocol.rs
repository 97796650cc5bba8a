//! Wire messages exchanged with the network session
//!
//! Transport is someone else's job; this module fixes the message kinds,
//! their fields and whether each one needs reliable delivery. Frames are
//! encoded with bincode's serde integration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::GameMode;
use crate::sim::actor::{ActorId, ActorKind, Pose};
use crate::sim::events::{RaceEvent, Standing};
use crate::sim::input::{Input, InputFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Reliable,
    Unreliable,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// One per local simulation tick
    ClientInput {
        timestamp: i64,
        flags: u8,
        steering_multiplier: f32,
        acceleration_multiplier: f32,
    },
    Ready {
        ready: bool,
    },
    Pause {
        paused: bool,
    },
}

impl ClientMessage {
    pub fn delivery(&self) -> Delivery {
        match self {
            ClientMessage::ClientInput { .. } => Delivery::Unreliable,
            ClientMessage::Ready { .. } | ClientMessage::Pause { .. } => Delivery::Reliable,
        }
    }

    pub fn from_input(input: &Input) -> Self {
        ClientMessage::ClientInput {
            timestamp: input.timestamp,
            flags: input.flags.bits,
            steering_multiplier: input.steering_multiplier,
            acceleration_multiplier: input.acceleration_multiplier,
        }
    }

    /// Decoded input, with unknown flag bits and out-of-range multipliers cleaned up
    pub fn input(&self) -> Option<Input> {
        match *self {
            ClientMessage::ClientInput {
                timestamp,
                flags,
                steering_multiplier,
                acceleration_multiplier,
            } => Some(Input::with_multipliers(
                timestamp,
                InputFlags::from_bits(flags),
                steering_multiplier,
                acceleration_multiplier,
            )),
            _ => None,
        }
    }
}

/// Server to client(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Sent once on connection; names the client's own actor
    Welcome {
        actor_id: ActorId,
        mode: GameMode,
        lap_count: u32,
    },
    /// Authoritative state of the receiving client's own vehicle
    ClientUpdate {
        x: f32,
        y: f32,
        rotation: f32,
        vel_x: f32,
        vel_y: f32,
        vel_rot: f32,
        /// Timestamp of the last input the server applied
        client_timestamp: i64,
        collision_flags: u8,
        state_flags: u8,
    },
    VehicleActorUpdate {
        server_id: ActorId,
        x: f32,
        y: f32,
        rotation: f32,
        vel_x: f32,
        vel_y: f32,
        /// Server milliseconds
        timestamp: i64,
        last_input: u8,
        state_flags: u8,
    },
    ActorUpdate {
        server_id: ActorId,
        x: f32,
        y: f32,
        vel_x: f32,
        vel_y: f32,
        timestamp: i64,
    },
    LapLine {
        actor_id: ActorId,
        lap: u32,
    },
    PlayerFinished {
        actor_id: ActorId,
        position: u32,
    },
    VehicleExploded {
        actor_id: ActorId,
    },
    VehicleFell {
        actor_id: ActorId,
    },
    VehicleSpawned {
        actor_id: ActorId,
        kind: ActorKind,
        x: f32,
        y: f32,
        rotation: f32,
    },
    ActorRemoved {
        actor_id: ActorId,
    },
    PointScored {
        actor_id: ActorId,
        points: u32,
    },
    CountdownStarted {
        duration: f32,
    },
    RaceStarted,
    Paused {
        paused: bool,
    },
    RaceFinished {
        standings: Vec<Standing>,
    },
    SessionEnded,
}

impl ServerMessage {
    pub fn delivery(&self) -> Delivery {
        match self {
            ServerMessage::ClientUpdate { .. }
            | ServerMessage::VehicleActorUpdate { .. }
            | ServerMessage::ActorUpdate { .. } => Delivery::Unreliable,
            _ => Delivery::Reliable,
        }
    }

    pub fn vehicle_spawned(actor_id: ActorId, kind: ActorKind, pose: Pose) -> Self {
        ServerMessage::VehicleSpawned {
            actor_id,
            kind,
            x: pose.position.x,
            y: pose.position.y,
            rotation: pose.rotation,
        }
    }

    /// Broadcast form of a race event
    pub fn from_event(event: &RaceEvent) -> Self {
        match event {
            RaceEvent::CountdownStarted { duration } => ServerMessage::CountdownStarted {
                duration: *duration,
            },
            RaceEvent::RaceStarted => ServerMessage::RaceStarted,
            RaceEvent::LapLine { actor_id, lap, .. } => ServerMessage::LapLine {
                actor_id: *actor_id,
                lap: *lap,
            },
            RaceEvent::PlayerFinished { actor_id, position } => ServerMessage::PlayerFinished {
                actor_id: *actor_id,
                position: *position,
            },
            RaceEvent::VehicleExploded { actor_id } => ServerMessage::VehicleExploded {
                actor_id: *actor_id,
            },
            RaceEvent::VehicleFell { actor_id } => ServerMessage::VehicleFell {
                actor_id: *actor_id,
            },
            RaceEvent::VehicleSpawned {
                actor_id,
                kind,
                pose,
            } => Self::vehicle_spawned(*actor_id, *kind, *pose),
            RaceEvent::PointScored { actor_id, points } => ServerMessage::PointScored {
                actor_id: *actor_id,
                points: *points,
            },
            RaceEvent::Paused => ServerMessage::Paused { paused: true },
            RaceEvent::Resumed => ServerMessage::Paused { paused: false },
            RaceEvent::RaceFinished { standings } => ServerMessage::RaceFinished {
                standings: standings.clone(),
            },
            RaceEvent::SessionEnded => ServerMessage::SessionEnded,
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::serde::encode_to_vec(message, bincode::config::standard())?)
}

/// Decode exactly one message; leftover bytes are an error
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let (message, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_classes() {
        let input = ClientMessage::from_input(&Input::new(5, InputFlags::empty()));
        assert_eq!(input.delivery(), Delivery::Unreliable);
        assert_eq!(ClientMessage::Ready { ready: true }.delivery(), Delivery::Reliable);

        let update = ServerMessage::ActorUpdate {
            server_id: 1,
            x: 0.0,
            y: 0.0,
            vel_x: 0.0,
            vel_y: 0.0,
            timestamp: 0,
        };
        assert_eq!(update.delivery(), Delivery::Unreliable);
        assert_eq!(ServerMessage::RaceStarted.delivery(), Delivery::Reliable);
        assert_eq!(
            ServerMessage::from_event(&RaceEvent::VehicleFell { actor_id: 2 }).delivery(),
            Delivery::Reliable
        );
    }

    #[test]
    fn test_hostile_input_is_sanitized() {
        let message = ClientMessage::ClientInput {
            timestamp: 42,
            flags: 0xff,
            steering_multiplier: 7.0,
            acceleration_multiplier: -1.0,
        };
        let bytes = encode(&message).unwrap();
        let decoded: ClientMessage = decode(&bytes).unwrap();
        let input = decoded.input().unwrap();
        assert_eq!(input.flags.bits, 0x0f);
        assert_eq!(input.steering_multiplier, 1.0);
        assert_eq!(input.acceleration_multiplier, 0.0);
        assert!(ClientMessage::Pause { paused: true }.input().is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut bytes = encode(&ServerMessage::RaceFinished {
            standings: vec![Standing {
                position: 1,
                actor_id: 4,
                laps: 3,
                finished: true,
                finish_time: Some(95.5),
                best_lap: Some(30.1),
                points: 0,
            }],
        })
        .unwrap();
        let decoded: ServerMessage = decode(&bytes).unwrap();
        assert!(matches!(decoded, ServerMessage::RaceFinished { ref standings } if standings[0].actor_id == 4));

        bytes.push(0);
        assert!(matches!(decode::<ServerMessage>(&bytes), Err(CodecError::TrailingBytes(1))));
        assert!(matches!(decode::<ServerMessage>(&[0xff, 0xff]), Err(CodecError::Decode(_))));
    }
}
