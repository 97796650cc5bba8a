//! Typed race events and their subscribers
//!
//! The race session emits events into an [`EventQueue`]; the server turns
//! them into reliable broadcasts, presentation layers (VFX, audio, UI)
//! subscribe through [`EventSubscriber`].

use serde::{Deserialize, Serialize};

use super::actor::{ActorId, ActorKind, Pose};

/// Final or current classification of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based
    pub position: u32,
    pub actor_id: ActorId,
    pub laps: u32,
    pub finished: bool,
    /// Race time at the finish line, seconds
    pub finish_time: Option<f32>,
    pub best_lap: Option<f32>,
    /// Elimination rounds won
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RaceEvent {
    CountdownStarted { duration: f32 },
    RaceStarted,
    LapLine { actor_id: ActorId, lap: u32, lap_time: f32 },
    PlayerFinished { actor_id: ActorId, position: u32 },
    VehicleExploded { actor_id: ActorId },
    VehicleFell { actor_id: ActorId },
    VehicleSpawned { actor_id: ActorId, kind: ActorKind, pose: Pose },
    PointScored { actor_id: ActorId, points: u32 },
    Paused,
    Resumed,
    RaceFinished { standings: Vec<Standing> },
    SessionEnded,
}

/// Receives every drained event, in emission order
pub trait EventSubscriber {
    fn on_event(&mut self, event: &RaceEvent);
}

impl<S: EventSubscriber + ?Sized> EventSubscriber for Box<S> {
    fn on_event(&mut self, event: &RaceEvent) {
        (**self).on_event(event);
    }
}

impl<S: EventSubscriber + ?Sized> EventSubscriber for &mut S {
    fn on_event(&mut self, event: &RaceEvent) {
        (**self).on_event(event);
    }
}

impl EventSubscriber for Vec<RaceEvent> {
    fn on_event(&mut self, event: &RaceEvent) {
        self.push(event.clone());
    }
}

/// Writes each event to the log
#[derive(Debug, Default)]
pub struct LogSubscriber;

impl EventSubscriber for LogSubscriber {
    fn on_event(&mut self, event: &RaceEvent) {
        match event {
            RaceEvent::RaceFinished { standings } => {
                for s in standings {
                    log::info!(
                        "#{} actor {} laps {} best lap {}",
                        s.position,
                        s.actor_id,
                        s.laps,
                        s.best_lap.map_or("-".to_string(), |t| format!("{:.2}s", t))
                    );
                }
            }
            other => log::debug!("{:?}", other),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<RaceEvent>,
}

impl EventQueue {
    pub fn emit(&mut self, event: RaceEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Take every queued event, oldest first
    pub fn drain(&mut self) -> Vec<RaceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Hand every queued event to each subscriber, then return them
    pub fn publish<S: EventSubscriber>(&mut self, subscribers: &mut [S]) -> Vec<RaceEvent> {
        let events = self.drain();
        for event in &events {
            for subscriber in subscribers.iter_mut() {
                subscriber.on_event(event);
            }
        }
        events
    }
}
