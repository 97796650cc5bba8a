//! Client-side prediction of the local vehicle, corrected by the server
//!
//! Every local input is integrated immediately and kept, together with the
//! state it produced, until the server acknowledges it through
//! `ClientUpdate::client_timestamp`. When the acknowledged server state
//! disagrees with what was predicted for that input, the server state is
//! adopted and only the unacknowledged inputs are replayed on top of it.

use std::collections::VecDeque;

use glam::Vec2;
use log::debug;

use super::protocol::ServerMessage;
use crate::consts::{INPUT_HISTORY_CAPACITY, RECONCILIATION_THRESHOLD, VELOCITY_THRESHOLD};
use crate::settings::VehicleSettings;
use crate::sim::actor::{Actor, StateFlags};
use crate::sim::input::Input;
use crate::sim::vehicle::integrate_input;

/// Correction offsets shorter than this are dropped by [`ClientPredictor::decay_correction`]
const OFFSET_EPSILON: f32 = 0.01;

/// Authoritative state of the local vehicle as of one acknowledged input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerState {
    pub position: Vec2,
    pub rotation: f32,
    pub velocity: Vec2,
    pub angular_velocity: f32,
    /// Last input the server applied
    pub client_timestamp: i64,
    pub state_flags: StateFlags,
}

impl ServerState {
    /// Extract from a `ClientUpdate`; `None` for any other message
    pub fn from_message(message: &ServerMessage) -> Option<Self> {
        match *message {
            ServerMessage::ClientUpdate {
                x,
                y,
                rotation,
                vel_x,
                vel_y,
                vel_rot,
                client_timestamp,
                state_flags,
                ..
            } => Some(Self {
                position: Vec2::new(x, y),
                rotation,
                velocity: Vec2::new(vel_x, vel_y),
                angular_velocity: vel_rot,
                client_timestamp,
                state_flags: StateFlags::from_bits(state_flags),
            }),
            _ => None,
        }
    }
}

/// What a reconciliation changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub position_error: f32,
    pub velocity_error: f32,
    /// Unacknowledged inputs replayed on top of the server state
    pub replayed: usize,
}

#[derive(Debug, Clone, Copy)]
struct PredictedState {
    timestamp: i64,
    position: Vec2,
    velocity: Vec2,
}

#[derive(Debug, Clone)]
pub struct ClientPredictor {
    settings: VehicleSettings,
    unacked: VecDeque<Input>,
    predicted: VecDeque<PredictedState>,
    last_ack: Option<i64>,
    correction_offset: Vec2,
    capacity: usize,
}

impl ClientPredictor {
    pub fn new(settings: VehicleSettings) -> Self {
        Self::with_capacity(settings, INPUT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(settings: VehicleSettings, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            settings,
            unacked: VecDeque::with_capacity(capacity),
            predicted: VecDeque::with_capacity(capacity),
            last_ack: None,
            correction_offset: Vec2::ZERO,
            capacity,
        }
    }

    pub fn settings(&self) -> &VehicleSettings {
        &self.settings
    }

    /// Inputs applied locally but not yet acknowledged
    pub fn pending_inputs(&self) -> usize {
        self.unacked.len()
    }

    pub fn last_acknowledged(&self) -> Option<i64> {
        self.last_ack
    }

    /// Visual offset left behind by the last corrections
    pub fn correction_offset(&self) -> Vec2 {
        self.correction_offset
    }

    /// Where a renderer should draw the actor
    pub fn render_position(&self, actor: &Actor) -> Vec2 {
        actor.position + self.correction_offset
    }

    /// Shrink the visual offset by `retain` (0 snaps, 1 keeps it)
    pub fn decay_correction(&mut self, retain: f32) {
        self.correction_offset *= retain.clamp(0.0, 1.0);
        if self.correction_offset.length_squared() < OFFSET_EPSILON * OFFSET_EPSILON {
            self.correction_offset = Vec2::ZERO;
        }
    }

    /// Integrate one local input immediately and remember it
    pub fn predict(&mut self, actor: &mut Actor, input: Input, dt: f32) {
        integrate_input(actor, &self.settings, &input, dt);
        if self.unacked.len() == self.capacity {
            self.unacked.pop_front();
        }
        if self.predicted.len() == self.capacity {
            self.predicted.pop_front();
        }
        self.unacked.push_back(input);
        self.predicted.push_back(PredictedState {
            timestamp: input.timestamp,
            position: actor.position,
            velocity: actor.velocity,
        });
    }

    /// Apply an authoritative update
    ///
    /// Returns the correction when the server state had to be adopted, `None`
    /// when the update was stale or the prediction was within tolerance.
    pub fn reconcile(
        &mut self,
        actor: &mut Actor,
        server: &ServerState,
        dt: f32,
    ) -> Option<Correction> {
        let ack = server.client_timestamp;
        if self.last_ack.is_some_and(|last| ack < last) {
            return None;
        }
        self.last_ack = Some(ack);
        actor.state = server.state_flags;

        while self.unacked.front().is_some_and(|input| input.timestamp <= ack) {
            self.unacked.pop_front();
        }
        let mut at_ack = None;
        while let Some(state) = self.predicted.front().copied() {
            if state.timestamp > ack {
                break;
            }
            if state.timestamp == ack {
                at_ack = Some(state);
            }
            self.predicted.pop_front();
        }

        let (position_error, velocity_error) = match at_ack {
            Some(state) => (
                state.position.distance(server.position),
                state.velocity.distance(server.velocity),
            ),
            // Nothing predicted for this input: either none was sent yet or it
            // fell out of the buffer. Only trust the prediction if nothing is
            // in flight.
            None if self.unacked.is_empty() => (
                actor.position.distance(server.position),
                actor.velocity.distance(server.velocity),
            ),
            None => (f32::INFINITY, f32::INFINITY),
        };
        if position_error <= RECONCILIATION_THRESHOLD && velocity_error <= VELOCITY_THRESHOLD {
            return None;
        }

        let previous = actor.position;
        actor.position = server.position;
        actor.rotation = server.rotation;
        actor.velocity = server.velocity;
        actor.angular_velocity = server.angular_velocity;

        self.predicted.clear();
        let inputs: Vec<Input> = self.unacked.iter().copied().collect();
        for input in &inputs {
            integrate_input(actor, &self.settings, input, dt);
            self.predicted.push_back(PredictedState {
                timestamp: input.timestamp,
                position: actor.position,
                velocity: actor.velocity,
            });
        }
        self.correction_offset += previous - actor.position;

        debug!(
            "Reconciled actor {} at {}: error {:.2}, replayed {}",
            actor.server_id,
            ack,
            position_error,
            inputs.len()
        );
        Some(Correction {
            position_error,
            velocity_error,
            replayed: inputs.len(),
        })
    }

    /// Forget everything in flight (respawn, reconnect)
    pub fn reset(&mut self) {
        self.unacked.clear();
        self.predicted.clear();
        self.correction_offset = Vec2::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SIM_DT;
    use crate::settings::VehicleTuning;
    use crate::sim::actor::{ActorKind, Pose};
    use crate::sim::input::{InputFlags, InputHistory};
    use crate::sim::vehicle::{apply_input, integrate_history};

    fn setup() -> (Actor, ClientPredictor, Vec<Input>) {
        let settings = VehicleTuning::default().car;
        let mut actor = Actor::vehicle(3, 0, ActorKind::Car, &settings, Pose::default());
        actor.state = StateFlags::normal();
        let inputs = (1..=10)
            .map(|i| {
                let bits = if i % 3 == 0 {
                    InputFlags::ACCELERATE | InputFlags::LEFT
                } else {
                    InputFlags::ACCELERATE
                };
                Input::new(i * 16_667, InputFlags::from_bits(bits))
            })
            .collect();
        (actor, ClientPredictor::new(settings), inputs)
    }

    fn server_state(actor: &Actor, client_timestamp: i64) -> ServerState {
        ServerState {
            position: actor.position,
            rotation: actor.rotation,
            velocity: actor.velocity,
            angular_velocity: actor.angular_velocity,
            client_timestamp,
            state_flags: actor.state,
        }
    }

    #[test]
    fn test_predict_matches_integrator() {
        let (start, mut predictor, inputs) = setup();
        let mut predicted = start.clone();
        let mut reference = start.clone();
        for input in &inputs {
            predictor.predict(&mut predicted, *input, SIM_DT);
            apply_input(&mut reference, predictor.settings(), input, SIM_DT);
        }
        assert_eq!(predicted.position, reference.position);
        assert_eq!(predictor.pending_inputs(), 10);
    }

    #[test]
    fn test_matching_ack_trusts_prediction() {
        let (start, mut predictor, inputs) = setup();
        let mut local = start.clone();
        let mut server = start.clone();
        for input in &inputs {
            predictor.predict(&mut local, *input, SIM_DT);
        }
        for input in &inputs[..5] {
            apply_input(&mut server, predictor.settings(), input, SIM_DT);
        }
        let before = local.position;
        let state = server_state(&server, inputs[4].timestamp);
        assert!(predictor.reconcile(&mut local, &state, SIM_DT).is_none());
        assert_eq!(local.position, before);
        assert_eq!(predictor.pending_inputs(), 5);
        assert_eq!(predictor.last_acknowledged(), Some(inputs[4].timestamp));
    }

    #[test]
    fn test_divergence_replays_unacked_inputs() {
        let (start, mut predictor, inputs) = setup();
        let mut local = start.clone();
        for input in &inputs {
            predictor.predict(&mut local, *input, SIM_DT);
        }

        // The server saw a collision the client did not
        let mut server = start.clone();
        for input in &inputs[..5] {
            apply_input(&mut server, predictor.settings(), input, SIM_DT);
        }
        server.position += Vec2::new(50.0, 0.0);
        let state = server_state(&server, inputs[4].timestamp);

        let correction = predictor.reconcile(&mut local, &state, SIM_DT).unwrap();
        assert_eq!(correction.replayed, 5);
        assert!((correction.position_error - 50.0).abs() < 1e-3);

        let mut expected = server.clone();
        for input in &inputs[5..] {
            apply_input(&mut expected, predictor.settings(), input, SIM_DT);
        }
        assert_eq!(local.position, expected.position);
        assert_eq!(local.velocity, expected.velocity);
        assert!((predictor.correction_offset() - Vec2::new(-50.0, 0.0)).length() < 1e-2);

        predictor.decay_correction(0.0);
        assert_eq!(predictor.correction_offset(), Vec2::ZERO);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let (start, mut predictor, inputs) = setup();
        let mut local = start.clone();
        for input in &inputs {
            predictor.predict(&mut local, *input, SIM_DT);
        }
        let mut far = server_state(&local, inputs[6].timestamp);
        far.position = Vec2::new(1000.0, 1000.0);
        predictor.reconcile(&mut local, &far, SIM_DT);
        let after = local.position;

        let mut stale = far;
        stale.client_timestamp = inputs[2].timestamp;
        stale.position = Vec2::new(-1000.0, 0.0);
        assert!(predictor.reconcile(&mut local, &stale, SIM_DT).is_none());
        assert_eq!(local.position, after);
        assert_eq!(predictor.last_acknowledged(), Some(inputs[6].timestamp));
    }

    #[test]
    fn test_adopts_server_state_flags() {
        let (start, mut predictor, inputs) = setup();
        let mut local = start.clone();
        let mut disabled = server_state(&local, 0);
        disabled.state_flags = StateFlags::from_bits(StateFlags::DISABLED);
        assert!(predictor.reconcile(&mut local, &disabled, SIM_DT).is_none());
        assert!(local.state.contains(StateFlags::DISABLED));

        // Disabled vehicles ignore throttle
        predictor.predict(&mut local, inputs[0], SIM_DT);
        assert_eq!(local.velocity, Vec2::ZERO);
    }

    #[test]
    fn test_prediction_follows_server_control_rules() {
        let (start, _, inputs) = setup();
        for bits in [0, StateFlags::DISABLED, StateFlags::ELIMINATED] {
            let mut start = start.clone();
            start.state = StateFlags::from_bits(bits);
            start.velocity = Vec2::new(30.0, 0.0);

            let mut predictor = ClientPredictor::new(VehicleTuning::default().car);
            let mut local = start.clone();
            let mut server = start.clone();
            let mut history = InputHistory::new(INPUT_HISTORY_CAPACITY);
            for input in &inputs {
                predictor.predict(&mut local, *input, SIM_DT);
                history.record(*input);
            }
            integrate_history(&mut server, predictor.settings(), &mut history, SIM_DT);

            assert_eq!(local.position, server.position, "state bits {bits}");
            assert_eq!(local.velocity, server.velocity, "state bits {bits}");
        }
    }

    #[test]
    fn test_unacked_inputs_are_bounded() {
        let settings = VehicleTuning::default().car;
        let mut actor = Actor::vehicle(1, 0, ActorKind::Car, &settings, Pose::default());
        let mut predictor = ClientPredictor::with_capacity(settings, 8);
        for i in 0..20 {
            predictor.predict(&mut actor, Input::new(i, InputFlags::empty()), SIM_DT);
        }
        assert_eq!(predictor.pending_inputs(), 8);
    }

    #[test]
    fn test_from_message() {
        let message = ServerMessage::ClientUpdate {
            x: 1.0,
            y: 2.0,
            rotation: 0.5,
            vel_x: 3.0,
            vel_y: 4.0,
            vel_rot: 0.1,
            client_timestamp: 99,
            collision_flags: 0,
            state_flags: StateFlags::CELEBRATING,
        };
        let state = ServerState::from_message(&message).unwrap();
        assert_eq!(state.position, Vec2::new(1.0, 2.0));
        assert_eq!(state.client_timestamp, 99);
        assert!(state.state_flags.contains(StateFlags::CELEBRATING));
        assert!(ServerState::from_message(&ServerMessage::RaceStarted).is_none());
    }
}
