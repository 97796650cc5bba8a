//! Race session state machine
//!
//! `Prepping -> Countdown -> Racing -> RaceOver`, with `Paused` wrapping the
//! phase it interrupted. The session tracks waypoint progress, laps and
//! finishers for every player and drives the game-mode rules (race,
//! elimination, time trial). It never integrates physics itself; it reads
//! and flags the actors of the [`World`] it is updated against.

use std::sync::Arc;

use glam::Vec2;

use super::actor::{ActorId, StateFlags};
use super::events::{EventQueue, EventSubscriber, RaceEvent, Standing};
use super::spatial::Aabb;
use super::track::Track;
use super::world::World;
use crate::settings::{GameMode, ServerSettings};

#[derive(Debug, Clone, PartialEq)]
pub enum RacePhase {
    /// Waiting for every player to signal ready
    Prepping,
    Countdown {
        remaining: f32,
    },
    Racing {
        elapsed: f32,
        /// Running once the first player has finished
        finish_timeout: Option<f32>,
    },
    /// Clocks frozen, bookkeeping still runs; resumes into the wrapped phase
    Paused {
        resume: Box<RacePhase>,
    },
    RaceOver,
}

impl RacePhase {
    pub fn name(&self) -> &'static str {
        match self {
            RacePhase::Prepping => "Prepping",
            RacePhase::Countdown { .. } => "Countdown",
            RacePhase::Racing { .. } => "Racing",
            RacePhase::Paused { .. } => "Paused",
            RacePhase::RaceOver => "RaceOver",
        }
    }
}

/// Rules copied out of the server settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceRules {
    pub mode: GameMode,
    pub lap_count: u32,
    pub countdown_secs: f32,
    pub finish_timeout_secs: f32,
    pub respawn_delay_secs: f32,
    pub respawn_invincibility_secs: f32,
    pub pause_budget_secs: f32,
    pub points_to_win: u32,
    pub view_half_extents: Vec2,
}

impl From<&ServerSettings> for RaceRules {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            mode: settings.mode,
            lap_count: settings.lap_count,
            countdown_secs: settings.countdown_secs,
            finish_timeout_secs: settings.finish_timeout_secs,
            respawn_delay_secs: settings.respawn_delay_secs,
            respawn_invincibility_secs: settings.respawn_invincibility_secs,
            pause_budget_secs: settings.pause_budget_secs,
            points_to_win: settings.elimination_points_to_win,
            view_half_extents: settings.elimination_view_half_extents,
        }
    }
}

/// Per-player bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerProgress {
    pub actor_id: ActorId,
    pub is_cpu: bool,
    pub ready: bool,
    /// Waypoint at the start of the segment the vehicle is on
    pub current_waypoint: u32,
    /// False while still behind the start line on the grid
    pub crossed_start: bool,
    pub laps: u32,
    pub total_distance: f32,
    pub lap_started_at: f32,
    pub lap_times: Vec<f32>,
    pub finish_time: Option<f32>,
    pub points: u32,
    /// Seconds of elimination immunity left
    pub invincibility: f32,
    /// Seconds until respawn after falling off
    pub respawn_in: Option<f32>,
}

impl PlayerProgress {
    fn new(actor_id: ActorId, is_cpu: bool) -> Self {
        Self {
            actor_id,
            is_cpu,
            ready: is_cpu,
            current_waypoint: 0,
            crossed_start: false,
            laps: 0,
            total_distance: 0.0,
            lap_started_at: 0.0,
            lap_times: Vec::new(),
            finish_time: None,
            points: 0,
            invincibility: 0.0,
            respawn_in: None,
        }
    }

    pub fn finished(&self) -> bool {
        self.finish_time.is_some()
    }

    pub fn best_lap(&self) -> Option<f32> {
        self.lap_times.iter().copied().reduce(f32::min)
    }

    fn progress(&self, track: &Track, position: Vec2) -> f32 {
        let along = track.progress(self.current_waypoint, position);
        if self.crossed_start {
            self.laps as f32 * track.track_length() + along
        } else {
            along - track.track_length()
        }
    }
}

#[derive(Debug)]
pub struct RaceSession {
    phase: RacePhase,
    rules: RaceRules,
    track: Arc<Track>,
    players: Vec<PlayerProgress>,
    finish_order: Vec<ActorId>,
    /// Pause seconds left for the rest of the session
    pause_budget: f32,
    events: EventQueue,
}

impl RaceSession {
    pub fn new(settings: &ServerSettings, track: Arc<Track>) -> Self {
        Self {
            phase: RacePhase::Prepping,
            rules: RaceRules::from(settings),
            track,
            players: Vec::new(),
            finish_order: Vec::new(),
            pause_budget: settings.pause_budget_secs,
            events: EventQueue::default(),
        }
    }

    pub fn phase(&self) -> &RacePhase {
        &self.phase
    }

    pub fn rules(&self) -> &RaceRules {
        &self.rules
    }

    pub fn is_over(&self) -> bool {
        self.phase == RacePhase::RaceOver
    }

    pub fn players(&self) -> &[PlayerProgress] {
        &self.players
    }

    pub fn player(&self, actor_id: ActorId) -> Option<&PlayerProgress> {
        self.players.iter().find(|p| p.actor_id == actor_id)
    }

    fn player_index(&self, actor_id: ActorId) -> Option<usize> {
        self.players.iter().position(|p| p.actor_id == actor_id)
    }

    pub fn human_count(&self) -> usize {
        self.players.iter().filter(|p| !p.is_cpu).count()
    }

    /// Actors in the order they crossed the finish line
    pub fn finish_order(&self) -> &[ActorId] {
        &self.finish_order
    }

    pub fn drain_events(&mut self) -> Vec<RaceEvent> {
        self.events.drain()
    }

    /// Drain queued events through `subscribers`
    pub fn publish_events<S: EventSubscriber>(&mut self, subscribers: &mut [S]) -> Vec<RaceEvent> {
        self.events.publish(subscribers)
    }

    /// Register a player while prepping; CPU players are ready immediately
    pub fn add_player(&mut self, actor_id: ActorId, is_cpu: bool) -> bool {
        if self.phase != RacePhase::Prepping || self.player_index(actor_id).is_some() {
            return false;
        }
        self.players.push(PlayerProgress::new(actor_id, is_cpu));
        true
    }

    pub fn set_ready(&mut self, actor_id: ActorId, ready: bool) -> bool {
        let Some(index) = self.player_index(actor_id) else {
            return false;
        };
        self.players[index].ready = ready;
        log::debug!("Actor {} ready: {}", actor_id, ready);
        true
    }

    /// Drop a disconnected player; the session ends once no human is left
    pub fn remove_player(&mut self, actor_id: ActorId) -> Option<PlayerProgress> {
        let index = self.player_index(actor_id)?;
        let removed = self.players.remove(index);
        if !removed.is_cpu && self.human_count() == 0 && self.phase != RacePhase::RaceOver {
            log::info!("Last human player left, ending session");
            self.phase = RacePhase::RaceOver;
            self.events.emit(RaceEvent::SessionEnded);
        }
        Some(removed)
    }

    pub fn pause_budget(&self) -> f32 {
        self.pause_budget
    }

    /// Freeze or resume the race clocks; returns whether the phase changed
    ///
    /// Pausing is refused once the session's pause budget is spent.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        match (&self.phase, paused) {
            (RacePhase::Countdown { .. } | RacePhase::Racing { .. }, true) => {
                if self.pause_budget <= 0.0 {
                    log::debug!("Pause refused, budget spent");
                    return false;
                }
                let current = std::mem::replace(&mut self.phase, RacePhase::RaceOver);
                self.phase = RacePhase::Paused {
                    resume: Box::new(current),
                };
                self.events.emit(RaceEvent::Paused);
                true
            }
            (RacePhase::Paused { .. }, false) => {
                if let RacePhase::Paused { resume } =
                    std::mem::replace(&mut self.phase, RacePhase::RaceOver)
                {
                    self.phase = *resume;
                }
                self.events.emit(RaceEvent::Resumed);
                true
            }
            _ => false,
        }
    }

    /// Advance the state machine by one simulation tick
    pub fn update(&mut self, world: &mut World, dt: f32) {
        match &mut self.phase {
            RacePhase::Prepping => {
                if !self.players.is_empty() && self.players.iter().all(|p| p.ready) {
                    self.start_countdown();
                }
            }
            RacePhase::Countdown { remaining } => {
                *remaining -= dt;
                if *remaining <= 0.0 {
                    self.start_race(world);
                }
            }
            RacePhase::Racing { .. } => self.update_racing(world, dt),
            RacePhase::Paused { resume } => {
                let racing = matches!(**resume, RacePhase::Racing { .. });
                self.pause_budget -= dt;
                if racing {
                    self.update_racing(world, dt);
                }
                if self.pause_budget <= 0.0 && matches!(self.phase, RacePhase::Paused { .. }) {
                    log::info!("Pause budget spent, resuming");
                    self.set_paused(false);
                }
            }
            RacePhase::RaceOver => {}
        }
    }

    /// Race clock, whether or not it is frozen by a pause
    fn race_clock_mut(&mut self) -> Option<(&mut f32, &mut Option<f32>, bool)> {
        match &mut self.phase {
            RacePhase::Racing {
                elapsed,
                finish_timeout,
            } => Some((elapsed, finish_timeout, true)),
            RacePhase::Paused { resume } => match resume.as_mut() {
                RacePhase::Racing {
                    elapsed,
                    finish_timeout,
                } => Some((elapsed, finish_timeout, false)),
                _ => None,
            },
            _ => None,
        }
    }

    fn start_countdown(&mut self) {
        log::info!(
            "All {} players ready, countdown {:.1}s",
            self.players.len(),
            self.rules.countdown_secs
        );
        self.phase = RacePhase::Countdown {
            remaining: self.rules.countdown_secs,
        };
        self.events.emit(RaceEvent::CountdownStarted {
            duration: self.rules.countdown_secs,
        });
    }

    fn start_race(&mut self, world: &mut World) {
        for player in &mut self.players {
            let Some(actor) = world.actor_mut(player.actor_id) else {
                continue;
            };
            actor.state = StateFlags::normal();
            player.current_waypoint = self.track.closest_segment(actor.position);
            player.crossed_start = player.current_waypoint == 0;
            player.lap_started_at = 0.0;
            player.total_distance = player.progress(&self.track, actor.position);
        }
        self.phase = RacePhase::Racing {
            elapsed: 0.0,
            finish_timeout: None,
        };
        log::info!("Race started ({}, {} laps)", self.rules.mode.as_str(), self.rules.lap_count);
        self.events.emit(RaceEvent::RaceStarted);
    }

    fn update_racing(&mut self, world: &mut World, dt: f32) {
        let Some((elapsed, finish_timeout, running)) = self.race_clock_mut() else {
            return;
        };
        if running {
            *elapsed += dt;
            if let Some(remaining) = finish_timeout {
                *remaining -= dt;
            }
        }
        let (elapsed, timed_out) = (*elapsed, finish_timeout.is_some_and(|t| t <= 0.0));

        for index in 0..self.players.len() {
            self.update_player(index, world, elapsed, dt);
        }

        if self.rules.mode == GameMode::Elimination {
            self.update_elimination(world);
            return;
        }

        let all_finished =
            !self.players.is_empty() && self.players.iter().all(PlayerProgress::finished);
        if all_finished {
            log::info!("Every player finished after {:.2}s", elapsed);
            self.finish_race();
        } else if timed_out {
            log::info!("Finish timeout expired after {:.2}s", elapsed);
            self.finish_race();
        }
    }

    fn update_player(&mut self, index: usize, world: &mut World, elapsed: f32, dt: f32) {
        let track = Arc::clone(&self.track);
        let rules = self.rules;
        let player = &mut self.players[index];
        let id = player.actor_id;
        let mut respawned = false;
        let mut newly_finished = false;

        {
            let Some(actor) = world.actor_mut(id) else {
                return;
            };
            player.invincibility = (player.invincibility - dt).max(0.0);

            if let Some(remaining) = player.respawn_in.as_mut() {
                *remaining -= dt;
                if *remaining > 0.0 {
                    return;
                }
                player.respawn_in = None;
                let pose = track.waypoint(player.current_waypoint).spawn_pose();
                actor.respawn_at(pose);
                actor.state = if player.finished() {
                    StateFlags::from_bits(StateFlags::CELEBRATING)
                } else {
                    StateFlags::normal()
                };
                player.invincibility = rules.respawn_invincibility_secs;
                self.events.emit(RaceEvent::VehicleSpawned {
                    actor_id: id,
                    kind: actor.kind,
                    pose,
                });
                respawned = true;
            } else if actor.state.contains(StateFlags::ELIMINATED) || player.finished() {
                return;
            } else {
                let (next, crossings) = track.advance(player.current_waypoint, actor.position);
                player.current_waypoint = next;
                for _ in 0..crossings {
                    if !player.crossed_start {
                        player.crossed_start = true;
                        player.lap_started_at = elapsed;
                        continue;
                    }
                    player.laps += 1;
                    let lap_time = elapsed - player.lap_started_at;
                    player.lap_times.push(lap_time);
                    player.lap_started_at = elapsed;
                    self.events.emit(RaceEvent::LapLine {
                        actor_id: id,
                        lap: player.laps,
                        lap_time,
                    });
                    log::debug!("Actor {} lap {} in {:.2}s", id, player.laps, lap_time);

                    if rules.mode != GameMode::Elimination && player.laps >= rules.lap_count {
                        player.finish_time = Some(elapsed);
                        actor.state.set(StateFlags::CELEBRATING, true);
                        newly_finished = true;
                        break;
                    }
                }
                player.total_distance = player.progress(&track, actor.position);

                if !newly_finished && track.is_off_track(next, actor.position) {
                    actor.state.set(StateFlags::DISABLED, true);
                    actor.velocity = Vec2::ZERO;
                    actor.angular_velocity = 0.0;
                    player.respawn_in = Some(rules.respawn_delay_secs);
                    self.events.emit(RaceEvent::VehicleFell { actor_id: id });
                    log::debug!("Actor {} fell off at waypoint {}", id, next);
                }
            }
        }

        if respawned && let Some(history) = world.history_mut(id) {
            history.clear();
        }
        if newly_finished {
            self.record_finish(id);
        }
    }

    fn record_finish(&mut self, actor_id: ActorId) {
        if self.finish_order.contains(&actor_id) {
            return;
        }
        self.finish_order.push(actor_id);
        let position = self.finish_order.len() as u32;
        log::info!("Actor {} finished in position {}", actor_id, position);
        self.events.emit(RaceEvent::PlayerFinished { actor_id, position });

        let timeout = self.rules.finish_timeout_secs;
        if let Some((_, finish_timeout, _)) = self.race_clock_mut()
            && finish_timeout.is_none()
        {
            *finish_timeout = Some(timeout);
        }
    }

    fn update_elimination(&mut self, world: &mut World) {
        if self.players.len() < 2 {
            return;
        }
        let is_active = |world: &World, id: ActorId| {
            world
                .actor(id)
                .is_some_and(|a| !a.state.contains(StateFlags::ELIMINATED))
        };

        // Leader: furthest along; earliest registered wins ties
        let mut leader: Option<usize> = None;
        for (index, player) in self.players.iter().enumerate() {
            if !is_active(world, player.actor_id) {
                continue;
            }
            if leader.is_none_or(|l| player.total_distance > self.players[l].total_distance) {
                leader = Some(index);
            }
        }
        let Some(leader) = leader else {
            return;
        };
        let Some(centre) = world.actor(self.players[leader].actor_id).map(|a| a.position) else {
            return;
        };
        let view = Aabb::from_center_half_extents(centre, self.rules.view_half_extents);

        for (index, player) in self.players.iter().enumerate() {
            if index == leader || player.respawn_in.is_some() || player.invincibility > 0.0 {
                continue;
            }
            let Some(actor) = world.actor_mut(player.actor_id) else {
                continue;
            };
            if actor.state.contains(StateFlags::ELIMINATED) || view.contains_point(actor.position) {
                continue;
            }
            actor.state.set(StateFlags::ELIMINATED, true);
            actor.velocity = Vec2::ZERO;
            actor.angular_velocity = 0.0;
            log::debug!("Actor {} left the view and was eliminated", player.actor_id);
            self.events.emit(RaceEvent::VehicleExploded {
                actor_id: player.actor_id,
            });
        }

        let survivors: Vec<usize> = (0..self.players.len())
            .filter(|i| is_active(world, self.players[*i].actor_id))
            .collect();
        if let [winner] = survivors.as_slice() {
            let winner = *winner;
            let player = &mut self.players[winner];
            player.points += 1;
            let (actor_id, points) = (player.actor_id, player.points);
            log::info!("Actor {} wins the round ({} points)", actor_id, points);
            self.events.emit(RaceEvent::PointScored { actor_id, points });

            if points >= self.rules.points_to_win {
                self.finish_race();
            } else {
                self.reset_round(winner, world);
            }
        }
    }

    /// Respawn everyone on the round winner's waypoint
    fn reset_round(&mut self, winner: usize, world: &mut World) {
        let anchor = self.players[winner].clone();
        let mut order: Vec<usize> = vec![winner];
        order.extend((0..self.players.len()).filter(|i| *i != winner));
        let poses = self.track.respawn_grid(anchor.current_waypoint, order.len());

        for (slot, index) in order.into_iter().enumerate() {
            let player = &mut self.players[index];
            let Some(actor) = world.actor_mut(player.actor_id) else {
                continue;
            };
            let pose = poses[slot];
            actor.respawn_at(pose);
            actor.state = StateFlags::normal();
            player.current_waypoint = anchor.current_waypoint;
            player.crossed_start = anchor.crossed_start;
            player.laps = anchor.laps;
            player.total_distance = player.progress(&self.track, pose.position);
            player.respawn_in = None;
            player.invincibility = self.rules.respawn_invincibility_secs;
            self.events.emit(RaceEvent::VehicleSpawned {
                actor_id: player.actor_id,
                kind: actor.kind,
                pose,
            });
            let id = player.actor_id;
            if let Some(history) = world.history_mut(id) {
                history.clear();
            }
        }
    }

    fn finish_race(&mut self) {
        self.phase = RacePhase::RaceOver;
        let standings = self.standings();
        self.events.emit(RaceEvent::RaceFinished { standings });
    }

    /// Current classification
    ///
    /// Race: finishers in crossing order, then by distance covered.
    /// Time trial: by best lap. Elimination: by points, then distance.
    pub fn standings(&self) -> Vec<Standing> {
        let mut ranked: Vec<&PlayerProgress> = self.players.iter().collect();
        let finish_rank = |p: &PlayerProgress| {
            self.finish_order
                .iter()
                .position(|id| *id == p.actor_id)
                .unwrap_or(usize::MAX)
        };
        let by_distance = |a: &PlayerProgress, b: &PlayerProgress| {
            b.total_distance
                .total_cmp(&a.total_distance)
                .then(a.actor_id.cmp(&b.actor_id))
        };

        match self.rules.mode {
            GameMode::Race => ranked.sort_by(|a, b| {
                finish_rank(a)
                    .cmp(&finish_rank(b))
                    .then_with(|| by_distance(a, b))
            }),
            GameMode::TimeTrial => ranked.sort_by(|a, b| {
                let best = |p: &PlayerProgress| p.best_lap().unwrap_or(f32::INFINITY);
                best(a).total_cmp(&best(b)).then_with(|| by_distance(a, b))
            }),
            GameMode::Elimination => {
                ranked.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| by_distance(a, b)))
            }
        }

        ranked
            .into_iter()
            .enumerate()
            .map(|(i, p)| Standing {
                position: i as u32 + 1,
                actor_id: p.actor_id,
                laps: p.laps,
                finished: p.finished(),
                finish_time: p.finish_time,
                best_lap: p.best_lap(),
                points: p.points,
            })
            .collect()
    }
}
