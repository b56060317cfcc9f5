//! Race session coordinator.
//!
//! A [`RaceSession`] owns the local car, the mirrored cars of every other
//! player and the race lifecycle. The owning process calls
//! [`RaceSession::update`] once per frame and feeds it whatever events the
//! transport delivered in between. Nothing here talks to the network; the
//! returned [`TickOutput`] says what should be sent.
//!
//! Mirrored cars live behind a mutex shared through [`RosterHandle`] so that
//! joins and leaves arriving from another task never race the per-tick pass.

use crate::car::{Car, CarInput, CAR_RADIUS};
use crate::codec::CarState;
use crate::math::Vector2;
use crate::track::TrackGeometry;
use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Ticks between periodic snapshots of the local car while racing.
pub const SNAPSHOT_INTERVAL_TICKS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceState {
    Idle,
    CountingDown { until_ms: u64 },
    Running { started_ms: u64 },
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishRecord {
    pub name: String,
    pub time_ms: i64,
}

/// Finish order of one race, restricted to the players that were on the grid.
#[derive(Debug, Clone, Default)]
pub struct Scoreboard {
    participants: BTreeSet<String>,
    records: Vec<FinishRecord>,
}

impl Scoreboard {
    pub fn new<I, S>(participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            participants: participants.into_iter().map(Into::into).collect(),
            records: Vec::new(),
        }
    }

    /// Records a finish. Returns `false` for spectators and repeats.
    pub fn record(&mut self, name: &str, time_ms: i64) -> bool {
        if !self.participants.contains(name) || self.has_finished(name) {
            return false;
        }
        // Equal times keep arrival order.
        let at = self.records.partition_point(|r| r.time_ms <= time_ms);
        self.records.insert(
            at,
            FinishRecord {
                name: name.to_string(),
                time_ms,
            },
        );
        true
    }

    /// Takes a player off the grid. Their finish, if any, stays on the board.
    pub fn remove_participant(&mut self, name: &str) -> bool {
        self.participants.remove(name)
    }

    pub fn has_finished(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    pub fn is_participant(&self, name: &str) -> bool {
        self.participants.contains(name)
    }

    /// Every player still on the grid has finished.
    pub fn is_complete(&self) -> bool {
        self.participants.iter().all(|p| self.has_finished(p))
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(String::as_str)
    }

    /// Finishes in ascending time order.
    pub fn records(&self) -> &[FinishRecord] {
        &self.records
    }
}

/// Shared handle to the mirrored cars, keyed by player name.
#[derive(Debug, Clone, Default)]
pub struct RosterHandle {
    cars: Arc<Mutex<BTreeMap<String, Car>>>,
}

impl RosterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parked car for `name`. Returns `false` if one already exists.
    pub fn add(&self, name: &str) -> bool {
        let mut cars = self.cars.lock();
        if cars.contains_key(name) {
            return false;
        }
        let mut car = Car::default();
        car.set_locked(true);
        cars.insert(name.to_string(), car);
        true
    }

    pub fn remove(&self, name: &str) -> bool {
        self.cars.lock().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cars.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.cars.lock().keys().cloned().collect()
    }

    /// Copy of a mirrored car, for drawing or inspection.
    pub fn car(&self, name: &str) -> Option<Car> {
        self.cars.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.cars.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.lock().is_empty()
    }

    fn with_cars<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Car>) -> R) -> R {
        f(&mut self.cars.lock())
    }
}

/// What one [`RaceSession::update`] call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutput {
    pub ticks: u32,
    /// Local car snapshot that should go out this frame.
    pub snapshot: Option<CarState>,
    /// The countdown ran out during this update.
    pub started: bool,
    /// Duration of a lap completed during this update.
    pub lap_time_ms: Option<i64>,
    /// Race time of the local car, set on the update that finished it.
    pub finished_ms: Option<i64>,
    /// Every participant is done; set once.
    pub race_over: bool,
}

pub struct RaceSession {
    local_name: String,
    local: Car,
    remotes: RosterHandle,
    track: Option<Arc<dyn TrackGeometry>>,
    lap_target: u32,
    state: RaceState,
    spawn: (Vector2, f32),
    scoreboard: Scoreboard,
    laps: i32,
    laps_completed: i32,
    lap_started_ms: u64,
    best_lap_ms: Option<i64>,
    local_finished: bool,
    ticks_since_snapshot: u32,
}

impl RaceSession {
    pub fn new(local_name: &str, lap_target: u32) -> Self {
        let mut local = Car::default();
        local.set_locked(true);
        Self {
            local_name: local_name.to_string(),
            local,
            remotes: RosterHandle::new(),
            track: None,
            lap_target: lap_target.max(1),
            state: RaceState::Idle,
            spawn: (Vector2::ZERO, 0.0),
            scoreboard: Scoreboard::default(),
            laps: 0,
            laps_completed: 0,
            lap_started_ms: 0,
            best_lap_ms: None,
            local_finished: false,
            ticks_since_snapshot: 0,
        }
    }

    pub fn set_track(&mut self, track: Arc<dyn TrackGeometry>) {
        info!("Session track set to '{}'", track.name());
        self.track = Some(track);
    }

    pub fn set_lap_target(&mut self, laps: u32) {
        self.lap_target = laps.max(1);
    }

    /// Puts the local car on its grid slot and freezes the participant list.
    ///
    /// Players joining after this point are mirrored but do not take part.
    pub fn prepare(&mut self, spawn: Vector2, rotation: f32) {
        self.spawn = (spawn, rotation);
        self.local.set_locked(true);
        self.local.reset(spawn, rotation);
        self.local.clear_snapshot_history();

        let mut participants = self.remotes.names();
        participants.push(self.local_name.clone());
        self.scoreboard = Scoreboard::new(participants);

        // Mirrors park where they are until their owner's first snapshot of
        // the new race arrives.
        self.remotes.with_cars(|cars| {
            for car in cars.values_mut() {
                let (position, rotation) = (car.position(), car.rotation());
                car.set_locked(true);
                car.reset(position, rotation);
            }
        });

        self.state = RaceState::Idle;
        self.laps = 0;
        self.laps_completed = 0;
        self.best_lap_ms = None;
        self.local_finished = false;
        self.ticks_since_snapshot = 0;
    }

    pub fn start_countdown(&mut self, now_ms: u64, duration_ms: u64) {
        let until_ms = now_ms.saturating_add(duration_ms);
        info!("Countdown started, race begins in {} ms", duration_ms);
        self.state = RaceState::CountingDown { until_ms };
    }

    /// Runs one frame: lifecycle, local car, mirrored cars, collisions.
    pub fn update(&mut self, elapsed_ms: u32, now_ms: u64, input: CarInput) -> TickOutput {
        let mut out = TickOutput::default();

        if let RaceState::CountingDown { until_ms } = self.state {
            if now_ms >= until_ms {
                info!("Race started");
                self.state = RaceState::Running {
                    started_ms: until_ms,
                };
                self.lap_started_ms = until_ms;
                self.local.set_locked(false);
                out.started = true;
            }
        }

        let from = self.local.position();
        self.local.set_input(CarInput {
            locked: self.local.is_locked(),
            ..input
        });
        let advance = self.local.advance(elapsed_ms);
        out.ticks = advance.ticks;

        if !self.local.is_finite() {
            error!(
                "Local car state became non-finite at iteration {}, resetting to spawn",
                self.local.iteration()
            );
            let (position, rotation) = self.spawn;
            self.local.reset(position, rotation);
        }

        let mut collided = false;
        if let Some(track) = &self.track {
            if advance.ticks > 0 && !self.local.is_locked() {
                for wall in track.walls_near(self.local.position(), CAR_RADIUS) {
                    self.local.collide(&wall);
                    collided = true;
                }
            }

            if let RaceState::Running { .. } = self.state {
                let to = self.local.position();
                let line = track.finish_line();
                if line.crossed_by(from, to) {
                    if (to - from).dot(line.normal()) > 0.0 {
                        self.laps += 1;
                    } else {
                        self.laps -= 1;
                    }
                }
            }

            self.remotes.with_cars(|cars| {
                for car in cars.values_mut() {
                    if car.advance(elapsed_ms).ticks == 0 || car.is_locked() {
                        continue;
                    }
                    for wall in track.walls_near(car.position(), CAR_RADIUS) {
                        car.collide(&wall);
                    }
                }
            });
        } else {
            self.remotes.with_cars(|cars| {
                for car in cars.values_mut() {
                    car.advance(elapsed_ms);
                }
            });
        }

        if let RaceState::Running { started_ms } = self.state {
            if self.laps > self.laps_completed {
                self.laps_completed = self.laps;
                let lap_time = now_ms.saturating_sub(self.lap_started_ms) as i64;
                self.lap_started_ms = now_ms;
                self.best_lap_ms = Some(self.best_lap_ms.map_or(lap_time, |b| b.min(lap_time)));
                debug!("Lap {} in {} ms", self.laps_completed, lap_time);
                out.lap_time_ms = Some(lap_time);
            }

            if !self.local_finished && self.laps_completed >= self.lap_target as i32 {
                let time_ms = now_ms.saturating_sub(started_ms) as i64;
                info!("{} finished in {} ms", self.local_name, time_ms);
                self.local_finished = true;
                self.local.set_locked(true);
                self.scoreboard.record(&self.local_name, time_ms);
                out.finished_ms = Some(time_ms);
            }
        }

        self.ticks_since_snapshot = self.ticks_since_snapshot.saturating_add(advance.ticks);
        let periodic = matches!(self.state, RaceState::Running { .. })
            && self.ticks_since_snapshot >= SNAPSHOT_INTERVAL_TICKS;
        if advance.input_changed || collided || periodic || out.started {
            self.ticks_since_snapshot = 0;
            out.snapshot = Some(self.local.snapshot(&self.local_name, collided));
        }

        if let RaceState::Running { .. } = self.state {
            if self.scoreboard.is_complete() {
                info!("All participants finished");
                self.state = RaceState::Finished;
                out.race_over = true;
            }
        }

        out
    }

    /// Applies a snapshot received for another player's car.
    ///
    /// Returns whether it was applied; stale and unknown senders are dropped.
    pub fn apply_remote_state(&mut self, state: &CarState) -> bool {
        if state.sender == self.local_name {
            return false;
        }
        self.remotes.with_cars(|cars| match cars.get_mut(&state.sender) {
            Some(car) => {
                let applied = car.apply_snapshot(state);
                if !applied {
                    debug!(
                        "Dropped stale snapshot {} from {}",
                        state.iteration, state.sender
                    );
                }
                applied
            }
            None => {
                debug!("Snapshot from unknown player {}", state.sender);
                false
            }
        })
    }

    pub fn add_remote(&mut self, name: &str) -> bool {
        if name == self.local_name {
            return false;
        }
        self.remotes.add(name)
    }

    /// Drops a player's car and takes them off the grid.
    pub fn remove_remote(&mut self, name: &str) -> bool {
        self.scoreboard.remove_participant(name);
        self.remotes.remove(name)
    }

    /// Records another player's finish. Returns `false` for spectators and
    /// repeats.
    pub fn record_finish(&mut self, name: &str, time_ms: i64) -> bool {
        self.scoreboard.record(name, time_ms)
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn local_car(&self) -> &Car {
        &self.local
    }

    pub fn remotes(&self) -> RosterHandle {
        self.remotes.clone()
    }

    pub fn remote_car(&self, name: &str) -> Option<Car> {
        self.remotes.car(name)
    }

    pub fn track(&self) -> Option<&Arc<dyn TrackGeometry>> {
        self.track.as_ref()
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn laps(&self) -> i32 {
        self.laps
    }

    pub fn lap_target(&self) -> u32 {
        self.lap_target
    }

    pub fn best_lap_ms(&self) -> Option<i64> {
        self.best_lap_ms
    }

    pub fn is_local_finished(&self) -> bool {
        self.local_finished
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }
}
