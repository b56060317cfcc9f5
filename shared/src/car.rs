//! Fixed-step arcade car model.
//!
//! Every car, local or mirrored, is driven by the same integrator. Callers
//! hand [`Car::advance`] whatever wall-clock time passed since the previous
//! frame; the car banks that time and runs whole 1/60 s ticks out of it. Two
//! cars fed the same sequence of ticks end up bit-for-bit identical, which is
//! what lets a mirrored car replay a remote player's inputs between snapshots.
//!
//! Time is banked in integer units of 1/60 ms so that one tick is exactly
//! [`TICK_UNITS`] units and no rounding ever accumulates in the residual.

use crate::codec::CarState;
use crate::math::{approach, normalize_angle, wrap_difference, Segment, Vector2};
use serde::{Deserialize, Serialize};

/// Ticks per second of the physics integrator.
pub const TICK_RATE: u64 = 60;
/// Residual-time units per tick (one unit is 1/60 ms).
pub const TICK_UNITS: u64 = 1000;

/// Asymptotic top speed while accelerating (world units per tick).
pub const SPEED_LIMIT: f32 = 9.0;
/// Fraction of the remaining gap to [`SPEED_LIMIT`] closed per tick.
pub const ACCEL_FACTOR: f32 = 0.02;
/// Speed removed per tick while braking.
pub const BRAKE_STEP: f32 = 0.15;
/// Braking past standstill reverses, down to this speed.
pub const REVERSE_LIMIT: f32 = 2.5;
/// Maximum change of the wheel angle per tick.
pub const WHEEL_STEP: f32 = 0.1;
/// Body rotation per tick at full lock and full grip (radians).
pub const TURN_POWER: f32 = 0.045;
/// Below this speed steering authority fades out linearly.
pub const GRIP_SPEED: f32 = 2.0;
/// Body relaxation toward the movement direction with centered wheels.
pub const RELAX_STEP: f32 = 0.02;
/// Movement-direction alignment at standstill (radians per tick).
pub const ALIGN_BASE: f32 = 0.08;
/// How strongly speed slows the alignment down.
pub const ALIGN_SPEED_FACTOR: f32 = 0.3;
/// Speed loss per tick per radian of body/movement divergence (capped at 1 rad).
pub const DRIFT_FRICTION: f32 = 0.03;
/// Constant fractional speed loss per tick.
pub const AIR_RESISTANCE: f32 = 0.005;

/// Divergence between body and movement beyond which the car is drifting.
pub const DRIFT_ANGLE: f32 = 0.1;
/// Per-tick speed change beyond which a throttled car is wheel-spinning.
pub const DRIFT_SPEED_DELTA: f32 = 0.08;

/// Collision radius of a car.
pub const CAR_RADIUS: f32 = 12.0;
/// Damage per unit of head-on impact speed.
pub const DAMAGE_FACTOR: f32 = 0.02;
/// Fraction of speed lost in a head-on impact.
pub const IMPACT_SPEED_LOSS: f32 = 0.5;

/// Driver controls as seen by the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CarInput {
    pub accelerating: bool,
    pub braking: bool,
    /// Requested steering in `[-1, 1]`; positive turns counter-clockwise.
    pub turn: f32,
    /// A locked car ignores time entirely (countdown, finished).
    pub locked: bool,
}

impl CarInput {
    fn controls_differ(&self, other: &CarInput) -> bool {
        self.accelerating != other.accelerating
            || self.braking != other.braking
            || self.turn != other.turn
    }
}

/// Result of one [`Car::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Advance {
    /// Number of fixed ticks that ran.
    pub ticks: u32,
    /// Controls differed from those of the previous tick. Reported once per
    /// change, on the first tick that sees it.
    pub input_changed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Car {
    position: Vector2,
    rotation: f32,
    movement_angle: f32,
    movement: Vector2,
    speed: f32,
    speed_delta: f32,
    wheel_turn: f32,
    damage: f32,
    input: CarInput,
    last_tick_input: CarInput,
    iteration: u32,
    residual: u64,
    last_snapshot: Option<u32>,
}

impl Default for Car {
    fn default() -> Self {
        Self::new(Vector2::ZERO, 0.0)
    }
}

impl Car {
    pub fn new(position: Vector2, rotation: f32) -> Self {
        let rotation = normalize_angle(rotation);
        Self {
            position,
            rotation,
            movement_angle: rotation,
            movement: Vector2::from_angle(rotation),
            speed: 0.0,
            speed_delta: 0.0,
            wheel_turn: 0.0,
            damage: 0.0,
            input: CarInput::default(),
            last_tick_input: CarInput::default(),
            iteration: 0,
            residual: 0,
            last_snapshot: None,
        }
    }

    /// Puts the car back on a grid slot with all dynamics cleared.
    pub fn reset(&mut self, position: Vector2, rotation: f32) {
        let locked = self.input.locked;
        *self = Self::new(position, rotation);
        self.input.locked = locked;
    }

    pub fn position(&self) -> Vector2 {
        self.position
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn movement_angle(&self) -> f32 {
        self.movement_angle
    }

    pub fn movement(&self) -> Vector2 {
        self.movement
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn speed_delta(&self) -> f32 {
        self.speed_delta
    }

    pub fn wheel_turn(&self) -> f32 {
        self.wheel_turn
    }

    pub fn damage(&self) -> f32 {
        self.damage
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn input(&self) -> CarInput {
        self.input
    }

    pub fn set_input(&mut self, input: CarInput) {
        self.input = CarInput {
            turn: input.turn.clamp(-1.0, 1.0),
            ..input
        };
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.input.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.input.locked
    }

    /// Banks `elapsed_ms` and runs as many fixed ticks as it covers.
    pub fn advance(&mut self, elapsed_ms: u32) -> Advance {
        self.residual += u64::from(elapsed_ms) * TICK_RATE;

        let mut result = Advance::default();
        while self.residual >= TICK_UNITS {
            self.residual -= TICK_UNITS;
            result.ticks += 1;
            if self.tick() {
                result.input_changed = true;
            }
        }
        result
    }

    /// One fixed integration step. Returns whether the controls changed
    /// since the previous step.
    fn tick(&mut self) -> bool {
        if self.input.locked {
            return false;
        }

        let previous_speed = self.speed;

        if self.input.braking {
            self.speed = (self.speed - BRAKE_STEP).max(-REVERSE_LIMIT);
        } else if self.input.accelerating && !self.is_choking() {
            self.speed += (SPEED_LIMIT - self.speed) * ACCEL_FACTOR;
        }

        self.wheel_turn = approach(self.wheel_turn, self.input.turn, WHEEL_STEP);

        if self.wheel_turn != 0.0 {
            let grip = (self.speed / GRIP_SPEED).clamp(-1.0, 1.0);
            self.rotation += TURN_POWER * self.wheel_turn * grip;
        } else {
            self.rotation = approach(self.rotation, self.movement_angle, RELAX_STEP);
        }

        let align_step = ALIGN_BASE / (1.0 + self.speed.abs() * ALIGN_SPEED_FACTOR);
        self.movement_angle = approach(self.movement_angle, self.rotation, align_step);

        // Only renormalize once converged, so the pair never straddles the wrap.
        if self.movement_angle == self.rotation {
            let angle = normalize_angle(self.rotation);
            self.rotation = angle;
            self.movement_angle = angle;
        }

        let divergence = (self.rotation - self.movement_angle).abs().min(1.0);
        self.speed *= 1.0 - DRIFT_FRICTION * divergence;
        self.speed *= 1.0 - AIR_RESISTANCE;

        self.movement = Vector2::from_angle(self.movement_angle);
        self.position += self.movement * self.speed;

        self.speed_delta = self.speed - previous_speed;
        self.iteration = self.iteration.wrapping_add(1);

        let changed = self.input.controls_differ(&self.last_tick_input);
        self.last_tick_input = self.input;
        changed
    }

    pub fn is_drifting(&self) -> bool {
        let throttled = self.input.accelerating || self.input.braking;
        (self.rotation - self.movement_angle).abs() > DRIFT_ANGLE
            || (throttled && self.speed_delta.abs() > DRIFT_SPEED_DELTA)
    }

    pub fn is_choking(&self) -> bool {
        choke_pattern(self.damage, self.iteration)
    }

    /// Bounces the car off a wall it is touching and applies impact damage.
    ///
    /// Returns the damage dealt by this impact.
    pub fn collide(&mut self, wall: &Segment) -> f32 {
        let contact = wall.closest_point(self.position);
        let offset = self.position - contact;
        let distance = offset.magnitude();

        let normal = if distance > f32::EPSILON {
            offset * (1.0 / distance)
        } else {
            let n = wall.normal();
            if n.dot(self.movement) > 0.0 {
                -n
            } else {
                n
            }
        };

        if distance < CAR_RADIUS {
            self.position = contact + normal * CAR_RADIUS;
        }

        let heading = if self.speed < 0.0 {
            -self.movement
        } else {
            self.movement
        };
        let incidence = (-heading.dot(normal)).clamp(0.0, 1.0);
        if incidence == 0.0 {
            return 0.0;
        }

        let dealt = self.speed.abs() * incidence * DAMAGE_FACTOR;
        self.damage = (self.damage + dealt).min(1.0);
        self.speed *= 1.0 - incidence * IMPACT_SPEED_LOSS;

        self.movement = self.movement.reflect(normal).normalize();
        self.movement_angle = self.movement.angle();
        self.rotation = self.movement_angle + wrap_difference(self.rotation - self.movement_angle);

        dealt
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.movement.is_finite()
            && self.rotation.is_finite()
            && self.movement_angle.is_finite()
            && self.speed.is_finite()
            && self.speed_delta.is_finite()
            && self.wheel_turn.is_finite()
            && self.damage.is_finite()
    }

    pub fn snapshot(&self, sender: &str, after_collision: bool) -> CarState {
        CarState {
            sender: sender.to_string(),
            after_collision,
            iteration: self.iteration,
            input: self.input,
            position: self.position,
            rotation: self.rotation,
            speed: self.speed,
            movement_angle: self.movement_angle,
            movement: self.movement,
            speed_delta: self.speed_delta,
            wheel_turn: self.wheel_turn,
            damage: self.damage,
        }
    }

    /// Overwrites the physics state with an authoritative snapshot.
    ///
    /// Snapshots at or before the last applied iteration are ignored, since
    /// events from different connections are not ordered relative to each
    /// other. Returns whether the snapshot was applied.
    pub fn apply_snapshot(&mut self, state: &CarState) -> bool {
        if let Some(last) = self.last_snapshot {
            if state.iteration <= last {
                return false;
            }
        }

        self.iteration = state.iteration;
        self.set_input(state.input);
        self.last_tick_input = self.input;
        self.position = state.position;
        self.rotation = state.rotation;
        self.speed = state.speed;
        self.movement_angle = state.movement_angle;
        self.movement = state.movement;
        self.speed_delta = state.speed_delta;
        self.wheel_turn = state.wheel_turn.clamp(-1.0, 1.0);
        self.damage = state.damage.clamp(0.0, 1.0);
        self.last_snapshot = Some(state.iteration);
        true
    }

    /// Forgets which snapshot was applied last, e.g. when a new race starts
    /// and the owner's counter starts over.
    pub fn clear_snapshot_history(&mut self) {
        self.last_snapshot = None;
    }
}

/// Engine stutter once damage has saturated.
///
/// The stutter window is the low two bits' worth of a period that shrinks as
/// the counter grows: 4 of every 64 ticks early on, then 4 of every 32, then
/// 4 of every 16. Only damage and the counter feed it, and both are on the
/// wire, so every peer derives the same pattern.
pub fn choke_pattern(damage: f32, iteration: u32) -> bool {
    if damage < 1.0 {
        return false;
    }
    let period_mask = if iteration < 128 {
        0x3F
    } else if iteration < 256 {
        0x1F
    } else {
        0x0F
    };
    iteration & period_mask < 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f32::consts::PI;

    fn throttle(turn: f32) -> CarInput {
        CarInput {
            accelerating: true,
            turn,
            ..CarInput::default()
        }
    }

    #[test]
    fn test_advance_drains_whole_ticks() {
        let mut car = Car::default();
        assert_eq!(car.advance(16).ticks, 0);
        assert_eq!(car.advance(1).ticks, 1);
        assert_eq!(car.iteration(), 1);
        assert_eq!(car.advance(1000).ticks, 60);
        assert_eq!(car.iteration(), 61);
    }

    #[test]
    fn test_one_large_step_matches_many_small_ones() {
        let mut a = Car::default();
        let mut b = Car::default();
        a.set_input(throttle(0.7));
        b.set_input(throttle(0.7));

        a.advance(1000);
        for _ in 0..1000 {
            b.advance(1);
        }

        assert_eq!(a, b);
        assert_eq!(a.iteration(), 60);
    }

    #[test]
    fn test_locked_car_does_not_move() {
        let mut car = Car::new(Vector2::new(5.0, 5.0), 1.0);
        car.set_input(CarInput {
            locked: true,
            ..throttle(1.0)
        });
        let before = car.clone();

        let result = car.advance(500);

        assert_eq!(result.ticks, 30);
        assert!(!result.input_changed);
        assert_eq!(car.position(), before.position());
        assert_eq!(car.iteration(), 0);
    }

    #[test]
    fn test_acceleration_approaches_limit() {
        let mut car = Car::default();
        car.set_input(throttle(0.0));
        car.advance(60_000);
        assert!(car.speed() > 0.0);
        assert!(car.speed() < SPEED_LIMIT);
        assert!(car.position().x > 0.0);
        assert_approx_eq!(car.position().y, 0.0, 1e-3);
    }

    #[test]
    fn test_braking_reverses_to_limit() {
        let mut car = Car::default();
        car.set_input(CarInput {
            braking: true,
            ..CarInput::default()
        });
        car.advance(10_000);
        assert!(car.speed() < 0.0);
        assert!(car.speed() >= -REVERSE_LIMIT);
        assert!(car.position().x < 0.0);
    }

    #[test]
    fn test_wheel_turn_ramps() {
        let mut car = Car::default();
        car.set_input(throttle(1.0));
        car.advance(17);
        assert_approx_eq!(car.wheel_turn(), WHEEL_STEP, 1e-6);
        car.advance(1000);
        assert_eq!(car.wheel_turn(), 1.0);

        car.set_input(throttle(0.0));
        car.advance(1000);
        assert_eq!(car.wheel_turn(), 0.0);
    }

    #[test]
    fn test_no_steering_at_standstill() {
        let mut car = Car::default();
        car.set_input(CarInput {
            turn: 1.0,
            ..CarInput::default()
        });
        car.advance(1000);
        assert_eq!(car.rotation(), 0.0);
    }

    #[test]
    fn test_turning_diverges_then_converges() {
        let mut car = Car::default();
        car.set_input(throttle(0.0));
        car.advance(2000);

        car.set_input(throttle(1.0));
        car.advance(500);
        assert!(car.rotation() > car.movement_angle());
        assert!(car.is_drifting());

        car.set_input(throttle(0.0));
        car.advance(10_000);
        assert_eq!(car.rotation(), car.movement_angle());
        assert!(car.rotation() >= 0.0 && car.rotation() < 2.0 * PI);
    }

    #[test]
    fn test_input_change_reported_once() {
        let mut car = Car::default();
        car.set_input(throttle(0.0));
        assert!(car.advance(100).input_changed);
        assert!(!car.advance(100).input_changed);

        car.set_input(throttle(0.5));
        let result = car.advance(100);
        assert!(result.ticks > 1);
        assert!(result.input_changed);
        assert!(!car.advance(100).input_changed);
    }

    #[test]
    fn test_choke_pattern_windows() {
        assert!(!choke_pattern(0.99, 0));
        assert!(choke_pattern(1.0, 0));
        assert!(choke_pattern(1.0, 3));
        assert!(!choke_pattern(1.0, 4));
        assert!(!choke_pattern(1.0, 32));
        assert!(choke_pattern(1.0, 64));
        assert!(choke_pattern(1.0, 160));
        assert!(!choke_pattern(1.0, 176));
        assert!(choke_pattern(1.0, 272));
    }

    #[test]
    fn test_choke_pattern_escalates_over_full_cycle() {
        // Four stalled ticks at the start of every window: 64-tick windows
        // up to 128, 32-tick windows up to 256, 16-tick windows after that.
        let mut expected = Vec::with_capacity(512);
        for (windows, width) in [(2, 64), (4, 32), (16, 16)] {
            for _ in 0..windows {
                expected.extend(std::iter::repeat(true).take(4));
                expected.extend(std::iter::repeat(false).take(width - 4));
            }
        }
        assert_eq!(expected.len(), 512);

        let actual: Vec<bool> = (0..512u32).map(|i| choke_pattern(1.0, i)).collect();
        for (i, (got, want)) in actual.iter().zip(&expected).enumerate() {
            assert_eq!(got, want, "counter {}", i);
        }
        assert_eq!(actual.iter().filter(|&&on| on).count(), 8 + 16 + 64);

        // Window edges where the period shrinks.
        assert!(!choke_pattern(1.0, 127));
        assert!(choke_pattern(1.0, 128));
        assert!(!choke_pattern(1.0, 255));
        assert!(choke_pattern(1.0, 256));

        assert!((0..512u32).all(|i| !choke_pattern(0.999, i)));
    }

    #[test]
    fn test_choking_stalls_acceleration() {
        let mut car = Car::default();
        car.damage = 1.0;
        car.set_input(throttle(0.0));
        car.advance(17);
        assert_eq!(car.speed(), 0.0);

        let mut healthy = Car::default();
        healthy.set_input(throttle(0.0));
        healthy.advance(17);
        assert!(healthy.speed() > 0.0);
    }

    #[test]
    fn test_head_on_collision() {
        let mut car = Car::new(Vector2::new(0.0, 5.0), PI / 2.0);
        car.speed = 8.0;
        let wall = Segment::new(Vector2::new(-50.0, 10.0), Vector2::new(50.0, 10.0));

        let dealt = car.collide(&wall);

        assert_approx_eq!(dealt, 8.0 * DAMAGE_FACTOR, 1e-5);
        assert_approx_eq!(car.damage(), dealt, 1e-6);
        assert_approx_eq!(car.speed(), 4.0, 1e-5);
        assert_approx_eq!(car.position().y, 10.0 - CAR_RADIUS, 1e-4);
        assert!(car.movement().y < 0.0);
        assert_approx_eq!(car.movement_angle(), 3.0 * PI / 2.0, 1e-4);
    }

    #[test]
    fn test_glancing_collision_reflects() {
        let mut car = Car::new(Vector2::new(0.0, 5.0), PI / 4.0);
        car.speed = 6.0;
        let wall = Segment::new(Vector2::new(-50.0, 10.0), Vector2::new(50.0, 10.0));

        car.collide(&wall);

        assert!(car.movement().x > 0.0);
        assert!(car.movement().y < 0.0);
        assert!(car.speed() > 3.0);
        assert!(car.damage() < 6.0 * DAMAGE_FACTOR);
    }

    #[test]
    fn test_damage_saturates() {
        let wall = Segment::new(Vector2::new(-50.0, 10.0), Vector2::new(50.0, 10.0));
        let mut car = Car::default();
        for _ in 0..50 {
            car.reset(Vector2::new(0.0, 5.0), PI / 2.0);
            car.damage = 0.9;
            car.speed = 9.0;
            car.collide(&wall);
        }
        assert_eq!(car.damage(), 1.0);
    }

    #[test]
    fn test_moving_away_takes_no_damage() {
        let mut car = Car::new(Vector2::new(0.0, 5.0), 3.0 * PI / 2.0);
        car.speed = 8.0;
        let wall = Segment::new(Vector2::new(-50.0, 10.0), Vector2::new(50.0, 10.0));
        assert_eq!(car.collide(&wall), 0.0);
        assert_eq!(car.damage(), 0.0);
        assert_eq!(car.speed(), 8.0);
    }

    #[test]
    fn test_snapshot_roundtrip_and_staleness() {
        let mut source = Car::default();
        source.set_input(throttle(0.3));
        source.advance(500);
        let snapshot = source.snapshot("alice", false);

        let mut mirror = Car::default();
        assert!(mirror.apply_snapshot(&snapshot));
        assert_eq!(mirror.position(), source.position());
        assert_eq!(mirror.iteration(), source.iteration());
        assert_eq!(mirror.input(), source.input());

        let mut older = snapshot.clone();
        older.iteration -= 1;
        assert!(!mirror.apply_snapshot(&older));
        assert!(!mirror.apply_snapshot(&snapshot));
    }

    #[test]
    fn test_snapshot_steering_is_clamped() {
        let mut wild = Car::default().snapshot("mallory", false);
        wild.iteration = 3;
        wild.input = throttle(50.0);
        wild.wheel_turn = -50.0;

        let mut mirror = Car::default();
        assert!(mirror.apply_snapshot(&wild));
        assert_eq!(mirror.input().turn, 1.0);
        assert_eq!(mirror.wheel_turn(), -1.0);

        mirror.advance(1000);
        let mut tame = Car::default();
        let mut clamped = wild.clone();
        clamped.input = throttle(1.0);
        clamped.wheel_turn = -1.0;
        assert!(tame.apply_snapshot(&clamped));
        tame.advance(1000);
        assert_eq!(mirror.rotation(), tame.rotation());
        assert_eq!(mirror.position(), tame.position());
    }

    #[test]
    fn test_fresh_car_accepts_iteration_zero() {
        let snapshot = Car::new(Vector2::new(1.0, 2.0), 0.5).snapshot("bob", false);
        assert_eq!(snapshot.iteration, 0);
        let mut mirror = Car::default();
        assert!(mirror.apply_snapshot(&snapshot));
        assert_eq!(mirror.position(), Vector2::new(1.0, 2.0));
    }

    #[test]
    fn test_reset_keeps_lock() {
        let mut car = Car::default();
        car.set_locked(true);
        car.reset(Vector2::new(3.0, 4.0), 1.0);
        assert!(car.is_locked());
        assert_eq!(car.position(), Vector2::new(3.0, 4.0));
        assert_eq!(car.speed(), 0.0);
    }
}
