//! Wire form of a car's physics state.
//!
//! A snapshot travels as exactly [`CAR_STATE_FIELDS`] scalar arguments in a
//! fixed order. Decoding checks the count before reading anything, so a
//! truncated or foreign payload is rejected whole instead of half-applied.

use crate::car::CarInput;
use crate::error::ProtocolError;
use crate::math::Vector2;
use crate::protocol::Value;

pub const CAR_STATE_FIELDS: usize = 15;

/// Immutable snapshot of one car at one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct CarState {
    pub sender: String,
    /// Taken right after a wall impact rather than on the regular cadence.
    pub after_collision: bool,
    pub iteration: u32,
    pub input: CarInput,
    pub position: Vector2,
    pub rotation: f32,
    pub speed: f32,
    pub movement_angle: f32,
    pub movement: Vector2,
    pub speed_delta: f32,
    pub wheel_turn: f32,
    pub damage: f32,
}

impl CarState {
    /// Encodes the 15 physics fields. Sender and collision flag travel
    /// separately as part of the event header.
    pub fn encode(&self) -> Vec<Value> {
        vec![
            Value::Int(i64::from(self.iteration)),
            Value::Bool(self.input.accelerating),
            Value::Bool(self.input.braking),
            Value::Float(self.input.turn),
            Value::Bool(self.input.locked),
            Value::Float(self.position.x),
            Value::Float(self.position.y),
            Value::Float(self.rotation),
            Value::Float(self.speed),
            Value::Float(self.movement_angle),
            Value::Float(self.movement.x),
            Value::Float(self.movement.y),
            Value::Float(self.speed_delta),
            Value::Float(self.wheel_turn),
            Value::Float(self.damage),
        ]
    }

    /// Decodes the 15 physics fields. `offset` is the index of the first
    /// field inside the enclosing event, used only for error reporting.
    pub fn decode(
        sender: String,
        after_collision: bool,
        fields: &[Value],
        offset: usize,
    ) -> Result<Self, ProtocolError> {
        if fields.len() != CAR_STATE_FIELDS {
            return Err(ProtocolError::ArgumentCount {
                event: "car-state",
                expected: CAR_STATE_FIELDS,
                found: fields.len(),
            });
        }

        let float = |i: usize| finite(&fields[i], offset + i);
        let flag = |i: usize| fields[i].as_bool(offset + i);

        let iteration = fields[0].as_int(offset)?;
        let iteration = u32::try_from(iteration).map_err(|_| ProtocolError::OutOfRange { index: offset })?;

        Ok(Self {
            sender,
            after_collision,
            iteration,
            input: CarInput {
                accelerating: flag(1)?,
                braking: flag(2)?,
                turn: float(3)?,
                locked: flag(4)?,
            },
            position: Vector2::new(float(5)?, float(6)?),
            rotation: float(7)?,
            speed: float(8)?,
            movement_angle: float(9)?,
            movement: Vector2::new(float(10)?, float(11)?),
            speed_delta: float(12)?,
            wheel_turn: float(13)?,
            damage: float(14)?,
        })
    }
}

fn finite(value: &Value, index: usize) -> Result<f32, ProtocolError> {
    let v = value.as_float(index)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ProtocolError::NonFinite { index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::Car;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_state(rng: &mut StdRng) -> CarState {
        CarState {
            sender: "tester".to_string(),
            after_collision: rng.gen(),
            iteration: rng.gen(),
            input: CarInput {
                accelerating: rng.gen(),
                braking: rng.gen(),
                turn: rng.gen_range(-1.0..=1.0),
                locked: rng.gen(),
            },
            position: Vector2::new(rng.gen_range(-1e4..1e4), rng.gen_range(-1e4..1e4)),
            rotation: rng.gen_range(0.0..std::f32::consts::TAU),
            speed: rng.gen_range(-2.5..9.0),
            movement_angle: rng.gen_range(-20.0..20.0),
            movement: Vector2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)),
            speed_delta: rng.gen_range(-1.0..1.0),
            wheel_turn: rng.gen_range(-1.0..=1.0),
            damage: rng.gen_range(0.0..=1.0),
        }
    }

    #[test]
    fn test_encode_field_count() {
        let state = Car::default().snapshot("a", false);
        assert_eq!(state.encode().len(), CAR_STATE_FIELDS);
    }

    #[test]
    fn test_randomized_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let state = random_state(&mut rng);
            let fields = state.encode();
            let decoded =
                CarState::decode(state.sender.clone(), state.after_collision, &fields, 2).unwrap();
            assert_eq!(decoded, state);
        }
    }

    #[test]
    fn test_short_payload_rejected() {
        let mut fields = Car::default().snapshot("a", false).encode();
        fields.pop();
        let err = CarState::decode("a".into(), false, &fields, 2).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ArgumentCount {
                expected: 15,
                found: 14,
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let mut fields = Car::default().snapshot("a", false).encode();
        fields[5] = Value::Text("x".into());
        let err = CarState::decode("a".into(), false, &fields, 2).unwrap_err();
        assert!(matches!(err, ProtocolError::ArgumentType { index: 7, .. }));
    }

    #[test]
    fn test_nan_rejected() {
        let mut fields = Car::default().snapshot("a", false).encode();
        fields[8] = Value::Float(f32::NAN);
        let err = CarState::decode("a".into(), false, &fields, 0).unwrap_err();
        assert!(matches!(err, ProtocolError::NonFinite { index: 8 }));
    }

    #[test]
    fn test_negative_iteration_rejected() {
        let mut fields = Car::default().snapshot("a", false).encode();
        fields[0] = Value::Int(-1);
        let err = CarState::decode("a".into(), false, &fields, 2).unwrap_err();
        assert!(matches!(err, ProtocolError::OutOfRange { index: 2 }));
    }
}
