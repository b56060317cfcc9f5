//! Driver input collection with edge detection for one-shot commands

use shared::CarInput;

/// Raw key state as sampled from the display/input collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyState {
    pub accelerate: bool,
    pub brake: bool,
    pub left: bool,
    pub right: bool,
    pub vote_yes: bool,
    pub vote_no: bool,
    pub call_restart: bool,
    pub show_ranking: bool,
}

/// Anything that can be polled for the current key state once per frame
pub trait InputSource {
    fn poll(&mut self, now_ms: u64) -> KeyState;
}

/// Commands fired once per key press, not once per frame held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Commands {
    pub vote_yes: bool,
    pub vote_no: bool,
    pub call_restart: bool,
    pub show_ranking: bool,
}

impl Commands {
    pub fn any(&self) -> bool {
        self.vote_yes || self.vote_no || self.call_restart || self.show_ranking
    }
}

/// Turns sampled keys into car controls and press events
pub struct InputManager {
    previous: KeyState,
    current: CarInput,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            previous: KeyState::default(),
            current: CarInput::default(),
        }
    }

    /// Updates input state and returns the commands pressed this frame along
    /// with the car controls to apply
    pub fn update(&mut self, keys: KeyState) -> (Commands, CarInput) {
        // Detect key press events (current && !previous)
        let commands = Commands {
            vote_yes: keys.vote_yes && !self.previous.vote_yes,
            vote_no: keys.vote_no && !self.previous.vote_no,
            call_restart: keys.call_restart && !self.previous.call_restart,
            show_ranking: keys.show_ranking && !self.previous.show_ranking,
        };
        self.previous = keys;

        // Positive turn is counter-clockwise, so left wins the sign.
        let turn = match (keys.left, keys.right) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        };

        self.current = CarInput {
            accelerating: keys.accelerate,
            braking: keys.brake,
            turn,
            locked: false,
        };

        (commands, self.current)
    }

    /// Returns the controls produced by the last update
    pub fn current_input(&self) -> CarInput {
        self.current
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Headless driver: full throttle with a steady left-turn rhythm.
///
/// Used when the client runs without a display.
#[derive(Debug, Clone)]
pub struct Autopilot {
    period_ms: u64,
    steer_ms: u64,
}

impl Autopilot {
    /// Steers left for `steer_ms` out of every `period_ms`
    pub fn new(period_ms: u64, steer_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            steer_ms: steer_ms.min(period_ms),
        }
    }
}

impl Default for Autopilot {
    fn default() -> Self {
        Self::new(4000, 1200)
    }
}

impl InputSource for Autopilot {
    fn poll(&mut self, now_ms: u64) -> KeyState {
        KeyState {
            accelerate: true,
            left: now_ms % self.period_ms < self.steer_ms,
            ..KeyState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_manager_creation() {
        let input_manager = InputManager::new();
        assert_eq!(input_manager.current_input(), CarInput::default());
    }

    #[test]
    fn test_commands_fire_on_press_only() {
        let mut input_manager = InputManager::new();
        let held = KeyState {
            vote_yes: true,
            ..KeyState::default()
        };

        let (commands, _) = input_manager.update(held);
        assert!(commands.vote_yes);
        let (commands, _) = input_manager.update(held);
        assert!(!commands.any());

        input_manager.update(KeyState::default());
        let (commands, _) = input_manager.update(held);
        assert!(commands.vote_yes);
    }

    #[test]
    fn test_steering_keys_map_to_turn() {
        let mut input_manager = InputManager::new();

        let (_, input) = input_manager.update(KeyState {
            accelerate: true,
            left: true,
            ..KeyState::default()
        });
        assert!(input.accelerating);
        assert_eq!(input.turn, 1.0);

        let (_, input) = input_manager.update(KeyState {
            right: true,
            ..KeyState::default()
        });
        assert_eq!(input.turn, -1.0);

        let (_, input) = input_manager.update(KeyState {
            left: true,
            right: true,
            ..KeyState::default()
        });
        assert_eq!(input.turn, 0.0);
        assert!(!input.locked);
    }

    #[test]
    fn test_autopilot_rhythm() {
        let mut pilot = Autopilot::new(1000, 250);
        assert!(pilot.poll(0).left);
        assert!(pilot.poll(249).left);
        assert!(!pilot.poll(250).left);
        assert!(pilot.poll(1100).left);
        assert!(pilot.poll(500).accelerate);
    }
}
