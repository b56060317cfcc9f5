//! Client settings

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Server address as `host:port`
    pub server: String,
    /// Display name, unique on the server
    pub name: String,
    /// Stable identity the ranking is keyed on
    pub uid: String,
    /// Logic frames per second
    pub tick_rate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:7777".to_string(),
            name: "player".to_string(),
            uid: "player".to_string(),
            tick_rate: 60,
        }
    }
}

impl ClientConfig {
    /// Config for `name`, ranked under the same uid
    pub fn for_player(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: name.to_string(),
            ..Self::default()
        }
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}
