//! Server settings, filled from the command line by the binary.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_rate: u32,
    pub max_clients: usize,
    /// Level raced after start-up and after a failed change-level lookup.
    pub level: String,
    pub laps: u32,
    /// Registered players needed before a race is started.
    pub min_players: usize,
    pub countdown_ms: u64,
    pub vote_time_ms: u64,
    /// Pause between a finished race and the next one.
    pub intermission_ms: u64,
    pub ranking_db: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7777,
            tick_rate: 60,
            max_clients: 8,
            level: "oval".to_string(),
            laps: 3,
            min_players: 1,
            countdown_ms: 3000,
            vote_time_ms: 20_000,
            intermission_ms: 5000,
            ranking_db: PathBuf::from("ranking.db"),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }
}
