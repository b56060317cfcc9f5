//! # Race Client Library
//!
//! This library provides the player side of the multiplayer racing game. It
//! drives the local car, mirrors everyone else's, and keeps the server
//! informed about what the local car is doing.
//!
//! ## Architecture Overview
//!
//! ### Local Simulation
//! The local car is simulated here with the same fixed-step model every
//! other player runs. Input is applied immediately; the server never
//! simulates or corrects it.
//!
//! ### Snapshot Mirroring
//! Other players' cars are mirrors. Each snapshot that arrives replaces the
//! mirrored state outright, and the mirror keeps driving on the last known
//! inputs until the next one. Snapshots older than the one already applied
//! are dropped, since different players' events may arrive in any order.
//!
//! ### Race Control
//! The server decides when races start and how many laps they run. Votes
//! to restart or change level are called from here, but only the server
//! counts them; the client keeps a read-only copy for display.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! [`game::ClientGame`] wraps the shared race session and dispatches server
//! events into it:
//! - Join handshake and the player roster
//! - Race start, countdown and finish reporting
//! - Vote mirror and ranking queries
//!
//! ### Input Module (`input`)
//! Key sampling and press detection:
//! - Steering and throttle mapping
//! - One-shot commands for votes and the ranking view
//! - A headless autopilot
//!
//! ### Network Module (`network`)
//! TCP transport with a blocking handshake and background reader/writer
//! tasks.
//!
//! ### Config Module (`config`)
//! Client settings with defaults.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::game::ClientGame;
//! use client::network::TcpClientTransport;
//! use shared::CarInput;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::for_player("Alice");
//!     let transport = TcpClientTransport::connect(&config.server, &config.name).await?;
//!     let mut game = ClientGame::joined(transport, config);
//!
//!     let mut now = 0;
//!     while !game.is_disconnected() {
//!         now += 16;
//!         game.tick(16, now, CarInput::default());
//!         tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod game;
pub mod input;
pub mod network;
