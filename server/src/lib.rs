//! # Race Server Library
//!
//! This library provides the authoritative server for the multiplayer racing
//! game. Cars are simulated on the players' machines; the server decides who
//! is in the race, when it starts and ends, relays car snapshots between
//! players, runs race-control votes and keeps the persistent lap ranking.
//!
//! ## Core Responsibilities
//!
//! ### Lobby
//! Handles the lifecycle of client connections:
//! - Capacity limits and the server-full goodbye
//! - Unique player names claimed with `hi`
//! - Join and leave announcements to every other player
//!
//! ### Race Lifecycle
//! Puts registered players on the grid, runs the countdown, collects finish
//! times and starts the next race after an intermission.
//!
//! ### Snapshot Relay
//! Re-broadcasts every `car-state` to the other players with the sender
//! field rewritten to the registered name, so nobody can speak for another
//! car.
//!
//! ### Votes and Rankings
//! Owns the authoritative vote session and answers ranking requests from a
//! SQLite-backed store.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Game Loop
//! All game decisions happen in one loop that drains the transport's event
//! queue once per tick. Socket I/O runs in separate tasks and only talks to
//! the loop through channels.
//!
//! ### Transport Independence
//! [`game::GameServer`] is generic over [`shared::ServerTransport`], so the
//! same logic runs over TCP in production and over in-memory channels in
//! tests.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking, capacity and nickname registry.
//!
//! ### Game Module (`game`)
//! Lobby, race lifecycle, vote authority and ranking requests.
//!
//! ### Ranking Module (`ranking`)
//! Schema-versioned best-lap table with upsert, position and rank queries.
//!
//! ### Network Module (`network`)
//! TCP transport with per-connection reader and writer tasks, and the
//! fixed-rate loop that ticks the game.
//!
//! ### Config Module (`config`)
//! Server settings with defaults.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!
//!     // Ticks at 60Hz until Ctrl+C, then says goodbye to every client.
//!     server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod ranking;
