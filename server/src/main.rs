use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "7777")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "8")]
    max_clients: usize,
    /// Level raced at start-up
    #[clap(short, long, default_value = "oval")]
    level: String,
    /// Laps per race
    #[clap(long, default_value = "3")]
    laps: u32,
    /// Registered players needed before a race starts
    #[clap(long, default_value = "1")]
    min_players: usize,
    /// Countdown before each race, in milliseconds
    #[clap(long, default_value = "3000")]
    countdown_ms: u64,
    /// Time limit of a vote, in milliseconds
    #[clap(long, default_value = "20000")]
    vote_time_ms: u64,
    /// Pause between races, in milliseconds
    #[clap(long, default_value = "5000")]
    intermission_ms: u64,
    /// Path of the ranking database
    #[clap(long, default_value = "ranking.db")]
    ranking_db: PathBuf,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            tick_rate: args.tick_rate,
            max_clients: args.max_clients,
            level: args.level,
            laps: args.laps,
            min_players: args.min_players,
            countdown_ms: args.countdown_ms,
            vote_time_ms: args.vote_time_ms,
            intermission_ms: args.intermission_ms,
            ranking_db: args.ranking_db,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting server on {} at {}Hz, level {}",
        config.bind_address(),
        config.tick_rate,
        config.level
    );

    let mut server = Server::new(config).await?;
    server
        .run(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        })
        .await?;

    Ok(())
}
