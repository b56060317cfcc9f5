use clap::Parser;
use client::config::ClientConfig;
use client::game::ClientGame;
use client::input::{Autopilot, InputManager, InputSource};
use client::network::TcpClientTransport;
use log::{debug, info, warn};
use shared::clock::{Clock, MonotonicClock};
use shared::{VoteKind, VoteOption};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:7777")]
    server: String,

    /// Player name shown to everyone
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Ranking identity (defaults to the name)
    #[arg(short = 'u', long)]
    uid: Option<String>,

    /// Logic frames per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,
}

impl From<Args> for ClientConfig {
    fn from(args: Args) -> Self {
        ClientConfig {
            server: args.server,
            uid: args.uid.unwrap_or_else(|| args.name.clone()),
            name: args.name,
            tick_rate: args.tick_rate,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ClientConfig::from(Args::parse());
    info!("Starting client...");
    info!("Connecting to: {}", config.server);

    let transport = TcpClientTransport::connect(&config.server, &config.name).await?;
    let mut frame_interval = interval(config.frame_duration());
    frame_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut game = ClientGame::joined(transport, config);
    let mut input_manager = InputManager::new();
    let mut pilot = Autopilot::default();
    let clock = MonotonicClock::new();
    let mut last_frame = clock.now_ms();

    loop {
        tokio::select! {
            _ = frame_interval.tick() => {
                let now = clock.now_ms();
                let elapsed = u32::try_from(now.saturating_sub(last_frame)).unwrap_or(u32::MAX);
                last_frame = now;

                let (commands, input) = input_manager.update(pilot.poll(now));
                if commands.call_restart {
                    game.call_vote(VoteKind::RestartRace, "");
                }
                if commands.vote_yes {
                    game.cast_vote(VoteOption::Yes);
                }
                if commands.vote_no {
                    game.cast_vote(VoteOption::No);
                }
                if commands.show_ranking {
                    if let Err(e) = game.request_ranking(1, 10) {
                        warn!("Ranking request rejected: {}", e);
                    }
                }

                let out = game.tick(elapsed, now, input);
                if let Some(lap) = out.lap_time_ms {
                    info!("Lap {} in {} ms", game.session().laps(), lap);
                }
                if out.snapshot.is_some() {
                    debug!(
                        "Sent snapshot at iteration {}",
                        game.session().local_car().iteration()
                    );
                }

                if game.is_disconnected() {
                    info!("Session ended: {:?}", game.connection());
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving...");
                break;
            }
        }
    }

    Ok(())
}
