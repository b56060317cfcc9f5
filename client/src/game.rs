//! Client-side race coordinator.
//!
//! [`ClientGame`] owns the local [`RaceSession`] and speaks to the server
//! through a [`ClientTransport`]. Each [`ClientGame::tick`] advances the
//! simulation, sends what the frame produced and then dispatches whatever
//! arrived since the previous frame.

use crate::config::ClientConfig;
use log::{debug, error, info, warn};
use shared::protocol::{MAX_RANKING_SPAN, RANKING_TOKEN_FIND, RANKING_TOKEN_RANGE};
use shared::session::TickOutput;
use shared::track::{BuiltinLevels, LevelSource};
use shared::{
    CarInput, ClientEvent, ClientTransport, Event, ProtocolError, RaceSession, RankingRow,
    Vector2, VoteKind, VoteOption, VoteResult,
};

/// Laps assumed until the server announces the race length
const DEFAULT_LAPS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// `hi` sent, waiting for the server to echo our name
    Joining,
    Joined,
    /// Terminal; nothing is sent or processed any more
    Disconnected { reason: String },
}

/// Read-only copy of the server's vote, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMirror {
    pub kind: VoteKind,
    pub subject: String,
    /// What this player voted, if anything
    pub ballot: Option<VoteOption>,
    /// Set once the server announces the outcome
    pub result: Option<VoteResult>,
}

impl VoteMirror {
    pub fn is_running(&self) -> bool {
        self.result.is_none()
    }
}

pub struct ClientGame<T: ClientTransport> {
    transport: T,
    config: ClientConfig,
    session: RaceSession,
    levels: Box<dyn LevelSource + Send>,
    connection: ConnectionState,
    vote: Option<VoteMirror>,
    vote_called: bool,
    ranking_range: Vec<RankingRow>,
    ranking_found: Option<Vec<RankingRow>>,
}

impl<T: ClientTransport> ClientGame<T> {
    /// Coordinator over a transport that has not introduced itself yet; call
    /// [`ClientGame::join`] next.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_levels(transport, config, Box::new(BuiltinLevels))
    }

    /// Coordinator over a transport whose handshake already completed.
    pub fn joined(transport: T, config: ClientConfig) -> Self {
        let mut game = Self::new(transport, config);
        game.connection = ConnectionState::Joined;
        game
    }

    pub fn with_levels(
        transport: T,
        config: ClientConfig,
        levels: Box<dyn LevelSource + Send>,
    ) -> Self {
        Self {
            session: RaceSession::new(&config.name, DEFAULT_LAPS),
            transport,
            config,
            levels,
            connection: ConnectionState::Joining,
            vote: None,
            vote_called: false,
            ranking_range: Vec::new(),
            ranking_found: None,
        }
    }

    /// Introduces this player to the server.
    pub fn join(&mut self) {
        let hi = Event::Hi {
            name: self.config.name.clone(),
        };
        self.send(&hi);
    }

    /// Runs one frame: simulation, outgoing events, then arrived events.
    pub fn tick(&mut self, elapsed_ms: u32, now_ms: u64, input: CarInput) -> TickOutput {
        if self.is_disconnected() {
            return TickOutput::default();
        }

        let out = self.session.update(elapsed_ms, now_ms, input);

        if let Some(snapshot) = &out.snapshot {
            self.send(&Event::CarState(snapshot.clone()));
        }

        if let Some(time_ms) = out.finished_ms {
            let name = self.config.name.clone();
            self.send(&Event::PlayerFinished {
                name: name.clone(),
                time_ms,
            });
            if let Some(best) = self.session.best_lap_ms() {
                self.send(&Event::RankingAdvance {
                    uid: self.config.uid.clone(),
                    name,
                    time_ms: best,
                });
            }
        }

        if out.race_over {
            for (place, record) in self.session.scoreboard().records().iter().enumerate() {
                info!("#{} {} {} ms", place + 1, record.name, record.time_ms);
            }
        }

        self.process_events(now_ms);
        out
    }

    fn process_events(&mut self, now_ms: u64) {
        for event in self.transport.poll_events() {
            if self.is_disconnected() {
                break;
            }
            match event {
                ClientEvent::Connected => debug!("Transport connected"),
                ClientEvent::Disconnected { reason } => self.disconnect(reason),
                ClientEvent::Message(message) => match Event::from_message(&message) {
                    Ok(event) => self.handle_event(event, now_ms),
                    Err(e) => warn!("Discarding `{}`: {}", message.name, e),
                },
            }
        }
    }

    fn handle_event(&mut self, event: Event, now_ms: u64) {
        match event {
            Event::PlayerConnected { name } => {
                if name == self.config.name {
                    if self.connection == ConnectionState::Joining {
                        info!("Joined as {}", name);
                        self.connection = ConnectionState::Joined;
                    }
                } else if self.session.add_remote(&name) {
                    info!("{} joined", name);
                }
            }
            Event::PlayerDisconnected { name } => {
                if self.session.remove_remote(&name) {
                    info!("{} left", name);
                }
            }
            Event::NickInUse => {
                if self.connection == ConnectionState::Joining {
                    self.disconnect(format!("nick `{}` is already in use", self.config.name));
                } else {
                    warn!("Unexpected nick-in-use after joining");
                }
            }
            Event::InitRace { level } => match self.levels.load(&level) {
                Some(track) => self.session.set_track(track),
                None => warn!("Server announced unknown level {}", level),
            },
            Event::RaceStart { x, y, rotation } => {
                self.session.prepare(Vector2::new(x, y), rotation);
            }
            Event::RaceCountdown { duration_ms, laps } => {
                self.session
                    .set_lap_target(u32::try_from(laps).unwrap_or(u32::MAX));
                self.session
                    .start_countdown(now_ms, u64::try_from(duration_ms).unwrap_or(0));
            }
            Event::CarState(state) => {
                self.session.apply_remote_state(&state);
            }
            Event::PlayerFinished { name, time_ms } => {
                if self.session.record_finish(&name, time_ms) {
                    info!("{} finished in {} ms", name, time_ms);
                }
            }
            Event::VoteStart { kind, subject } => {
                info!("Vote {:?} '{}' started", kind, subject);
                let ballot = std::mem::take(&mut self.vote_called).then_some(VoteOption::Yes);
                self.vote = Some(VoteMirror {
                    kind,
                    subject,
                    ballot,
                    result: None,
                });
            }
            Event::VoteEnd { result } => {
                info!("Vote ended: {:?}", result);
                if let Some(vote) = &mut self.vote {
                    vote.result = Some(result);
                }
            }
            Event::Goodbye { reason, message } => {
                self.disconnect(format!("goodbye ({:?}): {}", reason, message));
            }
            Event::RankingEntries { token, rows } => match token.as_str() {
                RANKING_TOKEN_RANGE => self.ranking_range = rows,
                RANKING_TOKEN_FIND => self.ranking_found = Some(rows),
                other => warn!("Ranking entries with unknown token {}", other),
            },
            other => warn!("Unexpected `{}` from server", other.name()),
        }
    }

    /// Asks the server to open a vote; this player's ballot counts as yes.
    ///
    /// Returns `false` if a vote is already running.
    pub fn call_vote(&mut self, kind: VoteKind, subject: &str) -> bool {
        if self.vote.as_ref().is_some_and(VoteMirror::is_running) {
            return false;
        }
        self.vote_called = true;
        self.send(&Event::VoteStart {
            kind,
            subject: subject.to_string(),
        });
        !self.is_disconnected()
    }

    /// Casts or changes this player's ballot in the running vote.
    pub fn cast_vote(&mut self, option: VoteOption) -> bool {
        let Some(vote) = self.vote.as_mut().filter(|vote| vote.is_running()) else {
            return false;
        };
        vote.ballot = Some(option);
        self.send(&Event::VoteTick { option });
        !self.is_disconnected()
    }

    /// Requests ranking places `from..=to`; the reply lands in
    /// [`ClientGame::ranking_range`].
    pub fn request_ranking(&mut self, from: i64, to: i64) -> Result<(), ProtocolError> {
        if from < 1 {
            return Err(ProtocolError::OutOfRange { index: 0 });
        }
        if to < from || to - from + 1 > MAX_RANKING_SPAN {
            return Err(ProtocolError::OutOfRange { index: 1 });
        }
        self.send(&Event::RankingRequest { from, to });
        Ok(())
    }

    /// Looks up a player by uid; the reply lands in
    /// [`ClientGame::ranking_found`].
    pub fn find_ranking(&mut self, uid: &str) {
        self.ranking_found = None;
        self.send(&Event::RankingFind {
            uid: uid.to_string(),
        });
    }

    fn send(&mut self, event: &Event) {
        if self.is_disconnected() {
            return;
        }
        if let Err(e) = self.transport.send(event) {
            error!("Failed to send {}: {}", event.name(), e);
            self.disconnect(e.to_string());
        }
    }

    fn disconnect(&mut self, reason: String) {
        if self.is_disconnected() {
            return;
        }
        warn!("Disconnected: {}", reason);
        // Any running vote is simply forgotten.
        self.vote = None;
        self.vote_called = false;
        self.connection = ConnectionState::Disconnected { reason };
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn is_joined(&self) -> bool {
        self.connection == ConnectionState::Joined
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.connection, ConnectionState::Disconnected { .. })
    }

    pub fn session(&self) -> &RaceSession {
        &self.session
    }

    pub fn vote(&self) -> Option<&VoteMirror> {
        self.vote.as_ref()
    }

    /// Rows of the latest range reply
    pub fn ranking_range(&self) -> &[RankingRow] {
        &self.ranking_range
    }

    /// Latest find reply: `Some(empty)` means the uid is not ranked
    pub fn ranking_found(&self) -> Option<&[RankingRow]> {
        self.ranking_found.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
