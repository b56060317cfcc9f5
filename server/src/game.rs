//! Authoritative race server: lobby, race lifecycle, votes and rankings.
//!
//! The server does not simulate cars. It relays snapshots between players,
//! decides when races start and end, owns the vote and answers ranking
//! queries. [`GameServer::tick`] drains the transport once and advances
//! every timer against the supplied clock reading.

use crate::client_manager::{ClientManager, Registration};
use crate::config::ServerConfig;
use crate::ranking::{RankingEntry, RankingError, RankingStore};
use log::{debug, error, info, warn};
use shared::protocol::{RANKING_TOKEN_FIND, RANKING_TOKEN_RANGE};
use shared::session::{RaceState, Scoreboard};
use shared::track::{BuiltinLevels, LevelSource, TrackGeometry};
use shared::{
    ConnId, Event, GoodbyeReason, RankingRow, ServerEvent, ServerTransport, Vector2, VoteKind,
    VoteOption, VoteResult, VoteSession,
};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct GameServer<T: ServerTransport> {
    transport: T,
    config: ServerConfig,
    clients: ClientManager,
    levels: Box<dyn LevelSource + Send>,
    level: String,
    ranking: Option<RankingStore>,
    race: RaceState,
    scoreboard: Scoreboard,
    intermission_until: Option<u64>,
    vote: VoteSession,
    /// Players registered when the current vote opened.
    voters: BTreeSet<String>,
}

impl<T: ServerTransport> GameServer<T> {
    pub fn new(transport: T, config: ServerConfig, ranking: Option<RankingStore>) -> Self {
        Self::with_levels(transport, config, ranking, Box::new(BuiltinLevels))
    }

    pub fn with_levels(
        transport: T,
        config: ServerConfig,
        ranking: Option<RankingStore>,
        levels: Box<dyn LevelSource + Send>,
    ) -> Self {
        if ranking.is_none() {
            warn!("Running without a ranking store; ranking requests get empty replies");
        }
        Self {
            transport,
            clients: ClientManager::new(config.max_clients),
            level: config.level.clone(),
            config,
            levels,
            ranking,
            race: RaceState::Idle,
            scoreboard: Scoreboard::default(),
            intermission_until: None,
            vote: VoteSession::new(),
            voters: BTreeSet::new(),
        }
    }

    /// Drains arrived events, then advances the vote and race timers.
    pub fn tick(&mut self, now_ms: u64) {
        for event in self.transport.poll_events() {
            match event {
                ServerEvent::ClientConnected(conn) => self.handle_connect(conn),
                ServerEvent::ClientDisconnected(conn) => self.handle_disconnect(conn),
                ServerEvent::Message(conn, message) => match Event::from_message(&message) {
                    Ok(event) => self.handle_event(conn, event, now_ms),
                    Err(e) => warn!("Discarding `{}` from {}: {}", message.name, conn, e),
                },
            }
        }

        if let Some(result) = self.vote.poll(now_ms) {
            self.finish_vote(result, now_ms);
        }
        self.update_race(now_ms);
    }

    /// Says goodbye to everyone and closes every connection.
    pub fn shutdown(&mut self) {
        info!("Server shutting down");
        self.transport.broadcast(
            &Event::Goodbye {
                reason: GoodbyeReason::Shutdown,
                message: "server shutting down".to_string(),
            },
            None,
        );
        for conn in self.transport.connections() {
            self.transport.disconnect(conn);
            self.clients.remove_client(&conn);
        }
    }

    fn handle_connect(&mut self, conn: ConnId) {
        if self.clients.add_client(conn) {
            return;
        }
        warn!("Rejecting {}: server full", conn);
        self.send(
            conn,
            &Event::Goodbye {
                reason: GoodbyeReason::ServerFull,
                message: "server full".to_string(),
            },
        );
        self.transport.disconnect(conn);
    }

    fn handle_disconnect(&mut self, conn: ConnId) {
        let Some(client) = self.clients.remove_client(&conn) else {
            return;
        };
        if let Some(name) = client.name {
            info!(
                "{} left after {}s",
                name,
                client.connected_at.elapsed().as_secs()
            );
            self.scoreboard.remove_participant(&name);
            self.transport
                .broadcast(&Event::PlayerDisconnected { name }, Some(conn));
        }
    }

    fn handle_event(&mut self, conn: ConnId, event: Event, now_ms: u64) {
        if let Event::Hi { name } = event {
            self.handle_hi(conn, name);
            return;
        }

        let Some(name) = self.clients.name_of(conn).map(str::to_string) else {
            warn!("Dropping `{}` from unregistered {}", event.name(), conn);
            return;
        };

        match event {
            Event::CarState(mut state) => {
                // Nobody drives during a countdown, so anything arriving then
                // belongs to the previous race.
                let racing = matches!(self.race, RaceState::Running { .. } | RaceState::Finished);
                if !racing || !self.scoreboard.is_participant(&name) {
                    debug!(
                        "Not relaying snapshot {} from {} ({:?})",
                        state.iteration, name, self.race
                    );
                    return;
                }
                state.sender = name;
                self.transport.broadcast(&Event::CarState(state), Some(conn));
            }
            Event::PlayerFinished { time_ms, .. } => self.handle_finish(conn, name, time_ms),
            Event::VoteStart { kind, subject } => self.handle_vote_start(name, kind, subject, now_ms),
            Event::VoteTick { option } => {
                if !self.voters.contains(&name) {
                    debug!("Ignoring ballot of {}, who joined after the vote opened", name);
                    return;
                }
                if let Some(result) = self.vote.add_vote(option, &name) {
                    self.finish_vote(result, now_ms);
                }
            }
            Event::RankingAdvance { uid, name, time_ms } => {
                self.handle_ranking_advance(&uid, &name, time_ms)
            }
            Event::RankingRequest { from, to } => self.handle_ranking_request(conn, from, to),
            Event::RankingFind { uid } => self.handle_ranking_find(conn, &uid),
            other => warn!("Unexpected `{}` from {} ({})", other.name(), conn, name),
        }
    }

    fn handle_hi(&mut self, conn: ConnId, name: String) {
        if name.trim().is_empty() {
            warn!("Ignoring empty name from {}", conn);
            return;
        }

        match self.clients.register_name(conn, &name) {
            Registration::Registered => {
                self.send(conn, &Event::PlayerConnected { name: name.clone() });
                for (other, other_name) in self.clients.registered() {
                    if other != conn {
                        self.send(conn, &Event::PlayerConnected { name: other_name });
                    }
                }
                self.transport
                    .broadcast(&Event::PlayerConnected { name }, Some(conn));

                // Late joiners load the level and spectate until the next race.
                if self.race != RaceState::Idle {
                    self.send(
                        conn,
                        &Event::InitRace {
                            level: self.level.clone(),
                        },
                    );
                }
            }
            Registration::NickInUse => {
                info!("Nick {} already in use, rejecting {}", name, conn);
                self.send(conn, &Event::NickInUse);
            }
            Registration::AlreadyRegistered(existing) => {
                debug!("{} already registered as {}", conn, existing);
            }
            Registration::UnknownConnection => {
                warn!("hi from unknown connection {}", conn);
            }
        }
    }

    fn handle_finish(&mut self, conn: ConnId, name: String, time_ms: i64) {
        if !matches!(self.race, RaceState::Running { .. }) {
            debug!("Ignoring finish of {} outside a running race", name);
            return;
        }
        if time_ms < 0 || !self.scoreboard.record(&name, time_ms) {
            debug!("Ignoring finish of {} ({} ms)", name, time_ms);
            return;
        }
        info!("{} finished in {} ms", name, time_ms);
        self.transport
            .broadcast(&Event::PlayerFinished { name, time_ms }, Some(conn));
    }

    fn handle_vote_start(&mut self, caller: String, kind: VoteKind, subject: String, now_ms: u64) {
        if self.vote.is_running() {
            debug!("{} tried to call a vote while one is running", caller);
            return;
        }
        if kind == VoteKind::ChangeLevel && self.levels.load(&subject).is_none() {
            warn!("{} called a vote for unknown level '{}'", caller, subject);
            return;
        }

        self.voters = self
            .clients
            .registered()
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        self.vote.start(
            kind,
            &subject,
            self.voters.len(),
            self.config.vote_time_ms,
            now_ms,
        );
        self.transport
            .broadcast(&Event::VoteStart { kind, subject }, None);

        if let Some(result) = self.vote.add_vote(VoteOption::Yes, &caller) {
            self.finish_vote(result, now_ms);
        }
    }

    fn finish_vote(&mut self, result: VoteResult, now_ms: u64) {
        self.transport.broadcast(&Event::VoteEnd { result }, None);
        if result != VoteResult::Passed {
            return;
        }
        match self.vote.kind() {
            VoteKind::RestartRace => {}
            VoteKind::ChangeLevel => {
                info!("Switching level to {}", self.vote.subject());
                self.level = self.vote.subject().to_string();
            }
        }
        self.race = RaceState::Idle;
        self.intermission_until = None;
        self.start_race(now_ms);
    }

    fn handle_ranking_advance(&mut self, uid: &str, name: &str, time_ms: i64) {
        let Some(store) = &self.ranking else {
            return;
        };
        if time_ms <= 0 || uid.is_empty() {
            warn!("Ignoring ranking entry {} with time {}", uid, time_ms);
            return;
        }
        match store.advance_if_better(&RankingEntry::new(uid, name, time_ms)) {
            Ok(true) => info!("New best lap for {} ({}): {} ms", name, uid, time_ms),
            Ok(false) => debug!("Lap {} ms of {} is not a personal best", time_ms, uid),
            Err(e) => error!("Failed to store ranking of {}: {}", uid, e),
        }
    }

    fn handle_ranking_request(&mut self, conn: ConnId, from: i64, to: i64) {
        let rows = match &self.ranking {
            Some(store) => match store.entries(from, to) {
                Ok(rows) => rows,
                Err(RankingError::InvalidArgument(reason)) => {
                    warn!("Rejecting ranking request from {}: {}", conn, reason);
                    return;
                }
                Err(e) => {
                    error!("Ranking query failed: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.send_entries(conn, RANKING_TOKEN_RANGE, rows);
    }

    fn handle_ranking_find(&mut self, conn: ConnId, uid: &str) {
        let rows = match &self.ranking {
            Some(store) => match store.find(uid) {
                Ok(row) => vec![row],
                Err(RankingError::NotFound) => Vec::new(),
                Err(e) => {
                    error!("Ranking lookup of {} failed: {}", uid, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.send_entries(conn, RANKING_TOKEN_FIND, rows);
    }

    fn send_entries(&mut self, conn: ConnId, token: &str, rows: Vec<RankingRow>) {
        self.send(
            conn,
            &Event::RankingEntries {
                token: token.to_string(),
                rows,
            },
        );
    }

    fn update_race(&mut self, now_ms: u64) {
        match self.race {
            RaceState::Idle => {
                if self.intermission_until.map_or(true, |until| now_ms >= until) {
                    self.start_race(now_ms);
                }
            }
            RaceState::CountingDown { until_ms } => {
                if now_ms >= until_ms {
                    info!("Race on {} started", self.level);
                    self.race = RaceState::Running {
                        started_ms: until_ms,
                    };
                }
            }
            RaceState::Running { .. } => {
                if self.scoreboard.is_complete() {
                    for (place, record) in self.scoreboard.records().iter().enumerate() {
                        info!("#{} {} {} ms", place + 1, record.name, record.time_ms);
                    }
                    self.race = RaceState::Finished;
                    self.intermission_until =
                        Some(now_ms.saturating_add(self.config.intermission_ms));
                }
            }
            RaceState::Finished => {
                if self.intermission_until.map_or(true, |until| now_ms >= until) {
                    self.race = RaceState::Idle;
                    self.start_race(now_ms);
                }
            }
        }
    }

    /// Puts every registered player on the grid and starts the countdown.
    fn start_race(&mut self, now_ms: u64) {
        let players = self.clients.registered();
        if players.is_empty() || players.len() < self.config.min_players {
            return;
        }

        let track = match self.levels.load(&self.level) {
            Some(track) => Some(track),
            None => {
                warn!(
                    "Unknown level {}, falling back to {}",
                    self.level, self.config.level
                );
                self.level = self.config.level.clone();
                self.levels.load(&self.level)
            }
        };

        info!(
            "Starting race on {} with {} players, {} laps",
            self.level,
            players.len(),
            self.config.laps
        );
        self.transport.broadcast(
            &Event::InitRace {
                level: self.level.clone(),
            },
            None,
        );
        for (slot, (conn, _)) in players.iter().enumerate() {
            let (position, rotation) = spawn_slot(track.as_ref(), slot);
            self.send(
                *conn,
                &Event::RaceStart {
                    x: position.x,
                    y: position.y,
                    rotation,
                },
            );
        }
        self.transport.broadcast(
            &Event::RaceCountdown {
                duration_ms: self.config.countdown_ms as i64,
                laps: i64::from(self.config.laps),
            },
            None,
        );

        self.scoreboard = Scoreboard::new(players.into_iter().map(|(_, name)| name));
        self.race = RaceState::CountingDown {
            until_ms: now_ms.saturating_add(self.config.countdown_ms),
        };
        self.intermission_until = None;
    }

    fn send(&mut self, conn: ConnId, event: &Event) {
        if let Err(e) = self.transport.send_to(conn, event) {
            error!("Failed to send {} to {}: {}", event.name(), conn, e);
        }
    }

    pub fn race_state(&self) -> RaceState {
        self.race
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn vote(&self) -> &VoteSession {
        &self.vote
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn ranking(&self) -> Option<&RankingStore> {
        self.ranking.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

fn spawn_slot(track: Option<&Arc<dyn TrackGeometry>>, slot: usize) -> (Vector2, f32) {
    track.map_or((Vector2::ZERO, 0.0), |track| track.spawn_slot(slot))
}
