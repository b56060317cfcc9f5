//! Timed yes/no consensus used for race control.
//!
//! The server owns the authoritative [`VoteSession`]; clients keep a
//! read-only mirror built from `vote-start`/`vote-end` events. Time is passed
//! in explicitly as milliseconds from the caller's clock so the machine stays
//! deterministic and testable.

use log::info;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteKind {
    RestartRace,
    /// Subject carries the level name.
    ChangeLevel,
}

impl VoteKind {
    pub fn code(self) -> i64 {
        match self {
            VoteKind::RestartRace => 0,
            VoteKind::ChangeLevel => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(VoteKind::RestartRace),
            1 => Some(VoteKind::ChangeLevel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOption {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    Passed,
    Failed,
    Undecided,
}

impl VoteResult {
    pub fn code(self) -> i64 {
        match self {
            VoteResult::Passed => 0,
            VoteResult::Failed => 1,
            VoteResult::Undecided => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(VoteResult::Passed),
            1 => Some(VoteResult::Failed),
            2 => Some(VoteResult::Undecided),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    Idle,
    Running,
    Finished(VoteResult),
}

#[derive(Debug, Clone)]
pub struct VoteSession {
    state: VoteState,
    kind: VoteKind,
    subject: String,
    voter_count: usize,
    deadline_ms: u64,
    ballots: HashMap<String, VoteOption>,
}

impl Default for VoteSession {
    fn default() -> Self {
        Self::new()
    }
}

impl VoteSession {
    pub fn new() -> Self {
        Self {
            state: VoteState::Idle,
            kind: VoteKind::RestartRace,
            subject: String::new(),
            voter_count: 0,
            deadline_ms: 0,
            ballots: HashMap::new(),
        }
    }

    /// Opens the vote. Any previous tally is discarded.
    pub fn start(
        &mut self,
        kind: VoteKind,
        subject: &str,
        voter_count: usize,
        time_limit_ms: u64,
        now_ms: u64,
    ) {
        info!(
            "Vote {:?} '{}' started: {} voters, {} ms",
            kind, subject, voter_count, time_limit_ms
        );
        self.state = VoteState::Running;
        self.kind = kind;
        self.subject = subject.to_string();
        self.voter_count = voter_count;
        self.deadline_ms = now_ms.saturating_add(time_limit_ms);
        self.ballots.clear();
    }

    /// Records (or replaces) a voter's ballot and re-evaluates the tally.
    ///
    /// Returns the result on the call that resolves the vote and `None`
    /// otherwise, including every call after resolution.
    pub fn add_vote(&mut self, option: VoteOption, voter: &str) -> Option<VoteResult> {
        if self.state != VoteState::Running {
            return None;
        }
        self.ballots.insert(voter.to_string(), option);

        let (yes, no) = self.tally();
        let result = if yes * 2 > self.voter_count {
            VoteResult::Passed
        } else if no * 2 > self.voter_count {
            VoteResult::Failed
        } else {
            return None;
        };
        self.finish(result)
    }

    /// Expires the vote once the deadline has passed. Silence counts as no.
    pub fn poll(&mut self, now_ms: u64) -> Option<VoteResult> {
        if self.state == VoteState::Running && now_ms >= self.deadline_ms {
            return self.finish(VoteResult::Failed);
        }
        None
    }

    fn finish(&mut self, result: VoteResult) -> Option<VoteResult> {
        let (yes, no) = self.tally();
        info!(
            "Vote {:?} '{}' finished: {:?} ({} yes / {} no of {})",
            self.kind, self.subject, result, yes, no, self.voter_count
        );
        self.state = VoteState::Finished(result);
        Some(result)
    }

    /// Current `(yes, no)` counts.
    pub fn tally(&self) -> (usize, usize) {
        self.ballots
            .values()
            .fold((0, 0), |(yes, no), option| match option {
                VoteOption::Yes => (yes + 1, no),
                VoteOption::No => (yes, no + 1),
            })
    }

    pub fn state(&self) -> VoteState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == VoteState::Running
    }

    pub fn kind(&self) -> VoteKind {
        self.kind
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn voter_count(&self) -> usize {
        self.voter_count
    }

    pub fn result(&self) -> VoteResult {
        match self.state {
            VoteState::Finished(result) => result,
            _ => VoteResult::Undecided,
        }
    }
}
