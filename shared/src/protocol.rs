//! Named wire events and their framing.
//!
//! On the wire every event is a [`Message`]: an event name plus an ordered
//! list of loosely typed [`Value`]s. [`Event`] is the typed view of the same
//! thing; converting a `Message` into an `Event` is where argument counts and
//! types are validated, so the rest of the code only ever sees well-formed
//! variants.
//!
//! Over a byte stream each message is one frame: a big-endian `u32` length
//! followed by the bincode body.

use crate::codec::{CarState, CAR_STATE_FIELDS};
use crate::error::ProtocolError;
use crate::vote::{VoteKind, VoteOption, VoteResult};
use bincode::{deserialize, serialize};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for a single frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// At most this many ranking rows are served per request.
pub const MAX_RANKING_SPAN: i64 = 20;

pub const RANKING_TOKEN_RANGE: &str = "range";
pub const RANKING_TOKEN_FIND: &str = "find";

/// One scalar argument of a wire event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f32),
    Bool(bool),
    Text(String),
}

impl Value {
    pub fn as_int(&self, index: usize) -> Result<i64, ProtocolError> {
        match self {
            Value::Int(v) => Ok(*v),
            _ => Err(ProtocolError::ArgumentType {
                index,
                expected: "integer",
            }),
        }
    }

    pub fn as_float(&self, index: usize) -> Result<f32, ProtocolError> {
        match self {
            Value::Float(v) => Ok(*v),
            _ => Err(ProtocolError::ArgumentType {
                index,
                expected: "float",
            }),
        }
    }

    pub fn as_bool(&self, index: usize) -> Result<bool, ProtocolError> {
        match self {
            Value::Bool(v) => Ok(*v),
            _ => Err(ProtocolError::ArgumentType {
                index,
                expected: "bool",
            }),
        }
    }

    pub fn as_text(&self, index: usize) -> Result<&str, ProtocolError> {
        match self {
            Value::Text(v) => Ok(v),
            _ => Err(ProtocolError::ArgumentType {
                index,
                expected: "text",
            }),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// An event as it travels: name plus positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(name: &str, args: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            args,
        }
    }

    /// Length-prefixed bincode frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = serialize(self)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(body.len()));
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    pub fn from_body(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(deserialize(body)?)
    }
}

/// Reads one frame. `Ok(None)` means the peer closed the stream cleanly.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            ProtocolError::FrameTooLarge(len),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = message
        .to_frame()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoodbyeReason {
    ServerFull,
    Shutdown,
    ProtocolViolation,
    Other(i64),
}

impl GoodbyeReason {
    pub fn code(self) -> i64 {
        match self {
            GoodbyeReason::ServerFull => 1,
            GoodbyeReason::Shutdown => 2,
            GoodbyeReason::ProtocolViolation => 3,
            GoodbyeReason::Other(code) => code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => GoodbyeReason::ServerFull,
            2 => GoodbyeReason::Shutdown,
            3 => GoodbyeReason::ProtocolViolation,
            other => GoodbyeReason::Other(other),
        }
    }
}

/// One row of a ranking reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingRow {
    pub uid: String,
    pub name: String,
    pub time_ms: i64,
    pub place: i64,
}

const RANKING_ROW_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Hi { name: String },
    PlayerConnected { name: String },
    PlayerDisconnected { name: String },
    NickInUse,
    InitRace { level: String },
    CarState(CarState),
    RaceStart { x: f32, y: f32, rotation: f32 },
    RaceCountdown { duration_ms: i64, laps: i64 },
    PlayerFinished { name: String, time_ms: i64 },
    VoteStart { kind: VoteKind, subject: String },
    VoteTick { option: VoteOption },
    VoteEnd { result: VoteResult },
    Goodbye { reason: GoodbyeReason, message: String },
    RankingAdvance { uid: String, name: String, time_ms: i64 },
    RankingRequest { from: i64, to: i64 },
    RankingFind { uid: String },
    RankingEntries { token: String, rows: Vec<RankingRow> },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Hi { .. } => "hi",
            Event::PlayerConnected { .. } => "player-connected",
            Event::PlayerDisconnected { .. } => "player-disconnected",
            Event::NickInUse => "nick-in-use",
            Event::InitRace { .. } => "init-race",
            Event::CarState(_) => "car-state",
            Event::RaceStart { .. } => "race-start",
            Event::RaceCountdown { .. } => "race-countdown",
            Event::PlayerFinished { .. } => "player-finished",
            Event::VoteStart { .. } => "vote-start",
            Event::VoteTick { .. } => "vote-tick",
            Event::VoteEnd { .. } => "vote-end",
            Event::Goodbye { .. } => "goodbye",
            Event::RankingAdvance { .. } => "ranking-advance",
            Event::RankingRequest { .. } => "ranking-request",
            Event::RankingFind { .. } => "ranking-find",
            Event::RankingEntries { .. } => "ranking-entries",
        }
    }

    pub fn to_message(&self) -> Message {
        let args = match self {
            Event::Hi { name }
            | Event::PlayerConnected { name }
            | Event::PlayerDisconnected { name } => vec![name.as_str().into()],
            Event::NickInUse => vec![],
            Event::InitRace { level } => vec![level.as_str().into()],
            Event::CarState(state) => {
                let mut args = Vec::with_capacity(2 + CAR_STATE_FIELDS);
                args.push(state.sender.as_str().into());
                args.push(state.after_collision.into());
                args.extend(state.encode());
                args
            }
            Event::RaceStart { x, y, rotation } => {
                vec![(*x).into(), (*y).into(), (*rotation).into()]
            }
            Event::RaceCountdown { duration_ms, laps } => {
                vec![(*duration_ms).into(), (*laps).into()]
            }
            Event::PlayerFinished { name, time_ms } => {
                vec![name.as_str().into(), (*time_ms).into()]
            }
            Event::VoteStart { kind, subject } => {
                vec![kind.code().into(), subject.as_str().into()]
            }
            Event::VoteTick { option } => vec![(*option == VoteOption::Yes).into()],
            Event::VoteEnd { result } => vec![result.code().into()],
            Event::Goodbye { reason, message } => {
                vec![reason.code().into(), message.as_str().into()]
            }
            Event::RankingAdvance { uid, name, time_ms } => {
                vec![uid.as_str().into(), name.as_str().into(), (*time_ms).into()]
            }
            Event::RankingRequest { from, to } => vec![(*from).into(), (*to).into()],
            Event::RankingFind { uid } => vec![uid.as_str().into()],
            Event::RankingEntries { token, rows } => {
                let mut args = Vec::with_capacity(1 + rows.len() * RANKING_ROW_FIELDS);
                args.push(token.as_str().into());
                for row in rows {
                    args.push(row.uid.as_str().into());
                    args.push(row.name.as_str().into());
                    args.push(row.time_ms.into());
                    args.push(row.place.into());
                }
                args
            }
        };
        Message::new(self.name(), args)
    }

    pub fn from_message(message: &Message) -> Result<Event, ProtocolError> {
        let args = &message.args;
        let text = |i: usize| args[i].as_text(i).map(str::to_string);

        let event = match message.name.as_str() {
            "hi" => {
                expect_args("hi", args, 1)?;
                Event::Hi { name: text(0)? }
            }
            "player-connected" => {
                expect_args("player-connected", args, 1)?;
                Event::PlayerConnected { name: text(0)? }
            }
            "player-disconnected" => {
                expect_args("player-disconnected", args, 1)?;
                Event::PlayerDisconnected { name: text(0)? }
            }
            "nick-in-use" => {
                expect_args("nick-in-use", args, 0)?;
                Event::NickInUse
            }
            "init-race" => {
                expect_args("init-race", args, 1)?;
                Event::InitRace { level: text(0)? }
            }
            "car-state" => {
                expect_args("car-state", args, 2 + CAR_STATE_FIELDS)?;
                let sender = text(0)?;
                let after_collision = args[1].as_bool(1)?;
                Event::CarState(CarState::decode(sender, after_collision, &args[2..], 2)?)
            }
            "race-start" => {
                expect_args("race-start", args, 3)?;
                Event::RaceStart {
                    x: finite(args, 0)?,
                    y: finite(args, 1)?,
                    rotation: finite(args, 2)?,
                }
            }
            "race-countdown" => {
                expect_args("race-countdown", args, 2)?;
                Event::RaceCountdown {
                    duration_ms: non_negative(args, 0)?,
                    laps: non_negative(args, 1)?,
                }
            }
            "player-finished" => {
                expect_args("player-finished", args, 2)?;
                Event::PlayerFinished {
                    name: text(0)?,
                    time_ms: non_negative(args, 1)?,
                }
            }
            "vote-start" => {
                expect_args("vote-start", args, 2)?;
                let kind = VoteKind::from_code(args[0].as_int(0)?)
                    .ok_or(ProtocolError::OutOfRange { index: 0 })?;
                Event::VoteStart {
                    kind,
                    subject: text(1)?,
                }
            }
            "vote-tick" => {
                expect_args("vote-tick", args, 1)?;
                let option = if args[0].as_bool(0)? {
                    VoteOption::Yes
                } else {
                    VoteOption::No
                };
                Event::VoteTick { option }
            }
            "vote-end" => {
                expect_args("vote-end", args, 1)?;
                let result = VoteResult::from_code(args[0].as_int(0)?)
                    .ok_or(ProtocolError::OutOfRange { index: 0 })?;
                Event::VoteEnd { result }
            }
            "goodbye" => {
                expect_args("goodbye", args, 2)?;
                Event::Goodbye {
                    reason: GoodbyeReason::from_code(args[0].as_int(0)?),
                    message: text(1)?,
                }
            }
            "ranking-advance" => {
                expect_args("ranking-advance", args, 3)?;
                Event::RankingAdvance {
                    uid: text(0)?,
                    name: text(1)?,
                    time_ms: non_negative(args, 2)?,
                }
            }
            "ranking-request" => {
                expect_args("ranking-request", args, 2)?;
                Event::RankingRequest {
                    from: args[0].as_int(0)?,
                    to: args[1].as_int(1)?,
                }
            }
            "ranking-find" => {
                expect_args("ranking-find", args, 1)?;
                Event::RankingFind { uid: text(0)? }
            }
            "ranking-entries" => {
                if args.is_empty() || (args.len() - 1) % RANKING_ROW_FIELDS != 0 {
                    return Err(ProtocolError::ArgumentCount {
                        event: "ranking-entries",
                        expected: 1 + RANKING_ROW_FIELDS * ((args.len().max(1) - 1) / RANKING_ROW_FIELDS),
                        found: args.len(),
                    });
                }
                let rows = (1..args.len())
                    .step_by(RANKING_ROW_FIELDS)
                    .map(|i| {
                        Ok(RankingRow {
                            uid: text(i)?,
                            name: text(i + 1)?,
                            time_ms: args[i + 2].as_int(i + 2)?,
                            place: args[i + 3].as_int(i + 3)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ProtocolError>>()?;
                Event::RankingEntries {
                    token: text(0)?,
                    rows,
                }
            }
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

fn expect_args(event: &'static str, args: &[Value], expected: usize) -> Result<(), ProtocolError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::ArgumentCount {
            event,
            expected,
            found: args.len(),
        })
    }
}

fn finite(args: &[Value], index: usize) -> Result<f32, ProtocolError> {
    let v = args[index].as_float(index)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ProtocolError::NonFinite { index })
    }
}

fn non_negative(args: &[Value], index: usize) -> Result<i64, ProtocolError> {
    let v = args[index].as_int(index)?;
    if v < 0 {
        Err(ProtocolError::OutOfRange { index })
    } else {
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::Car;
    use crate::math::Vector2;
    use tokio_test::assert_ok;

    fn roundtrip(event: Event) -> Event {
        let message = event.to_message();
        let frame = message.to_frame().unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let decoded = Message::from_body(&frame[4..]).unwrap();
        Event::from_message(&decoded).unwrap()
    }

    #[test]
    fn test_event_names() {
        assert_eq!(Event::NickInUse.to_message().name, "nick-in-use");
        assert_eq!(
            Event::Hi {
                name: "Alice".into()
            }
            .name(),
            "hi"
        );
    }

    #[test]
    fn test_roundtrip_lifecycle_events() {
        let events = vec![
            Event::Hi {
                name: "Alice".into(),
            },
            Event::NickInUse,
            Event::InitRace {
                level: "oval".into(),
            },
            Event::RaceStart {
                x: 10.0,
                y: -4.5,
                rotation: 1.5,
            },
            Event::RaceCountdown {
                duration_ms: 3000,
                laps: 3,
            },
            Event::PlayerFinished {
                name: "Bob".into(),
                time_ms: 61_234,
            },
            Event::VoteStart {
                kind: VoteKind::ChangeLevel,
                subject: "square".into(),
            },
            Event::VoteTick {
                option: VoteOption::No,
            },
            Event::VoteEnd {
                result: VoteResult::Passed,
            },
            Event::Goodbye {
                reason: GoodbyeReason::ServerFull,
                message: "full".into(),
            },
        ];

        for event in events {
            assert_eq!(roundtrip(event.clone()), event);
        }
    }

    #[test]
    fn test_roundtrip_car_state() {
        let mut car = Car::new(Vector2::new(3.0, 4.0), 0.25);
        car.advance(250);
        let event = Event::CarState(car.snapshot("Carol", true));
        assert_eq!(roundtrip(event.clone()), event);
        assert_eq!(event.to_message().args.len(), 17);
    }

    #[test]
    fn test_roundtrip_ranking_entries() {
        let event = Event::RankingEntries {
            token: RANKING_TOKEN_RANGE.into(),
            rows: vec![
                RankingRow {
                    uid: "u1".into(),
                    name: "A".into(),
                    time_ms: 500,
                    place: 1,
                },
                RankingRow {
                    uid: "u2".into(),
                    name: "B".into(),
                    time_ms: 900,
                    place: 2,
                },
            ],
        };
        assert_eq!(roundtrip(event.clone()), event);

        let empty = Event::RankingEntries {
            token: RANKING_TOKEN_FIND.into(),
            rows: vec![],
        };
        assert_eq!(roundtrip(empty.clone()), empty);
    }

    #[test]
    fn test_wrong_argument_count() {
        let message = Message::new("hi", vec![]);
        assert!(matches!(
            Event::from_message(&message),
            Err(ProtocolError::ArgumentCount {
                event: "hi",
                expected: 1,
                found: 0
            })
        ));

        let mut car_state = Event::CarState(Car::default().snapshot("x", false)).to_message();
        car_state.args.pop();
        assert!(matches!(
            Event::from_message(&car_state),
            Err(ProtocolError::ArgumentCount { .. })
        ));

        let ragged = Message::new("ranking-entries", vec!["range".into(), "u1".into()]);
        assert!(Event::from_message(&ragged).is_err());
    }

    #[test]
    fn test_unknown_event() {
        let message = Message::new("teleport", vec![]);
        assert!(matches!(
            Event::from_message(&message),
            Err(ProtocolError::UnknownEvent(name)) if name == "teleport"
        ));
    }

    #[test]
    fn test_wrong_argument_type() {
        let message = Message::new(
            "race-countdown",
            vec![Value::Text("soon".into()), Value::Int(3)],
        );
        assert!(matches!(
            Event::from_message(&message),
            Err(ProtocolError::ArgumentType { index: 0, .. })
        ));
    }

    #[test]
    fn test_out_of_range_codes() {
        let message = Message::new("vote-end", vec![Value::Int(9)]);
        assert!(matches!(
            Event::from_message(&message),
            Err(ProtocolError::OutOfRange { index: 0 })
        ));
    }

    #[test]
    fn test_corrupt_frame_body() {
        assert!(matches!(
            Message::from_body(&[0xff, 0xff, 0xff]),
            Err(ProtocolError::Frame(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_stream_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let message = Event::Hi {
            name: "Dana".into(),
        }
        .to_message();

        assert_ok!(write_message(&mut a, &message).await);
        drop(a);

        let body = assert_ok!(read_frame(&mut b).await).unwrap();
        assert_eq!(assert_ok!(Message::from_body(&body)), message);
        assert!(assert_ok!(read_frame(&mut b).await).is_none());
    }
}
