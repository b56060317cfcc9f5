//! # Shared Racing Core
//!
//! Types and logic used by both the server and the client: the car physics,
//! the wire protocol and the race/vote state machines. Nothing in this crate
//! opens a socket; the tier crates plug their transports in through the
//! traits in [`transport`].
//!
//! ## Determinism
//!
//! Every car is integrated in fixed 1/60 s ticks drained from a per-car time
//! bank. Two cars fed the same inputs over the same ticks reach identical
//! state, so a client can extrapolate another player's car from its last
//! snapshot and only correct it when the next snapshot arrives.
//!
//! ## Module Organization
//!
//! ### Car Module (`car`)
//! The fixed-step vehicle model:
//! - Time banking and tick draining
//! - Throttle, steering, drift and air resistance
//! - Wall collision response and damage
//! - Choke stutter derived from damage and the tick counter
//!
//! ### Codec Module (`codec`)
//! The 15-field `CarState` snapshot and its validated decoding.
//!
//! ### Protocol Module (`protocol`)
//! Named events with typed arguments, length-prefixed framing and the typed
//! `Event` enum both tiers dispatch on.
//!
//! ### Transport Module (`transport`)
//! Client and server transport traits plus an in-process implementation.
//!
//! ### Session Module (`session`)
//! The race coordinator: local car, mirrored cars, lap counting and the
//! race lifecycle.
//!
//! ### Vote Module (`vote`)
//! Timed majority vote used for race control.
//!
//! ### Track, Math, Clock and Error Modules
//! Collision geometry, vector helpers, time sources and the shared error
//! types.

pub mod car;
pub mod clock;
pub mod codec;
pub mod error;
pub mod math;
pub mod protocol;
pub mod session;
pub mod track;
pub mod transport;
pub mod vote;

pub use car::{Car, CarInput};
pub use codec::CarState;
pub use error::{ConnectionError, ProtocolError};
pub use math::{Segment, Vector2};
pub use protocol::{Event, GoodbyeReason, Message, RankingRow, Value};
pub use session::{RaceSession, RaceState};
pub use transport::{ClientEvent, ClientTransport, ConnId, ServerEvent, ServerTransport};
pub use vote::{VoteKind, VoteOption, VoteResult, VoteSession};
