//! bridge-core
//!
//! Pure bridge logic, independent of transport and engine process:
//! - colors and moves
//! - mirror of the server's match record
//! - turn ownership under the handicap regimes
//! - global throttle on concurrent engine computations

pub mod color;
pub mod moves;
pub mod snapshot;
pub mod turn;
pub mod throttle;
pub mod error;

pub use color::Color;
pub use moves::{Move, Point};

pub use snapshot::{
    Clock,
    MatchId,
    MatchSnapshot,
    Pause,
    Phase,
    Player,
    PlayerId,
    Players,
    Speed,
    TimeControl,
    WireMove,
};

pub use throttle::{Throttle, ThrottleCounts, ThrottlePermit};
pub use error::CoreError;

/// Number of recorded engine failures after which a session stops
/// spawning engines and resigns instead.
pub const MAX_ENGINE_FAILURES: u32 = 5;
