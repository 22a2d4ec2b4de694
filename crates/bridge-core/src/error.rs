//! Error types for the core bridge logic.
//!
//! Most of the core is infallible; the one fallible operation is
//! checking an engine's handicap answer before any of it reaches the
//! server.

use thiserror::Error;

use crate::moves::{Move, Point};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// The engine returned a different number of handicap stones than
    /// the match requires.
    #[error("place_free_handicap returned {got} stones, expected {expected}")]
    WrongStoneCount { expected: usize, got: usize },

    /// A handicap answer contained a pass or a resignation.
    #[error("place_free_handicap returned {0} instead of a stone")]
    NotAStone(Move),

    /// A handicap stone lies outside the board.
    #[error("place_free_handicap returned off-board stone at {}, {}", .0.x, .0.y)]
    OffBoard(Point),
}
