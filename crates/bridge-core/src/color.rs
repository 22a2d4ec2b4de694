//! Stone color (Black / White) for players and moves.

use serde::{Deserialize, Serialize};

/// Stone color: Black or White.
///
/// Black always moves first in an unmodified game; the bit value
/// (`0` for black, `1` for white) feeds the turn-parity arithmetic
/// in [`crate::turn`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Black,
    White,
}

impl Color {
    /// Lowercase name, as used by GTP (`genmove black`).
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::White => "white",
        }
    }

    /// Single-letter form used in log headers and result summaries.
    pub fn as_char(self) -> char {
        match self {
            Color::Black => 'B',
            Color::White => 'W',
        }
    }

    /// The other color.
    pub fn opponent(self) -> Self {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// Parity bit: `0` for black, `1` for white.
    pub fn bit(self) -> u8 {
        match self {
            Color::Black => 0,
            Color::White => 1,
        }
    }

    /// Try to parse from a GTP color token (`b`, `black`, `w`, `white`,
    /// case-insensitive).
    pub fn from_gtp(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "b" | "black" => Some(Color::Black),
            "w" | "white" => Some(Color::White),
            _ => None,
        }
    }
}
