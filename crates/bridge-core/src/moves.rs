//! Move representation shared by the session, the engine driver and
//! the codecs.
//!
//! Coordinates are 0-based with the origin in the top-left corner of
//! the board, which is the orientation the game server uses. GTP
//! vertices count rows from the bottom; `bridge_protocol::gtp_codec`
//! does that flip.

use std::fmt;

/// A board intersection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Point { x, y }
    }

    /// True if the point lies on a `width` x `height` board.
    pub fn is_on_board(self, width: u32, height: u32) -> bool {
        self.x < width && self.y < height
    }
}

/// A single move: a stone placement, a pass or a resignation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Move {
    Stone(Point),
    Pass,
    Resign,
}

impl Move {
    /// Convenience constructor for a stone placement.
    pub fn stone(x: u32, y: u32) -> Self {
        Move::Stone(Point::new(x, y))
    }

    /// True for an actual placement (not pass, not resign).
    pub fn is_stone(&self) -> bool {
        matches!(self, Move::Stone(_))
    }

    pub fn is_resign(&self) -> bool {
        matches!(self, Move::Resign)
    }

    pub fn point(&self) -> Option<Point> {
        match self {
            Move::Stone(p) => Some(*p),
            Move::Pass | Move::Resign => None,
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Move::Stone(p) => write!(f, "({}, {})", p.x, p.y),
            Move::Pass => write!(f, "pass"),
            Move::Resign => write!(f, "resign"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_placements_have_points() {
        assert_eq!(Move::stone(3, 4).point(), Some(Point::new(3, 4)));
        assert_eq!(Move::Pass.point(), None);
        assert!(!Move::Resign.is_stone());
        assert!(Move::Resign.is_resign());
    }

    #[test]
    fn board_bounds() {
        assert!(Point::new(18, 18).is_on_board(19, 19));
        assert!(!Point::new(19, 0).is_on_board(19, 19));
        assert!(!Point::new(0, 9).is_on_board(9, 9));
    }
}
