//! Server move encoding.
//!
//! Outbound moves are two lowercase letters, x then y, each mapping
//! `a`..`z` to a 0-based coordinate with the origin in the top-left
//! corner: `(3, 4)` is `"de"`. Anything that is not a placement is the
//! sentinel `".."`.
//!
//! Inbound moves arrive either in that encoding or as a coordinate
//! array `[x, y, time, ...]` where `[-1, -1, ...]` is a pass. Both are
//! decoded against the board size; decoding is fallible so the session
//! can log a bad move and keep going.

use bridge_core::{Move, Point, WireMove};
use thiserror::Error;

const LETTERS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Encoding of a pass (and of any other non-placement).
pub const PASS_ENCODING: &str = "..";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Encoded move is not exactly two characters.
    #[error("encoded move {0:?} is not two characters")]
    BadLength(String),

    /// Character outside `a`..`z`.
    #[error("invalid coordinate character {0:?}")]
    BadCoordinate(char),

    /// Coordinate does not fit the single-letter encoding.
    #[error("coordinate {0} cannot be encoded")]
    Unencodable(u32),

    /// Decoded point lies outside the board.
    #[error("move ({x}, {y}) is off a {width}x{height} board")]
    OffBoard { x: i64, y: i64, width: u32, height: u32 },

    /// Coordinate array without two integer coordinates.
    #[error("malformed move array: {0}")]
    MalformedArray(String),
}

/// Encode a move for upload.
pub fn encode_move(mv: Move) -> Result<String, CodecError> {
    match mv {
        Move::Stone(Point { x, y }) => {
            let mut out = String::with_capacity(2);
            out.push(coordinate_char(x)?);
            out.push(coordinate_char(y)?);
            Ok(out)
        }
        Move::Pass | Move::Resign => Ok(PASS_ENCODING.to_string()),
    }
}

/// Decode a move as recorded on the wire.
pub fn decode_wire_move(wire: &WireMove, width: u32, height: u32) -> Result<Move, CodecError> {
    match wire {
        WireMove::Encoded(text) => decode_encoded(text, width, height),
        WireMove::Coords(values) => decode_coords(values, width, height),
    }
}

/// Decode the two-letter encoding.
pub fn decode_encoded(text: &str, width: u32, height: u32) -> Result<Move, CodecError> {
    if text == PASS_ENCODING {
        return Ok(Move::Pass);
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() != 2 {
        return Err(CodecError::BadLength(text.to_string()));
    }

    let x = coordinate_value(chars[0])?;
    let y = coordinate_value(chars[1])?;
    on_board(i64::from(x), i64::from(y), width, height)
}

fn decode_coords(values: &[serde_json::Value], width: u32, height: u32) -> Result<Move, CodecError> {
    let (Some(x), Some(y)) = (
        values.first().and_then(|v| v.as_i64()),
        values.get(1).and_then(|v| v.as_i64()),
    ) else {
        return Err(CodecError::MalformedArray(format!("{:?}", values)));
    };

    if x == -1 && y == -1 {
        return Ok(Move::Pass);
    }

    on_board(x, y, width, height)
}

fn on_board(x: i64, y: i64, width: u32, height: u32) -> Result<Move, CodecError> {
    let fits = |v: i64, limit: u32| v >= 0 && v < i64::from(limit);
    if !fits(x, width) || !fits(y, height) {
        return Err(CodecError::OffBoard { x, y, width, height });
    }
    // Both values are in 0..limit, which is within u32.
    Ok(Move::stone(x as u32, y as u32))
}

fn coordinate_char(value: u32) -> Result<char, CodecError> {
    LETTERS
        .get(value as usize)
        .map(|b| *b as char)
        .ok_or(CodecError::Unencodable(value))
}

fn coordinate_value(c: char) -> Result<u32, CodecError> {
    if c.is_ascii_lowercase() {
        Ok(c as u32 - 'a' as u32)
    } else {
        Err(CodecError::BadCoordinate(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_stone_x_then_y() {
        assert_eq!(encode_move(Move::stone(3, 4)).as_deref(), Ok("de"));
        assert_eq!(encode_move(Move::stone(0, 18)).as_deref(), Ok("as"));
        assert_eq!(encode_move(Move::stone(25, 25)).as_deref(), Ok("zz"));
    }

    #[test]
    fn non_placements_use_sentinel() {
        assert_eq!(encode_move(Move::Pass).as_deref(), Ok(".."));
        assert_eq!(encode_move(Move::Resign).as_deref(), Ok(".."));
    }

    #[test]
    fn rejects_unencodable_coordinate() {
        assert_eq!(encode_move(Move::stone(26, 0)), Err(CodecError::Unencodable(26)));
    }

    #[test]
    fn decodes_both_wire_shapes() {
        let text = WireMove::Encoded("de".to_string());
        assert_eq!(decode_wire_move(&text, 19, 19), Ok(Move::stone(3, 4)));

        let array: WireMove = serde_json::from_value(json!([3, 4, 1520.25])).unwrap();
        assert_eq!(decode_wire_move(&array, 19, 19), Ok(Move::stone(3, 4)));

        let pass: WireMove = serde_json::from_value(json!([-1, -1, 900])).unwrap();
        assert_eq!(decode_wire_move(&pass, 19, 19), Ok(Move::Pass));

        let pass_text = WireMove::Encoded("..".to_string());
        assert_eq!(decode_wire_move(&pass_text, 19, 19), Ok(Move::Pass));
    }

    #[test]
    fn decode_errors_are_reported() {
        assert_eq!(
            decode_encoded("d", 19, 19),
            Err(CodecError::BadLength("d".to_string()))
        );
        assert_eq!(decode_encoded("dE", 19, 19), Err(CodecError::BadCoordinate('E')));
        assert!(matches!(
            decode_encoded("tt", 19, 19),
            Err(CodecError::OffBoard { x: 19, y: 19, .. })
        ));

        let garbage: WireMove = serde_json::from_value(json!(["x"])).unwrap();
        assert!(matches!(
            decode_wire_move(&garbage, 19, 19),
            Err(CodecError::MalformedArray(_))
        ));
    }
}
