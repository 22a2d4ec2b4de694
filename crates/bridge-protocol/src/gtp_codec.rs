//! GTP (Go Text Protocol) codec for the engine process.
//!
//! Commands (bridge → engine), one per line:
//!
//! - `boardsize <n>` / `rectangular_boardsize <w> <h>`
//! - `clear_board`
//! - `komi <k>`
//! - `fixed_handicap <n>`
//! - `play <black|white> <vertex>`
//! - `genmove <black|white>`            → one vertex
//! - `place_free_handicap <n>`          → `n` vertices
//! - `quit`
//!
//! Responses (engine → bridge) are blocks terminated by an empty line:
//!
//! ```text
//! = D4          success, optional id digits after '='
//! ? illegal     failure
//! ```
//!
//! Vertices are a column letter (`A`..`Z` without `I`) followed by a
//! row number counted from the bottom edge, so `(3, 15)` in server
//! coordinates on a 19x19 board is `D4`.

use std::fmt;

use bridge_core::turn::mover_color;
use bridge_core::{Color, MatchSnapshot, Move, Point};
use thiserror::Error;

use crate::move_codec::decode_wire_move;

const COLUMNS: &[u8; 25] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GtpError {
    /// Token is not `pass`, `resign` or a vertex on this board.
    #[error("invalid vertex {0:?}")]
    BadVertex(String),

    /// Point cannot be expressed as a GTP vertex on this board.
    #[error("point ({}, {}) has no vertex on this board", .0.x, .0.y)]
    Unencodable(Point),

    /// A response block without a `=` or `?` status.
    #[error("malformed response {0:?}")]
    MalformedResponse(String),

    /// The engine answered a move request with no vertices.
    #[error("engine returned no moves")]
    EmptyResponse,
}

/// Move-producing engine requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Generate one move for the given color.
    Genmove(Color),
    /// Choose this many free handicap stones at once.
    PlaceFreeHandicap(u32),
}

impl EngineCommand {
    pub fn to_line(&self) -> String {
        match self {
            EngineCommand::Genmove(color) => format!("genmove {}", color.as_str()),
            EngineCommand::PlaceFreeHandicap(count) => format!("place_free_handicap {}", count),
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Status and text of one response block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GtpResponse {
    Success(String),
    Failure(String),
}

/// Parse a response block (the lines before the terminating empty line).
pub fn parse_response(block: &str) -> Result<GtpResponse, GtpError> {
    let trimmed = block.trim();
    let mut chars = trimmed.chars();

    let status = chars.next();
    // Optional numeric id right after the status character.
    let text = chars
        .as_str()
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim()
        .to_string();

    match status {
        Some('=') => Ok(GtpResponse::Success(text)),
        Some('?') => Ok(GtpResponse::Failure(text)),
        _ => Err(GtpError::MalformedResponse(block.to_string())),
    }
}

/// Parse the vertices of a successful move response.
pub fn parse_moves(text: &str, width: u32, height: u32) -> Result<Vec<Move>, GtpError> {
    let moves = text
        .split_whitespace()
        .map(|token| parse_vertex(token, width, height))
        .collect::<Result<Vec<_>, _>>()?;

    if moves.is_empty() {
        return Err(GtpError::EmptyResponse);
    }
    Ok(moves)
}

/// Parse a single vertex token (`D4`, `pass`, `resign`).
pub fn parse_vertex(token: &str, width: u32, height: u32) -> Result<Move, GtpError> {
    let upper = token.trim().to_ascii_uppercase();
    match upper.as_str() {
        "PASS" => return Ok(Move::Pass),
        "RESIGN" => return Ok(Move::Resign),
        _ => {}
    }

    let bad = || GtpError::BadVertex(token.to_string());

    let mut chars = upper.chars();
    let column = chars.next().ok_or_else(bad)?;
    let x = COLUMNS
        .iter()
        .position(|c| *c as char == column)
        .ok_or_else(bad)? as u32;
    let row: u32 = chars.as_str().parse().map_err(|_| bad())?;

    if x >= width || row == 0 || row > height {
        return Err(bad());
    }

    Ok(Move::stone(x, height - row))
}

/// Format a move as a GTP vertex.
pub fn format_vertex(mv: Move, height: u32) -> Result<String, GtpError> {
    match mv {
        Move::Pass => Ok("pass".to_string()),
        Move::Resign => Ok("resign".to_string()),
        Move::Stone(p) => {
            let column = COLUMNS.get(p.x as usize).ok_or(GtpError::Unencodable(p))?;
            if p.y >= height {
                return Err(GtpError::Unencodable(p));
            }
            Ok(format!("{}{}", *column as char, height - p.y))
        }
    }
}

/// `play <color> <vertex>`
pub fn play_line(color: Color, mv: Move, height: u32) -> Result<String, GtpError> {
    Ok(format!("play {} {}", color.as_str(), format_vertex(mv, height)?))
}

/// Commands that bring a fresh engine to the mirrored position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineSetup {
    pub commands: Vec<String>,
    /// Indices of recorded moves that could not be decoded and were left out.
    pub skipped: Vec<usize>,
}

/// Build the setup for a fresh engine. Undecodable recorded moves are
/// skipped, the same way a live undecodable move is never forwarded.
pub fn setup_commands(snapshot: &MatchSnapshot) -> EngineSetup {
    let width = snapshot.width;
    let height = snapshot.board_height();
    let mut setup = EngineSetup {
        commands: Vec::with_capacity(snapshot.move_count() + 4),
        skipped: Vec::new(),
    };

    if width == height {
        setup.commands.push(format!("boardsize {}", width));
    } else {
        setup.commands.push(format!("rectangular_boardsize {} {}", width, height));
    }
    setup.commands.push("clear_board".to_string());

    if let Some(komi) = snapshot.komi {
        setup.commands.push(format!("komi {}", komi));
    }

    if snapshot.handicap > 1 && !snapshot.free_handicap_placement {
        setup.commands.push(format!("fixed_handicap {}", snapshot.handicap));
    }

    for (index, wire) in snapshot.moves.iter().enumerate() {
        let line = decode_wire_move(wire, width, height)
            .ok()
            .and_then(|mv| play_line(mover_color(snapshot, index), mv, height).ok());
        match line {
            Some(line) => setup.commands.push(line),
            None => setup.skipped.push(index),
        }
    }

    setup
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vertex_rows_count_from_bottom() {
        assert_eq!(parse_vertex("D4", 19, 19), Ok(Move::stone(3, 15)));
        assert_eq!(parse_vertex("a19", 19, 19), Ok(Move::stone(0, 0)));
        assert_eq!(parse_vertex("J1", 19, 19), Ok(Move::stone(8, 18)));
        assert_eq!(format_vertex(Move::stone(3, 15), 19).as_deref(), Ok("D4"));
        assert_eq!(format_vertex(Move::stone(8, 0), 9).as_deref(), Ok("J9"));
    }

    #[test]
    fn column_i_is_skipped() {
        assert!(parse_vertex("I5", 19, 19).is_err());
        assert_eq!(parse_vertex("H5", 19, 19), Ok(Move::stone(7, 14)));
    }

    #[test]
    fn rejects_vertices_off_the_board() {
        assert!(parse_vertex("K5", 9, 9).is_err());
        assert!(parse_vertex("A10", 9, 9).is_err());
        assert!(parse_vertex("A0", 9, 9).is_err());
        assert!(parse_vertex("", 9, 9).is_err());
    }

    #[test]
    fn pass_and_resign_tokens() {
        assert_eq!(parse_vertex("PASS", 19, 19), Ok(Move::Pass));
        assert_eq!(parse_vertex("resign", 19, 19), Ok(Move::Resign));
        assert_eq!(format_vertex(Move::Pass, 19).as_deref(), Ok("pass"));
    }

    #[test]
    fn response_status_and_ids() {
        assert_eq!(parse_response("= Q16"), Ok(GtpResponse::Success("Q16".to_string())));
        assert_eq!(parse_response("=12 D4 Q16"), Ok(GtpResponse::Success("D4 Q16".to_string())));
        assert_eq!(parse_response("="), Ok(GtpResponse::Success(String::new())));
        assert_eq!(
            parse_response("? illegal move"),
            Ok(GtpResponse::Failure("illegal move".to_string()))
        );
        assert!(parse_response("D4").is_err());
    }

    #[test]
    fn handicap_response_keeps_engine_order() {
        let moves = parse_moves("D4 Q16 D16", 19, 19).unwrap();
        assert_eq!(
            moves,
            vec![Move::stone(3, 15), Move::stone(15, 3), Move::stone(3, 3)]
        );
        assert_eq!(parse_moves("  ", 19, 19), Err(GtpError::EmptyResponse));
    }

    #[test]
    fn command_lines() {
        assert_eq!(EngineCommand::Genmove(Color::White).to_line(), "genmove white");
        assert_eq!(EngineCommand::PlaceFreeHandicap(4).to_line(), "place_free_handicap 4");
    }

    #[test]
    fn setup_replays_free_handicap_game() {
        let snapshot: MatchSnapshot = serde_json::from_value(json!({
            "game_id": 9,
            "phase": "play",
            "players": { "black": { "id": 1 }, "white": { "id": 2 } },
            "moves": ["dp", [15, 3, 10], "..", "dd"],
            "width": 19,
            "handicap": 2,
            "free_handicap_placement": true,
            "komi": 0.5
        }))
        .unwrap();

        let lines = setup_commands(&snapshot).commands;
        assert_eq!(
            lines,
            vec![
                "boardsize 19",
                "clear_board",
                "komi 0.5",
                "play black D4",
                "play black Q16",
                "play white pass",
                "play black D16",
            ]
        );
    }

    #[test]
    fn setup_places_fixed_handicap() {
        let snapshot: MatchSnapshot = serde_json::from_value(json!({
            "game_id": 9,
            "phase": "play",
            "players": { "black": { "id": 1 }, "white": { "id": 2 } },
            "moves": ["cc"],
            "width": 9,
            "handicap": 2
        }))
        .unwrap();

        let lines = setup_commands(&snapshot).commands;
        assert_eq!(
            lines,
            vec!["boardsize 9", "clear_board", "fixed_handicap 2", "play white C7"]
        );
    }

    #[test]
    fn setup_skips_undecodable_moves() {
        let snapshot: MatchSnapshot = serde_json::from_value(json!({
            "game_id": 9,
            "phase": "play",
            "players": { "black": { "id": 1 }, "white": { "id": 2 } },
            "moves": ["cc", "zz", "gg"],
            "width": 9
        }))
        .unwrap();

        let setup = setup_commands(&snapshot);
        assert_eq!(
            setup.commands,
            vec!["boardsize 9", "clear_board", "play black C7", "play black G3"]
        );
        assert_eq!(setup.skipped, vec![1]);
    }
}
