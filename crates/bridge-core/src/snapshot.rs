//! Local mirror of the authoritative match record.
//!
//! A [`MatchSnapshot`] is replaced wholesale whenever the server sends a
//! full `gamedata` packet and patched in place by the smaller `move`,
//! `clock` and `phase` events. Field names follow the server's JSON so
//! the transport layer can deserialize straight into these types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::color::Color;

/// Server-side match identifier.
pub type MatchId = u64;

/// Server-side player identifier.
pub type PlayerId = u64;

/// Match phase as reported by the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "stone removal")]
    StoneRemoval,
    #[serde(rename = "finished")]
    Finished,
    #[serde(other)]
    Other,
}

/// Time-control cadence. Only `Correspondence` changes bridge behavior.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Blitz,
    Rapid,
    #[default]
    Live,
    Correspondence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    pub black: Player,
    pub white: Player,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    #[serde(default)]
    pub speed: Speed,
}

/// Pause sub-record of a clock.
///
/// `pause_control` is keyed by the reason a pause is in effect
/// (`"paused"`, `"system"`, `"weekend"`, `"stone-removal"`,
/// `"vacation-<player id>"`); only the keys matter to the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pause {
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pause_control: Option<BTreeMap<String, Value>>,
}

impl Pause {
    /// True for pauses the bridge must never lift: administrative,
    /// stone-removal, weekend and either player's vacation.
    pub fn is_protected(&self, black_id: Option<PlayerId>, white_id: Option<PlayerId>) -> bool {
        let Some(control) = &self.pause_control else {
            return false;
        };

        if ["stone-removal", "system", "weekend"]
            .iter()
            .any(|key| control.contains_key(*key))
        {
            return true;
        }

        [black_id, white_id]
            .into_iter()
            .flatten()
            .any(|id| control.contains_key(&format!("vacation-{}", id)))
    }
}

/// Clock record. Timing fields the bridge does not interpret are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    #[serde(default)]
    pub current_player: Option<PlayerId>,
    #[serde(default)]
    pub black_player_id: Option<PlayerId>,
    #[serde(default)]
    pub white_player_id: Option<PlayerId>,
    #[serde(default)]
    pub pause: Option<Pause>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Clock {
    /// The active pause, if the clock is paused with a `pause_control`
    /// record attached.
    pub fn active_pause(&self) -> Option<&Pause> {
        self.pause
            .as_ref()
            .filter(|p| p.paused && p.pause_control.is_some())
    }
}

/// A move as it appears on the wire: either the two-letter encoding
/// (`"dd"`, `".."`) or a coordinate array `[x, y, time, ...]` with
/// `-1` coordinates for a pass.
///
/// Kept raw in the mirror so a move that fails to decode still counts
/// towards the move number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMove {
    Encoded(String),
    Coords(Vec<Value>),
}

/// Full match record mirrored from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub game_id: MatchId,
    pub phase: Phase,
    pub players: Players,
    #[serde(default)]
    pub moves: Vec<WireMove>,
    pub width: u32,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub handicap: u32,
    #[serde(default)]
    pub free_handicap_placement: bool,
    #[serde(default)]
    pub ranked: bool,
    #[serde(default)]
    pub komi: Option<f64>,
    /// Color of the first recorded move; forked games may start with white.
    #[serde(default)]
    pub initial_player: Option<Color>,
    #[serde(default)]
    pub clock: Clock,
    #[serde(default)]
    pub time_control: TimeControl,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub winner: Option<PlayerId>,
}

impl MatchSnapshot {
    pub fn move_count(&self) -> usize {
        self.moves.len()
    }

    /// Board height; the server omits it for square boards.
    pub fn board_height(&self) -> u32 {
        self.height.unwrap_or(self.width)
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn is_slow_paced(&self) -> bool {
        self.time_control.speed == Speed::Correspondence
    }

    /// Color played by `player`, if they are seated in this match.
    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        if self.players.black.id == player {
            Some(Color::Black)
        } else if self.players.white.id == player {
            Some(Color::White)
        } else {
            None
        }
    }

    pub fn player(&self, color: Color) -> &Player {
        match color {
            Color::Black => &self.players.black,
            Color::White => &self.players.white,
        }
    }

    /// Semantic comparison against a fresher snapshot.
    ///
    /// Clock timing and pause bookkeeping change constantly and do not
    /// invalidate what an engine was given, so only the fields that
    /// feed the engine's position or the turn logic are compared.
    pub fn diverges_from(&self, fresh: &MatchSnapshot) -> bool {
        self.game_id != fresh.game_id
            || self.phase != fresh.phase
            || self.players != fresh.players
            || self.moves != fresh.moves
            || self.width != fresh.width
            || self.board_height() != fresh.board_height()
            || self.handicap != fresh.handicap
            || self.free_handicap_placement != fresh.free_handicap_placement
            || self.ranked != fresh.ranked
            || self.komi != fresh.komi
            || self.initial_player != fresh.initial_player
            || self.time_control != fresh.time_control
            || self.clock.current_player != fresh.clock.current_player
    }

    /// One-line match description: our color, the opponent, board size
    /// and handicap, e.g. `"  B alice  [19x19]  H3"`.
    pub fn header(&self, bot_id: PlayerId) -> String {
        let (color, opponent) = if self.players.black.id == bot_id {
            ("  B", &self.players.white)
        } else {
            ("W  ", &self.players.black)
        };
        let handicap = if self.handicap > 0 {
            format!("H{}", self.handicap)
        } else {
            "  ".to_string()
        };
        format!(
            "{} {}  [{}x{}]  {}",
            color,
            opponent.username,
            self.width,
            self.board_height(),
            handicap
        )
    }

    /// Result line for a finished match, e.g. `"B+R      W"` when black
    /// (the bot) won by resignation. `None` until the server reports an
    /// outcome.
    pub fn result_summary(&self, bot_id: PlayerId) -> Option<String> {
        let outcome = self.outcome.as_deref()?;
        let winner_color = if self.winner == Some(self.players.black.id) {
            Color::Black
        } else {
            Color::White
        };
        let win_loss = if self.winner == Some(bot_id) { "W" } else { "   L" };
        Some(format!(
            "{}+{:<5}  {}",
            winner_color.as_char(),
            abbreviate_outcome(outcome),
            win_loss
        ))
    }
}

/// Shorten a server outcome string for the result log line.
///
/// `"resignation"` → `R`, `"cancellation"` → `Can`, `"timeout"` →
/// `Time`, `"7.5 points"` → `7.5`; anything else is capitalized.
pub fn abbreviate_outcome(outcome: &str) -> String {
    if let Some(points) = outcome.strip_suffix(" points") {
        return points.to_string();
    }

    let mut chars = outcome.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };

    match capitalized.as_str() {
        "Resignation" => "R".to_string(),
        "Cancellation" => "Can".to_string(),
        "Timeout" => "Time".to_string(),
        _ => capitalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> MatchSnapshot {
        serde_json::from_value(json!({
            "game_id": 7,
            "phase": "play",
            "players": {
                "black": { "id": 1, "username": "bot" },
                "white": { "id": 2, "username": "alice" }
            },
            "moves": [[3, 3, 1200.5], "pp"],
            "width": 19,
            "handicap": 2,
            "clock": { "current_player": 1, "last_move": 1700000000 },
            "time_control": { "speed": "correspondence" }
        }))
        .expect("valid snapshot")
    }

    #[test]
    fn deserializes_server_record() {
        let s = snapshot();
        assert_eq!(s.move_count(), 2);
        assert_eq!(s.board_height(), 19);
        assert!(s.is_slow_paced());
        assert_eq!(s.color_of(2), Some(Color::White));
        assert_eq!(s.color_of(3), None);
        assert!(s.clock.extra.contains_key("last_move"));
    }

    #[test]
    fn clock_timing_does_not_diverge() {
        let a = snapshot();
        let mut b = a.clone();
        b.clock
            .extra
            .insert("last_move".to_string(), json!(1700000099));
        assert!(!a.diverges_from(&b));

        b.moves.push(WireMove::Encoded("dd".to_string()));
        assert!(a.diverges_from(&b));
    }

    #[test]
    fn current_player_change_diverges() {
        let a = snapshot();
        let mut b = a.clone();
        b.clock.current_player = Some(2);
        assert!(a.diverges_from(&b));
    }

    #[test]
    fn protected_pauses() {
        let mut control = BTreeMap::new();
        control.insert("vacation-2".to_string(), json!(true));
        let pause = Pause {
            paused: true,
            pause_control: Some(control),
        };
        assert!(pause.is_protected(Some(1), Some(2)));
        assert!(!pause.is_protected(Some(1), Some(3)));

        let mut control = BTreeMap::new();
        control.insert("paused".to_string(), json!({ "pausing_player_id": 2 }));
        let pause = Pause {
            paused: true,
            pause_control: Some(control),
        };
        assert!(!pause.is_protected(Some(1), Some(2)));
    }

    #[test]
    fn outcome_abbreviations() {
        assert_eq!(abbreviate_outcome("resignation"), "R");
        assert_eq!(abbreviate_outcome("Cancellation"), "Can");
        assert_eq!(abbreviate_outcome("timeout"), "Time");
        assert_eq!(abbreviate_outcome("7.5 points"), "7.5");
        assert_eq!(abbreviate_outcome("disconnection"), "Disconnection");
    }

    #[test]
    fn header_and_result_lines() {
        let mut s = snapshot();
        assert_eq!(s.header(1), "  B alice  [19x19]  H2");

        s.outcome = Some("resignation".to_string());
        s.winner = Some(1);
        assert_eq!(s.result_summary(1).as_deref(), Some("B+R      W"));
        assert_eq!(s.result_summary(2).as_deref(), Some("B+R         L"));
    }
}
