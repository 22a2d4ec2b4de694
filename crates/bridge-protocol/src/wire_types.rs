//! Transport frames exchanged with the game server.
//!
//! Each frame is one JSON object per line.
//!
//! ```text
//! Inbound (server → bridge)
//! -------------------------
//! {"event": "active_game",             "data": {"id": 7, "phase": "play"}}
//! {"event": "game/7/gamedata",         "data": <MatchSnapshot>}
//! {"event": "game/7/move",             "data": {"move_number": 12, "move": "dd"}}
//! {"event": "game/7/clock",            "data": <Clock>}
//! {"event": "game/7/phase",            "data": "play"}
//! {"event": "game/7/undo_requested",   "data": 11}
//!
//! Outbound (bridge → server)
//! --------------------------
//! {"command": "game/connect",    "data": {"game_id": 7, ...auth}}
//! {"command": "game/disconnect", "data": {"game_id": 7, ...auth}}
//! {"command": "game/move",       "data": {"game_id": 7, "move": "dd", ...auth}}
//! {"command": "game/resign",     "data": {"game_id": 7, ...auth}}
//! {"command": "game/resume",     "data": {"game_id": 7, "player_id": 1, ...auth}}
//! {"command": "game/chat",       "data": {"game_id": 7, "player_id": 1, "body": "..",
//!                                         "move_number": 3, "type": "discussion",
//!                                         "username": "bot", ...auth}}
//! ```
//!
//! `...auth` is the [`Auth`] record merged into every outbound `data`.

use bridge_core::{Clock, MatchId, MatchSnapshot, Phase, PlayerId, WireMove};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Event name this bridge does not handle.
    #[error("unhandled event {0:?}")]
    UnknownEvent(String),

    /// `game/<id>/...` with a non-numeric id.
    #[error("bad match id in event {0:?}")]
    BadMatchId(String),

    /// Outbound command did not serialize to `{"command", "data": {..}}`.
    #[error("outbound command is not an object")]
    NotAnObject,
}

/// Raw inbound frame before the event name is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Announcement that the bot is seated in a match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActiveGame {
    pub id: MatchId,
    #[serde(default)]
    pub phase: Option<Phase>,
}

/// A single move played in a match.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MoveNotification {
    /// 1-based: equals the length of the move list including this move.
    pub move_number: u64,
    #[serde(rename = "move")]
    pub mv: WireMove,
}

/// Events scoped to one match.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Gamedata(Box<MatchSnapshot>),
    Move(MoveNotification),
    Clock(Clock),
    Phase(Phase),
    UndoRequested(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ActiveGame(ActiveGame),
    Game { match_id: MatchId, event: GameEvent },
}

/// Parse one inbound line.
pub fn decode_inbound_line(line: &str) -> Result<InboundEvent, WireError> {
    let frame: InboundFrame = serde_json::from_str(line)?;
    decode_inbound(frame)
}

/// Interpret a raw frame by its event name.
pub fn decode_inbound(frame: InboundFrame) -> Result<InboundEvent, WireError> {
    let InboundFrame { event, data } = frame;

    if event == "active_game" {
        return Ok(InboundEvent::ActiveGame(serde_json::from_value(data)?));
    }

    let mut parts = event.splitn(3, '/');
    let (Some("game"), Some(id), Some(kind)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(WireError::UnknownEvent(event.clone()));
    };
    let match_id: MatchId = id
        .parse()
        .map_err(|_| WireError::BadMatchId(event.clone()))?;

    let event = match kind {
        "gamedata" => GameEvent::Gamedata(Box::new(serde_json::from_value(data)?)),
        "move" => GameEvent::Move(serde_json::from_value(data)?),
        "clock" => GameEvent::Clock(serde_json::from_value(data)?),
        "phase" => GameEvent::Phase(serde_json::from_value(data)?),
        "undo_requested" => GameEvent::UndoRequested(data),
        _ => return Err(WireError::UnknownEvent(event.clone())),
    };

    Ok(InboundEvent::Game { match_id, event })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatCategory {
    Discussion,
    Malkovich,
    Main,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub game_id: MatchId,
    pub player_id: PlayerId,
    pub body: String,
    pub move_number: usize,
    #[serde(rename = "type")]
    pub category: ChatCategory,
    pub username: String,
}

/// Commands the bridge sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", content = "data")]
pub enum OutboundCommand {
    #[serde(rename = "game/connect")]
    Connect { game_id: MatchId },

    #[serde(rename = "game/disconnect")]
    Disconnect { game_id: MatchId },

    #[serde(rename = "game/move")]
    Move {
        game_id: MatchId,
        #[serde(rename = "move")]
        encoded: String,
    },

    #[serde(rename = "game/resign")]
    Resign { game_id: MatchId },

    #[serde(rename = "game/resume")]
    Resume { game_id: MatchId, player_id: PlayerId },

    #[serde(rename = "game/chat")]
    Chat(ChatMessage),
}

impl OutboundCommand {
    pub fn match_id(&self) -> MatchId {
        match self {
            OutboundCommand::Connect { game_id }
            | OutboundCommand::Disconnect { game_id }
            | OutboundCommand::Move { game_id, .. }
            | OutboundCommand::Resign { game_id }
            | OutboundCommand::Resume { game_id, .. } => *game_id,
            OutboundCommand::Chat(chat) => chat.game_id,
        }
    }
}

/// Credentials attached to every outbound command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Auth {
    pub player_id: PlayerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apikey: Option<String>,
}

/// Serialize a command as one line (without the trailing newline).
pub fn encode_outbound(cmd: &OutboundCommand, auth: &Auth) -> Result<String, WireError> {
    let mut frame = serde_json::to_value(cmd)?;
    let Value::Object(auth_fields) = serde_json::to_value(auth)? else {
        return Err(WireError::NotAnObject);
    };

    let data = frame
        .get_mut("data")
        .and_then(Value::as_object_mut)
        .ok_or(WireError::NotAnObject)?;
    for (key, value) in auth_fields {
        data.entry(key).or_insert(value);
    }

    Ok(serde_json::to_string(&frame)?)
}
