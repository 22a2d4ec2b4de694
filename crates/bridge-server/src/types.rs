//! Shared types for the bridge runtime.
//!
//! This module defines:
//! - `SessionEvent`: everything a session reacts to
//! - `RequestTicket`: identifies one engine request
//! - channel aliases between the transport, sessions and engines

use std::collections::HashMap;
use std::sync::Arc;

use bridge_core::{Clock, MatchId, MatchSnapshot, Move, Phase};
use bridge_protocol::{MoveNotification, OutboundCommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::engine::EngineError;

/// Identifies one move request to an engine.
///
/// Unique per session; a reply carrying a ticket other than the one in
/// flight is stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTicket(pub u64);

/// Input to a session's event loop.
#[derive(Debug)]
pub enum SessionEvent {
    Gamedata(Box<MatchSnapshot>),
    Move(MoveNotification),
    Clock(Clock),
    Phase(Phase),
    UndoRequested(Value),

    /// Answer to a move request.
    EngineReply {
        ticket: RequestTicket,
        result: Result<Vec<Move>, EngineError>,
    },

    /// No snapshot arrived after connecting.
    ConnectTimeout,

    /// Grace period after game over has elapsed.
    DisconnectGrace,

    /// Leave the match.
    Disconnect,
}

/// Channel into one session.
pub type SessionTx = mpsc::UnboundedSender<SessionEvent>;
pub type SessionRx = mpsc::UnboundedReceiver<SessionEvent>;

/// Commands from sessions to the transport writer.
pub type OutboundTx = mpsc::UnboundedSender<OutboundCommand>;
pub type OutboundRx = mpsc::UnboundedReceiver<OutboundCommand>;

/// Registry of live sessions and their inboxes.
pub type SessionRegistry = Arc<RwLock<HashMap<MatchId, SessionTx>>>;
