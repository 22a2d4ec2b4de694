//! Engine process abstraction.
//!
//! A session talks to its engine only through [`EngineProcess`], and
//! creates one only through an [`EngineFactory`], so tests can swap
//! the GTP subprocess for a scripted stand-in.

use bridge_core::{Color, MatchId, MatchSnapshot, Move};
use bridge_protocol::{EngineCommand, GtpError};
use thiserror::Error;

use crate::types::{RequestTicket, SessionTx};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine answered `? ...`.
    #[error("engine rejected command: {0}")]
    Rejected(String),

    #[error(transparent)]
    Gtp(#[from] GtpError),

    #[error("engine exited")]
    Exited,

    /// The engine was killed or its driver stopped.
    #[error("engine is closed")]
    Closed,
}

/// One running engine owned by a session.
///
/// Commands are queued and executed in order. Only
/// [`request_moves`](EngineProcess::request_moves) produces a result,
/// delivered to the session inbox as
/// [`SessionEvent::EngineReply`](crate::types::SessionEvent::EngineReply).
pub trait EngineProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// True once the process has exited or its pipes have closed.
    fn is_dead(&mut self) -> bool;

    /// True if the engine misbehaved (I/O failure, unexpected exit).
    fn has_failed(&self) -> bool;

    /// Bring the engine to the mirrored position.
    fn load_state(&mut self, snapshot: &MatchSnapshot) -> Result<(), EngineError>;

    /// Forward a move played by `color`.
    fn send_move(&mut self, mv: Move, height: u32, color: Color) -> Result<(), EngineError>;

    /// Ask for moves; the answer arrives tagged with `ticket`.
    fn request_moves(
        &mut self,
        ticket: RequestTicket,
        command: EngineCommand,
    ) -> Result<(), EngineError>;

    /// Tell the engine the match is over.
    fn game_over(&mut self);

    /// Terminate the process. Outstanding requests are not answered.
    fn kill(&mut self);
}

/// Creates engine processes for sessions.
pub trait EngineFactory: Send + Sync {
    /// Spawn an engine for `match_id` that answers into `replies`.
    fn spawn(
        &self,
        match_id: MatchId,
        replies: SessionTx,
    ) -> Result<Box<dyn EngineProcess>, EngineError>;
}
