//! bridge-protocol
//!
//! Text encodings the bridge speaks on either side:
//!
//! - [`move_codec`] : two-letter move encoding used by the game server
//! - [`gtp_codec`]  : GTP commands and responses for the engine process
//! - [`wire_types`] : JSON frames exchanged with the game server

pub mod move_codec;
pub mod gtp_codec;
pub mod wire_types;

pub use move_codec::{decode_wire_move, encode_move, CodecError, PASS_ENCODING};

pub use gtp_codec::{EngineCommand, GtpError, GtpResponse};

pub use wire_types::{
    decode_inbound_line,
    encode_outbound,
    ActiveGame,
    Auth,
    ChatCategory,
    ChatMessage,
    GameEvent,
    InboundEvent,
    MoveNotification,
    OutboundCommand,
    WireError,
};
