//! Transport adapter and top-level wiring.
//!
//! This module:
//! - Connects to the game server's JSON-lines endpoint.
//! - Spawns a writer task that serializes `OutboundCommand`s with auth.
//! - Reads inbound frames and routes them:
//!   - `active_game` creates a session (or disconnects a finished one),
//!   - `game/<id>/...` events go to that match's session inbox.
//! - Disconnects every session on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge_core::{MatchId, Phase, Throttle};
use bridge_protocol::{
    decode_inbound_line, encode_outbound, Auth, GameEvent, InboundEvent, WireError,
};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::EngineFactory;
use crate::gtp_engine::GtpEngineFactory;
use crate::session::{run_session, Session, SessionContext};
use crate::types::{OutboundRx, SessionEvent, SessionRegistry};

const SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

/// Longest inbound line accepted. Longer frames are dropped whole.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Connect to the configured server and bridge matches until the
/// connection closes or Ctrl-C is pressed.
pub async fn run(config: Config) -> Result<()> {
    let factory: Arc<dyn EngineFactory> = Arc::new(GtpEngineFactory::from_config(&config));
    run_with_factory(config, factory).await
}

pub async fn run_with_factory(config: Config, factory: Arc<dyn EngineFactory>) -> Result<()> {
    let stream = TcpStream::connect(&config.server_addr)
        .await
        .with_context(|| format!("connecting to {}", config.server_addr))?;
    stream.set_nodelay(true)?;
    info!("Connected to {}", config.server_addr);

    let (read_half, write_half) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(write_outbound(write_half, out_rx, config.auth()));

    let ctx = SessionContext {
        config: Arc::new(config),
        throttle: Arc::new(Throttle::new()),
        factory,
        outbound: out_tx,
    };
    let registry: SessionRegistry = Arc::new(tokio::sync::RwLock::new(Default::default()));

    let result = tokio::select! {
        res = read_inbound(read_half, ctx.clone(), registry.clone()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, disconnecting from all games");
            Ok(())
        }
    };

    disconnect_all(&registry).await;

    // The writer drains once every sender is gone.
    drop(ctx);
    wait_for_sessions(&registry).await;
    match tokio::time::timeout(SHUTDOWN_WAIT, writer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!("writer failed: {:#}", err),
        Ok(Err(err)) => warn!("writer task ended abnormally: {}", err),
        Err(_) => warn!("writer did not drain before shutdown"),
    }

    result
}

/// Serialize outbound commands as JSON lines.
pub async fn write_outbound<W>(mut writer: W, mut out_rx: OutboundRx, auth: Auth) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = out_rx.recv().await {
        let line = match encode_outbound(&cmd, &auth) {
            Ok(line) => line,
            Err(err) => {
                error!("cannot encode {:?}: {}", cmd, err);
                continue;
            }
        };
        debug!(game = cmd.match_id(), "send {}", line);

        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Read JSON lines and route them until EOF.
pub async fn read_inbound<R>(mut reader: R, ctx: SessionContext, registry: SessionRegistry) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(64 * 1024);
    // Set while the rest of an oversized line is being skipped.
    let mut skipping = false;

    loop {
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line = buffer.split_to(pos + 1);
            if skipping {
                skipping = false;
                continue;
            }
            if line.len() > MAX_FRAME_LEN {
                warn!("dropping {} byte frame", line.len());
                continue;
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                route_line(text, &ctx, &registry).await;
            }
        }

        if buffer.len() > MAX_FRAME_LEN {
            if !skipping {
                warn!("dropping frame longer than {} bytes", MAX_FRAME_LEN);
            }
            buffer.clear();
            skipping = true;
        }

        if reader.read_buf(&mut buffer).await? == 0 {
            if buffer.has_remaining() {
                debug!("discarding {} bytes of partial frame", buffer.remaining());
            }
            info!("Server closed the connection");
            return Ok(());
        }
    }
}

async fn route_line(line: &str, ctx: &SessionContext, registry: &SessionRegistry) {
    match decode_inbound_line(line) {
        Ok(InboundEvent::ActiveGame(game)) => {
            if game.phase == Some(Phase::Finished) {
                debug!(game = game.id, "active_game reports finished match");
                send_to_session(registry, game.id, SessionEvent::Disconnect).await;
            } else {
                connect_to_game(game.id, ctx.clone(), registry).await;
            }
        }
        Ok(InboundEvent::Game { match_id, event }) => {
            let event = match event {
                GameEvent::Gamedata(snapshot) => SessionEvent::Gamedata(snapshot),
                GameEvent::Move(mv) => SessionEvent::Move(mv),
                GameEvent::Clock(clock) => SessionEvent::Clock(clock),
                GameEvent::Phase(phase) => SessionEvent::Phase(phase),
                GameEvent::UndoRequested(data) => SessionEvent::UndoRequested(data),
            };
            send_to_session(registry, match_id, event).await;
        }
        Err(WireError::UnknownEvent(name)) => debug!("ignoring event {}", name),
        Err(err) => warn!("skipping malformed frame: {}", err),
    }
}

/// Create and start a session unless one is already live for this match.
pub async fn connect_to_game(match_id: MatchId, ctx: SessionContext, registry: &SessionRegistry) {
    let mut guard = registry.write().await;
    if guard.get(&match_id).map_or(false, |tx| !tx.is_closed()) {
        return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = Session::new(match_id, ctx, tx.clone());
    session.connect();
    guard.insert(match_id, tx);
    drop(guard);

    tokio::spawn(run_session(session, rx, Arc::clone(registry)));
}

async fn send_to_session(registry: &SessionRegistry, match_id: MatchId, event: SessionEvent) {
    let guard = registry.read().await;
    match guard.get(&match_id) {
        Some(tx) => {
            if tx.send(event).is_err() {
                debug!(game = match_id, "session already gone");
            }
        }
        None => debug!(game = match_id, "no session for event"),
    }
}

/// Ask every live session to leave its match.
pub async fn disconnect_all(registry: &SessionRegistry) {
    let guard = registry.read().await;
    for (match_id, tx) in guard.iter() {
        if tx.send(SessionEvent::Disconnect).is_err() {
            debug!(game = match_id, "session already gone");
        }
    }
}

async fn wait_for_sessions(registry: &SessionRegistry) {
    let poll = Duration::from_millis(20);
    for _ in 0..(SHUTDOWN_WAIT.as_millis() / poll.as_millis()) {
        if registry.read().await.is_empty() {
            return;
        }
        tokio::time::sleep(poll).await;
    }
    warn!("some sessions did not finish before shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, EngineProcess};
    use crate::types::SessionTx;
    use bridge_protocol::OutboundCommand;
    use serde_json::{json, Value};
    use tokio::io::AsyncReadExt;

    struct NoEngine;

    impl EngineFactory for NoEngine {
        fn spawn(&self, _: MatchId, _: SessionTx) -> Result<Box<dyn EngineProcess>, EngineError> {
            Err(EngineError::Closed)
        }
    }

    #[tokio::test]
    async fn writer_emits_json_lines_with_auth() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_outbound(client, rx, Auth { player_id: 5, apikey: None }));

        tx.send(OutboundCommand::Connect { game_id: 9 }).unwrap();
        tx.send(OutboundCommand::Resign { game_id: 9 }).unwrap();
        drop(tx);
        writer.await.unwrap().unwrap();

        let mut text = String::new();
        server.read_to_string(&mut text).await.unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                json!({ "command": "game/connect", "data": { "game_id": 9, "player_id": 5 } }),
                json!({ "command": "game/resign", "data": { "game_id": 9, "player_id": 5 } }),
            ]
        );
    }

    #[tokio::test]
    async fn reader_starts_sessions_and_skips_garbage() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            config: Arc::new(Config::default()),
            throttle: Arc::new(Throttle::new()),
            factory: Arc::new(NoEngine),
            outbound: out_tx,
        };
        let registry: SessionRegistry = Arc::new(tokio::sync::RwLock::new(Default::default()));

        let input = concat!(
            "{\"event\":\"active_game\",\"data\":{\"id\":9,\"phase\":\"play\"}}\n",
            "not json\n",
            "\n",
            "{\"event\":\"game/9/reset-chats\",\"data\":{}}\n",
            "{\"event\":\"game/11/move\",\"data\":{\"move_number\":1,\"move\":\"dd\"}}",
        );
        read_inbound(input.as_bytes(), ctx, registry.clone()).await.unwrap();

        assert!(registry.read().await.contains_key(&9));
        assert!(!registry.read().await.contains_key(&11));
        assert_eq!(out_rx.recv().await, Some(OutboundCommand::Connect { game_id: 9 }));
    }

    #[tokio::test]
    async fn reader_drops_oversized_frames() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            config: Arc::new(Config::default()),
            throttle: Arc::new(Throttle::new()),
            factory: Arc::new(NoEngine),
            outbound: out_tx,
        };
        let registry: SessionRegistry = Arc::new(tokio::sync::RwLock::new(Default::default()));

        // An active_game frame padded past the limit, then a normal one.
        let mut input = String::from("{\"event\":\"active_game\",\"data\":{\"id\":4,\"phase\":\"play\"}}");
        input.push_str(&" ".repeat(MAX_FRAME_LEN * 2));
        input.push('\n');
        input.push_str("{\"event\":\"active_game\",\"data\":{\"id\":5,\"phase\":\"play\"}}\n");

        read_inbound(input.as_bytes(), ctx, registry.clone()).await.unwrap();

        let guard = registry.read().await;
        assert!(!guard.contains_key(&4));
        assert!(guard.contains_key(&5));
    }
}
