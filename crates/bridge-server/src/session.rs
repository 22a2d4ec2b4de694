//! Per-match session.
//!
//! A [`Session`] mirrors one match, decides when the bridge is to move
//! and drives the engine that produces the move. It is a plain state
//! machine: [`Session::handle`] runs one event to completion and emits
//! outbound commands on a channel. [`run_session`] feeds it from the
//! match inbox and from throttle release notifications.
//!
//! Engine answers and timers come back through the same inbox, so all
//! state changes for a match happen in arrival order on one task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::turn::{
    is_bot_to_move, is_opponent_move, is_placing_free_handicap, opponent_parity, owes_free_handicap,
    validate_handicap_stones,
};
use bridge_core::{
    Clock, Color, MatchId, MatchSnapshot, Move, Phase, Throttle, ThrottlePermit,
    MAX_ENGINE_FAILURES,
};
use bridge_protocol::gtp_codec::format_vertex;
use bridge_protocol::{
    decode_wire_move, encode_move, ChatCategory, ChatMessage, EngineCommand, MoveNotification,
    OutboundCommand,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::engine::{EngineError, EngineFactory, EngineProcess};
use crate::types::{
    OutboundTx, RequestTicket, SessionEvent, SessionRegistry, SessionRx, SessionTx,
};

/// How long to wait for a snapshot after connecting.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay between game over and leaving the match.
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

pub const CRASHED_TOO_OFTEN: &str = "Engine has crashed too many times, resigning game";
pub const FAILED_TO_START: &str =
    "Failed to start the engine, can not make a move, trying to restart";
pub const WAITING_FOR_HANDICAP: &str = "Waiting for opponent to place all handicap stones";
pub const BAD_HANDICAP: &str = "Engine returned invalid handicap stones, resigning game";

/// Everything sessions share.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub throttle: Arc<Throttle>,
    pub factory: Arc<dyn EngineFactory>,
    pub outbound: OutboundTx,
}

/// One-shot timer that posts an event to the session inbox.
/// Dropping the handle cancels it.
#[derive(Debug)]
struct ScheduledTask(JoinHandle<()>);

impl ScheduledTask {
    fn after(delay: Duration, inbox: SessionTx, event: SessionEvent) -> Self {
        ScheduledTask(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(event);
        }))
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// What a pending engine request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Move,
    FreeHandicap,
}

#[derive(Debug)]
struct InFlight {
    ticket: RequestTicket,
    purpose: Purpose,
    _permit: ThrottlePermit,
}

pub struct Session {
    match_id: MatchId,
    ctx: SessionContext,
    /// Sender side of our own inbox, handed to engines and timers.
    inbox: SessionTx,

    state: Option<MatchSnapshot>,
    engine: Option<Box<dyn EngineProcess>>,
    color: Color,
    opponent_parity: u8,

    greeted: bool,
    connected: bool,

    in_flight: Option<InFlight>,
    next_ticket: u64,
    engine_failures: u32,

    /// Stones from one `place_free_handicap` answer, uploaded one per move.
    handicap_queue: VecDeque<Move>,

    /// Move index we owe once the slow-paced throttle frees up.
    slow_move_pending: Option<usize>,

    connect_timeout: Option<ScheduledTask>,
    disconnect_grace: Option<ScheduledTask>,
}

impl Session {
    pub fn new(match_id: MatchId, ctx: SessionContext, inbox: SessionTx) -> Self {
        Session {
            match_id,
            ctx,
            inbox,
            state: None,
            engine: None,
            color: Color::Black,
            opponent_parity: 0,
            greeted: false,
            connected: true,
            in_flight: None,
            next_ticket: 0,
            engine_failures: 0,
            handicap_queue: VecDeque::new(),
            slow_move_pending: None,
            connect_timeout: None,
            disconnect_grace: None,
        }
    }

    /// Join the match and start waiting for its snapshot.
    pub fn connect(&mut self) {
        info!(moves = self.move_count(), "Connecting to game.");
        self.send(OutboundCommand::Connect { game_id: self.match_id });
        self.connect_timeout = Some(ScheduledTask::after(
            CONNECT_TIMEOUT,
            self.inbox.clone(),
            SessionEvent::ConnectTimeout,
        ));
    }

    pub fn handle(&mut self, event: SessionEvent) {
        if !self.connected {
            return;
        }

        match event {
            SessionEvent::Gamedata(snapshot) => self.on_gamedata(*snapshot),
            SessionEvent::Move(notification) => self.on_move(notification),
            SessionEvent::Clock(clock) => self.on_clock(clock),
            SessionEvent::Phase(phase) => self.on_phase(phase),
            SessionEvent::UndoRequested(data) => {
                info!(moves = self.move_count(), "Undo requested {}", data);
            }
            SessionEvent::EngineReply { ticket, result } => self.on_engine_reply(ticket, result),
            SessionEvent::ConnectTimeout => self.on_connect_timeout(),
            SessionEvent::DisconnectGrace | SessionEvent::Disconnect => self.disconnect(),
        }
    }

    // ------------------------------------------------------------------
    // Server events
    // ------------------------------------------------------------------

    fn on_gamedata(&mut self, snapshot: MatchSnapshot) {
        let bot_id = self.ctx.config.bot_id;
        self.connect_timeout = None;

        let prev_phase = self.state.as_ref().map(|s| s.phase);
        let diverged = self
            .state
            .as_ref()
            .map_or(false, |old| old.diverges_from(&snapshot));

        if diverged && self.engine.is_some() {
            info!(
                moves = self.move_count(),
                "Killing engine because the match record changed after it was started"
            );
            if self.ctx.config.debug {
                debug!(previous = ?self.state, fresh = ?snapshot, "match record changed");
            }
            self.ensure_engine_killed();
            self.cancel_in_flight();
        }

        self.color = snapshot.color_of(bot_id).unwrap_or(Color::White);
        self.opponent_parity = opponent_parity(&snapshot, self.color, bot_id);
        let header = snapshot.header(bot_id);
        self.state = Some(snapshot);
        info!(moves = self.move_count(), "gamedata     {}", header);

        // Connecting to an already finished match is not a game over.
        let finished_now = matches!(
            (prev_phase, self.phase()),
            (Some(prev), Some(Phase::Finished)) if prev != Phase::Finished
        );
        if finished_now {
            self.game_over();
        }

        let to_move = self
            .state
            .as_ref()
            .map_or(false, |s| is_bot_to_move(s, bot_id));
        if to_move {
            let expected = self.move_count();
            if self.must_wait_for_slow_slot() {
                self.slow_move_pending = Some(expected);
            } else if self.in_flight.is_none() {
                self.make_move(expected);
            }
        }
    }

    fn on_clock(&mut self, clock: Clock) {
        debug!(moves = self.move_count(), ?clock, "clock");

        let Some(state) = self.state.as_mut() else {
            debug!("clock update without a match record");
            return;
        };
        state.clock = clock;

        let lift = self.ctx.config.forbids_pause(state)
            && state.clock.active_pause().map_or(false, |pause| {
                !pause.is_protected(state.clock.black_player_id, state.clock.white_player_id)
            });
        if lift {
            info!(moves = self.move_count(), "Lifting pause");
            self.resume_game();
        }
    }

    fn on_phase(&mut self, phase: Phase) {
        info!(moves = self.move_count(), "phase {:?}", phase);

        let prev_phase = match self.state.as_mut() {
            Some(state) => Some(std::mem::replace(&mut state.phase, phase)),
            None => {
                debug!("phase update without a match record");
                None
            }
        };

        if phase == Phase::Play {
            self.schedule_retry();
        }

        if phase == Phase::Finished && prev_phase.map_or(false, |prev| prev != Phase::Finished) {
            self.game_over();
        }
    }

    fn on_move(&mut self, notification: MoveNotification) {
        debug!(moves = self.move_count(), ?notification, "move");

        let Some(state) = self.state.as_mut() else {
            warn!("move without a match record, reconnecting");
            self.send(OutboundCommand::Connect { game_id: self.match_id });
            return;
        };

        state.moves.push(notification.mv.clone());
        let moves_played = state.move_count();
        let height = state.board_height();

        let decoded = match decode_wire_move(&notification.mv, state.width, height) {
            Ok(mv) => Some(mv),
            Err(err) => {
                warn!(moves = moves_played, "undecodable move {:?}: {}", notification.mv, err);
                None
            }
        };

        let from_opponent = is_opponent_move(
            self.color,
            state.handicap,
            moves_played,
            notification.move_number,
            self.opponent_parity,
        );
        if from_opponent {
            if let Some(mv) = decoded {
                let vertex = format_vertex(mv, height).unwrap_or_else(|_| mv.to_string());
                info!(moves = moves_played, "Got     {}", vertex);
            }
        }

        if owes_free_handicap(state) {
            let remaining = state.handicap as usize - moves_played;
            match self.color {
                Color::Black => self.make_move(moves_played),
                Color::White => {
                    self.forward_to_engine(decoded);
                    debug!(moves = moves_played, "waiting for {} more handicap stones", remaining);
                    // Remind once.
                    if moves_played == 1 {
                        self.send_chat(WAITING_FOR_HANDICAP);
                    }
                }
            }
        } else if notification.move_number % 2 == u64::from(self.opponent_parity) {
            self.forward_to_engine(decoded);
            if self.must_wait_for_slow_slot() {
                self.slow_move_pending = Some(moves_played);
            } else {
                self.make_move(moves_played);
            }
        } else {
            debug!(moves = moves_played, "ignoring our own move {}", notification.move_number);
        }
    }

    fn on_connect_timeout(&mut self) {
        self.connect_timeout = None;
        if self.state.is_none() {
            info!("No gamedata after {:?}, requesting again", CONNECT_TIMEOUT);
            self.schedule_retry();
        }
    }

    /// Re-evaluate a deferred slow-paced move after a throttle release.
    pub fn on_throttle_released(&mut self) {
        let Some(expected) = self.slow_move_pending else {
            return;
        };
        if self.ctx.throttle.should_defer(true) {
            return;
        }

        self.slow_move_pending = None;
        if self.move_count() == expected && self.in_flight.is_none() {
            self.make_move(expected);
        }
    }

    // ------------------------------------------------------------------
    // Move production
    // ------------------------------------------------------------------

    /// Produce and upload the move at index `expected`. Does nothing if
    /// the mirror has moved on or the match is not in play. At most one
    /// engine request is in flight at a time.
    pub fn make_move(&mut self, expected: usize) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        if state.move_count() != expected {
            debug!(moves = state.move_count(), "stale move request for {}", expected);
            return;
        }
        if state.phase != Phase::Play {
            return;
        }
        if self.in_flight.is_some() {
            debug!(moves = expected, "engine request already in flight");
            return;
        }

        let handicap = state.handicap;
        let placing_handicap = is_placing_free_handicap(state);
        let greet = !self.greeted && expected < 2 + handicap as usize;

        if greet {
            if let Some(greeting) = self.ctx.config.greeting.clone() {
                self.send_chat(&greeting);
                self.greeted = true;
            }
        }

        if !placing_handicap {
            self.produce_moves(EngineCommand::Genmove(self.color), Purpose::Move);
            return;
        }

        if let Some(stone) = self.handicap_queue.pop_front() {
            self.upload_move(stone);
            return;
        }

        self.produce_moves(EngineCommand::PlaceFreeHandicap(handicap), Purpose::FreeHandicap);
    }

    fn produce_moves(&mut self, command: EngineCommand, purpose: Purpose) {
        let permit = if self.is_slow_paced() {
            match self.ctx.throttle.try_acquire_slow() {
                Some(permit) => permit,
                None => {
                    debug!(moves = self.move_count(), "slow-paced slot taken, deferring {}", command);
                    self.slow_move_pending = Some(self.move_count());
                    return;
                }
            }
        } else {
            self.ctx.throttle.acquire(false)
        };
        self.next_ticket += 1;
        let ticket = RequestTicket(self.next_ticket);
        self.in_flight = Some(InFlight {
            ticket,
            purpose,
            _permit: permit,
        });

        if !self.ensure_engine_started() {
            warn!(moves = self.move_count(), "{}", FAILED_TO_START);
            self.send_chat(FAILED_TO_START);
            self.on_engine_reply(ticket, Err(EngineError::Closed));
            return;
        }

        info!(moves = self.move_count(), "{}", command);
        let sent = match self.engine.as_mut() {
            Some(engine) => engine.request_moves(ticket, command),
            None => Err(EngineError::Closed),
        };
        if let Err(err) = sent {
            self.on_engine_reply(ticket, Err(err));
        }
    }

    fn on_engine_reply(&mut self, ticket: RequestTicket, result: Result<Vec<Move>, EngineError>) {
        if self.in_flight.as_ref().map(|f| f.ticket) != Some(ticket) {
            debug!(moves = self.move_count(), ?ticket, "dropping stale engine reply");
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        let purpose = in_flight.purpose;
        // Releases the throttle slot.
        drop(in_flight);
        self.slow_move_pending = None;

        let moves = match result {
            Ok(moves) => moves,
            Err(err) => {
                warn!(moves = self.move_count(), "engine request failed: {}", err);
                self.ensure_engine_killed();
                self.schedule_retry();
                return;
            }
        };

        match purpose {
            Purpose::Move => match moves.first() {
                Some(mv) => self.upload_move(*mv),
                None => {
                    warn!(moves = self.move_count(), "engine returned no move");
                    self.ensure_engine_killed();
                    self.schedule_retry();
                    return;
                }
            },
            Purpose::FreeHandicap => {
                if !self.store_handicap_stones(moves) {
                    return;
                }
            }
        }

        if !self.ctx.config.persist {
            self.ensure_engine_killed();
        }
    }

    /// Check a `place_free_handicap` answer and upload its first stone.
    /// Resigns and returns false if the answer is unusable.
    fn store_handicap_stones(&mut self, stones: Vec<Move>) -> bool {
        let Some(state) = self.state.as_ref() else {
            return false;
        };

        if let Err(err) =
            validate_handicap_stones(&stones, state.handicap, state.width, state.board_height())
        {
            warn!(moves = self.move_count(), "{}, resigning", err);
            self.ensure_engine_killed();
            self.send_chat(BAD_HANDICAP);
            self.upload_move(Move::Resign);
            return false;
        }

        self.handicap_queue = stones.into();
        if let Some(first) = self.handicap_queue.pop_front() {
            self.upload_move(first);
        }
        true
    }

    fn forward_to_engine(&mut self, mv: Option<Move>) {
        let (Some(mv), Some(engine)) = (mv, self.engine.as_mut()) else {
            return;
        };
        let height = self.state.as_ref().map_or(19, MatchSnapshot::board_height);
        if let Err(err) = engine.send_move(mv, height, self.color.opponent()) {
            warn!("could not forward move to engine: {}", err);
        }
    }

    fn upload_move(&mut self, mv: Move) {
        if mv.is_resign() {
            info!(moves = self.move_count(), "Resigning");
            self.send(OutboundCommand::Resign { game_id: self.match_id });
            return;
        }

        let height = self.state.as_ref().map_or(19, MatchSnapshot::board_height);
        let vertex = format_vertex(mv, height).unwrap_or_else(|_| mv.to_string());
        match encode_move(mv) {
            Ok(encoded) => {
                info!(moves = self.move_count(), "Playing {}", vertex);
                self.send(OutboundCommand::Move {
                    game_id: self.match_id,
                    encoded,
                });
            }
            Err(err) => {
                warn!(moves = self.move_count(), "cannot upload {}: {}", vertex, err);
                self.schedule_retry();
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine lifecycle
    // ------------------------------------------------------------------

    /// Make sure a live engine with the mirrored position is running.
    /// Resigns once the engine has failed too often.
    fn ensure_engine_started(&mut self) -> bool {
        if self.engine.as_mut().map_or(false, |engine| engine.is_dead()) {
            info!(moves = self.move_count(), "engine process is gone");
            self.ensure_engine_killed();
        }

        if self.engine.is_some() {
            return true;
        }

        if self.engine_failures >= MAX_ENGINE_FAILURES {
            warn!(moves = self.move_count(), "{}", CRASHED_TOO_OFTEN);
            self.send_chat(CRASHED_TOO_OFTEN);
            self.send(OutboundCommand::Resign { game_id: self.match_id });
            return false;
        }

        let mut engine = match self.ctx.factory.spawn(self.match_id, self.inbox.clone()) {
            Ok(engine) => engine,
            Err(err) => {
                self.engine_failures += 1;
                warn!(moves = self.move_count(), failures = self.engine_failures, "{}", err);
                return false;
            }
        };

        info!(
            moves = self.move_count(),
            "Starting new engine process [{}]",
            engine.pid().map_or_else(|| "?".to_string(), |pid| pid.to_string())
        );

        if let Some(state) = self.state.as_ref() {
            if let Err(err) = engine.load_state(state) {
                engine.kill();
                self.engine_failures += 1;
                warn!(
                    moves = self.move_count(),
                    failures = self.engine_failures,
                    "loading state into engine failed: {}",
                    err
                );
                return false;
            }
        }

        self.engine = Some(engine);
        true
    }

    /// Terminate the engine, counting a failure if it misbehaved.
    fn ensure_engine_killed(&mut self) {
        let Some(mut engine) = self.engine.take() else {
            return;
        };

        if engine.has_failed() {
            self.engine_failures += 1;
            info!(
                moves = self.move_count(),
                "Observed {} engine failures", self.engine_failures
            );
        }
        engine.kill();
    }

    /// Forget the pending request and give back its throttle slot.
    fn cancel_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            debug!(ticket = ?in_flight.ticket, "cancelled engine request");
        }
    }

    // ------------------------------------------------------------------
    // Match lifecycle
    // ------------------------------------------------------------------

    /// Runs once per match: farewell, result line, engine shutdown and
    /// a delayed disconnect.
    pub fn game_over(&mut self) {
        if self.disconnect_grace.is_some() {
            return;
        }

        if let Some(farewell) = self.ctx.config.farewell.clone() {
            if self.state.is_some() {
                self.send_chat(&farewell);
            }
        }

        let summary = self
            .state
            .as_ref()
            .and_then(|s| s.result_summary(self.ctx.config.bot_id));
        if let Some(summary) = summary {
            info!(moves = self.move_count(), "Game over.   Result: {}", summary);
        }

        if let Some(engine) = self.engine.as_mut() {
            engine.game_over();
        }
        self.ensure_engine_killed();
        self.cancel_in_flight();

        self.disconnect_grace = Some(ScheduledTask::after(
            DISCONNECT_GRACE,
            self.inbox.clone(),
            SessionEvent::DisconnectGrace,
        ));
    }

    /// Leave the match. The session ignores everything afterwards.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }

        self.cancel_in_flight();
        self.ensure_engine_killed();
        self.connect_timeout = None;

        info!(moves = self.move_count(), "Disconnecting from game.");
        self.send(OutboundCommand::Disconnect { game_id: self.match_id });
        self.connected = false;
    }

    /// Leave and rejoin so the server resends the full snapshot.
    fn schedule_retry(&mut self) {
        debug!(
            moves = self.move_count(),
            "unable to react correctly, reconnecting to trigger action from match state"
        );
        self.send(OutboundCommand::Disconnect { game_id: self.match_id });
        self.send(OutboundCommand::Connect { game_id: self.match_id });
    }

    fn resume_game(&mut self) {
        self.send(OutboundCommand::Resume {
            game_id: self.match_id,
            player_id: self.ctx.config.bot_id,
        });
    }

    fn send_chat(&mut self, body: &str) {
        if !self.connected {
            return;
        }
        let chat = ChatMessage {
            game_id: self.match_id,
            player_id: self.ctx.config.bot_id,
            body: body.to_string(),
            move_number: self.move_count(),
            category: ChatCategory::Discussion,
            username: self.ctx.config.username.clone(),
        };
        self.send(OutboundCommand::Chat(chat));
    }

    fn send(&self, cmd: OutboundCommand) {
        if self.ctx.outbound.send(cmd).is_err() {
            debug!(game = self.match_id, "transport closed, dropping command");
        }
    }

    // ------------------------------------------------------------------
    // Helpers and accessors
    // ------------------------------------------------------------------

    /// Only correspondence matches count against the slow-paced limit,
    /// and only with the correspondence queue enabled.
    fn is_slow_paced(&self) -> bool {
        self.ctx.config.corrqueue
            && self.state.as_ref().map_or(false, MatchSnapshot::is_slow_paced)
    }

    fn must_wait_for_slow_slot(&self) -> bool {
        self.is_slow_paced() && self.ctx.throttle.should_defer(true)
    }

    fn phase(&self) -> Option<Phase> {
        self.state.as_ref().map(|s| s.phase)
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub fn move_count(&self) -> usize {
        self.state.as_ref().map_or(0, MatchSnapshot::move_count)
    }

    pub fn snapshot(&self) -> Option<&MatchSnapshot> {
        self.state.as_ref()
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn opponent_parity(&self) -> u8 {
        self.opponent_parity
    }

    pub fn engine_failures(&self) -> u32 {
        self.engine_failures
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_awaiting_engine(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued_handicap_stones(&self) -> usize {
        self.handicap_queue.len()
    }

    pub fn has_pending_slow_move(&self) -> bool {
        self.slow_move_pending.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Drive a session until it disconnects, then drop it from the registry.
pub async fn run_session(mut session: Session, mut inbox: SessionRx, registry: SessionRegistry) {
    let match_id = session.match_id();
    let span = info_span!("game", id = match_id);

    async move {
        let mut released = session.ctx.throttle.subscribe();

        while session.is_connected() {
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => session.handle(event),
                    None => break,
                },
                changed = released.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    session.on_throttle_released();
                }
            }
        }

        let mut guard = registry.write().await;
        if guard
            .get(&match_id)
            .map_or(false, |tx| tx.same_channel(&session.inbox))
        {
            guard.remove(&match_id);
        }
        drop(guard);

        session.disconnect();
        debug!("session finished");
    }
    .instrument(span)
    .await
}
