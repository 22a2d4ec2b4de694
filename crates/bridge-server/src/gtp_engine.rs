//! GTP engine subprocess.
//!
//! The child's stdin and stdout are owned by a driver task that runs
//! queued commands one at a time, reading each response block up to
//! the terminating blank line. Move requests are answered into the
//! owning session's inbox; everything else is fire-and-forget, with
//! rejections logged.
//!
//! When the pipes break the driver marks the engine dead and failed,
//! answers any queued move requests with an error and stops.
//!
//! Killing an engine that was sent `quit` leaves it [`QUIT_GRACE`] to
//! exit by itself before the process is killed.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{Color, MatchId, MatchSnapshot, Move};
use bridge_protocol::gtp_codec::{parse_moves, parse_response, play_line, setup_commands};
use bridge_protocol::{EngineCommand, GtpResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::{EngineError, EngineFactory, EngineProcess};
use crate::types::{RequestTicket, SessionEvent, SessionTx};

/// How long an engine that was sent `quit` may take to exit.
pub const QUIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct Flags {
    dead: AtomicBool,
    failed: AtomicBool,
}

impl Flags {
    fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    fn mark_dead(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
enum Reply {
    Ignore,
    Quit,
    Moves {
        ticket: RequestTicket,
        width: u32,
        height: u32,
    },
}

#[derive(Debug)]
struct Job {
    line: String,
    reply: Reply,
}

/// A running GTP engine.
pub struct GtpEngine {
    match_id: MatchId,
    /// Taken when the process is handed off to finish quitting.
    child: Option<Child>,
    pid: Option<u32>,
    jobs: mpsc::UnboundedSender<Job>,
    flags: Arc<Flags>,
    driver: Option<JoinHandle<()>>,
    quit_sent: bool,
    stderr: Option<JoinHandle<()>>,
    /// Board size of the loaded position, for decoding answers.
    board: (u32, u32),
}

impl GtpEngine {
    /// Start `command[0]` with the remaining elements as arguments.
    pub fn spawn(command: &[String], match_id: MatchId, replies: SessionTx) -> Result<Self, EngineError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            EngineError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no engine command configured",
            ))
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::Spawn)?;

        let broken = || EngineError::Spawn(io::Error::new(io::ErrorKind::BrokenPipe, "engine pipes unavailable"));
        let stdin = child.stdin.take().ok_or_else(broken)?;
        let stdout = child.stdout.take().ok_or_else(broken)?;

        let stderr = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(game = match_id, "engine: {}", line);
                }
            })
        });

        let flags = Arc::new(Flags::default());
        let (jobs, queue) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(
            stdin,
            BufReader::new(stdout),
            queue,
            replies,
            Arc::clone(&flags),
            match_id,
        ));

        Ok(GtpEngine {
            match_id,
            pid: child.id(),
            child: Some(child),
            jobs,
            flags,
            driver: Some(driver),
            quit_sent: false,
            stderr,
            board: (19, 19),
        })
    }

    fn enqueue(&self, line: String, reply: Reply) -> Result<(), EngineError> {
        self.jobs
            .send(Job { line, reply })
            .map_err(|_| EngineError::Closed)
    }
}

impl EngineProcess for GtpEngine {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_dead(&mut self) -> bool {
        if self.flags.dead.load(Ordering::SeqCst) {
            return true;
        }
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(game = self.match_id, "engine exited with {}", status);
                self.flags.mark_dead();
                if !status.success() {
                    self.flags.mark_failed();
                }
                true
            }
            Ok(None) => false,
            Err(_) => true,
        }
    }

    fn has_failed(&self) -> bool {
        self.flags.failed.load(Ordering::SeqCst)
    }

    fn load_state(&mut self, snapshot: &MatchSnapshot) -> Result<(), EngineError> {
        self.board = (snapshot.width, snapshot.board_height());
        let setup = setup_commands(snapshot);
        for index in &setup.skipped {
            warn!(game = self.match_id, "not replaying undecodable move {}", index);
        }
        for line in setup.commands {
            self.enqueue(line, Reply::Ignore)?;
        }
        Ok(())
    }

    fn send_move(&mut self, mv: Move, height: u32, color: Color) -> Result<(), EngineError> {
        self.enqueue(play_line(color, mv, height)?, Reply::Ignore)
    }

    fn request_moves(
        &mut self,
        ticket: RequestTicket,
        command: EngineCommand,
    ) -> Result<(), EngineError> {
        let (width, height) = self.board;
        self.enqueue(command.to_line(), Reply::Moves { ticket, width, height })
    }

    fn game_over(&mut self) {
        match self.enqueue("quit".to_string(), Reply::Quit) {
            Ok(()) => self.quit_sent = true,
            Err(_) => debug!(game = self.match_id, "engine already closed at game over"),
        }
    }

    fn kill(&mut self) {
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
        self.flags.mark_dead();

        let Some(mut child) = self.child.take() else {
            return;
        };

        if self.quit_sent && !self.driver.as_ref().map_or(true, JoinHandle::is_finished) {
            // The driver still has `quit` to deliver. It stops on its own
            // once the engine answers or the pipes close.
            self.driver = None;
            let match_id = self.match_id;
            tokio::spawn(async move {
                if tokio::time::timeout(QUIT_GRACE, child.wait()).await.is_err() {
                    debug!(game = match_id, "engine ignored quit, killing it");
                    if let Err(err) = child.start_kill() {
                        debug!(game = match_id, "kill: {}", err);
                    }
                }
            });
            return;
        }

        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Err(err) = child.start_kill() {
            debug!(game = self.match_id, "kill: {}", err);
        }
    }
}

impl Drop for GtpEngine {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }
}

async fn drive(
    mut stdin: ChildStdin,
    mut stdout: BufReader<ChildStdout>,
    mut queue: mpsc::UnboundedReceiver<Job>,
    replies: SessionTx,
    flags: Arc<Flags>,
    match_id: MatchId,
) {
    while let Some(job) = queue.recv().await {
        debug!(game = match_id, "gtp> {}", job.line);
        let outcome = exchange(&mut stdin, &mut stdout, &job.line).await;

        match (outcome, job.reply) {
            (outcome, Reply::Quit) => {
                if let Err(err) = outcome {
                    debug!(game = match_id, "engine closed while quitting: {}", err);
                }
                break;
            }
            (Ok(GtpResponse::Success(_)), Reply::Ignore) => {}
            (Ok(GtpResponse::Failure(text)), Reply::Ignore) => {
                warn!(game = match_id, "engine rejected {:?}: {}", job.line, text);
            }
            (Ok(response), Reply::Moves { ticket, width, height }) => {
                let result = match response {
                    GtpResponse::Success(text) => {
                        parse_moves(&text, width, height).map_err(EngineError::from)
                    }
                    GtpResponse::Failure(text) => Err(EngineError::Rejected(text)),
                };
                if result.is_err() {
                    flags.mark_failed();
                }
                let _ = replies.send(SessionEvent::EngineReply { ticket, result });
            }
            (Err(err), reply) => {
                warn!(game = match_id, "engine failed on {:?}: {}", job.line, err);
                flags.mark_failed();
                flags.mark_dead();
                if let Reply::Moves { ticket, .. } = reply {
                    let _ = replies.send(SessionEvent::EngineReply { ticket, result: Err(err) });
                }
                break;
            }
        }
    }

    // Answer whatever is still queued so no request waits forever.
    queue.close();
    while let Some(job) = queue.recv().await {
        if let Reply::Moves { ticket, .. } = job.reply {
            let _ = replies.send(SessionEvent::EngineReply {
                ticket,
                result: Err(EngineError::Closed),
            });
        }
    }
}

/// Send one command and read its response block.
async fn exchange(
    stdin: &mut ChildStdin,
    stdout: &mut BufReader<ChildStdout>,
    line: &str,
) -> Result<GtpResponse, EngineError> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;

    let mut block = String::new();
    loop {
        let mut buf = String::new();
        if stdout.read_line(&mut buf).await? == 0 {
            return Err(EngineError::Exited);
        }
        let text = buf.trim_end();
        if text.is_empty() {
            // Blank lines before a response are noise.
            if block.is_empty() {
                continue;
            }
            break;
        }
        block.push_str(text);
        block.push('\n');
    }

    Ok(parse_response(&block)?)
}

/// Spawns [`GtpEngine`]s from the configured command line.
#[derive(Debug, Clone)]
pub struct GtpEngineFactory {
    command: Vec<String>,
}

impl GtpEngineFactory {
    pub fn new(command: Vec<String>) -> Self {
        GtpEngineFactory { command }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.engine_command.clone())
    }
}

impl EngineFactory for GtpEngineFactory {
    fn spawn(
        &self,
        match_id: MatchId,
        replies: SessionTx,
    ) -> Result<Box<dyn EngineProcess>, EngineError> {
        Ok(Box::new(GtpEngine::spawn(&self.command, match_id, replies)?))
    }
}
