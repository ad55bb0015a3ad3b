//! Worker process supervision and call dispatch.
//!
//! The [`Supervisor`] owns the worker lifecycle:
//! 1. Launch the worker lazily on the first call (or the first call after an exit)
//! 2. Spawn the stdin writer, stdout reader and stderr forwarder tasks
//! 3. Register each call, write it, await its correlated response
//! 4. On exit: fail every pending call, forget every session, clear the handle
//!
//! ```text
//!            first call              worker exits
//! Unstarted ───────────► Running ────────────────► Exited
//!                           ▲                        │
//!                           └──────── next call ─────┘
//! ```
//!
//! All mutable state sits behind one mutex that is never held across an
//! `.await`. Background tasks hold a `Weak` reference, so dropping the last
//! client handle closes the worker's stdin and kills it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::JsonLineCodec;
use crate::correlation::{PendingReceiver, PendingTable};
use crate::error::{Result, SimulatorError};
use crate::launcher::{BoxFuture, WorkerExit, WorkerLauncher, WorkerOutput};
use crate::protocol::{Call, LineBuffer, Request, Response, SessionId, DEFAULT_MAX_LINE_LENGTH};
use crate::session::SessionRegistry;
use crate::writer::{spawn_writer_task, OutboundLine, WriterConfig, WriterHandle};

/// How long the stdout reader may keep delivering after the worker exited.
pub const STDOUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Stdout read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Respawn behavior after the worker exits.
///
/// An instance that exits (or fails to launch) before delivering any
/// successful response counts as a failure; a successful response resets
/// the count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RespawnPolicy {
    /// Minimum delay between an exit and the next launch.
    pub backoff: Option<Duration>,
    /// Give up with `Unavailable` after this many consecutive failures.
    pub max_consecutive_failures: Option<u32>,
}

impl RespawnPolicy {
    /// Respawn immediately, forever.
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Options for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub respawn: RespawnPolicy,
    pub writer: WriterConfig,
    pub max_line_length: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            respawn: RespawnPolicy::default(),
            writer: WriterConfig::default(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Handle of the live worker instance.
struct LiveWorker {
    generation: u64,
    writer: WriterHandle,
    kill: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
    delivered: bool,
    /// Set by `shutdown`; a requested exit is not a failure.
    killed: bool,
}

struct State {
    next_id: u64,
    generation: u64,
    pending: PendingTable,
    sessions: SessionRegistry,
    worker: Option<LiveWorker>,
    consecutive_failures: u32,
    last_exit: Option<Instant>,
}

struct Shared {
    state: Mutex<State>,
    launcher: Box<dyn WorkerLauncher>,
    config: SupervisorConfig,
}

/// A call that was registered and is ready to be written.
struct Dispatched {
    id: u64,
    generation: u64,
    rx: PendingReceiver,
    writer: WriterHandle,
    line: OutboundLine,
    guard: PendingGuard,
}

/// Removes the pending entry if the caller stops waiting before an outcome.
struct PendingGuard {
    shared: Weak<Shared>,
    id: u64,
    armed: bool,
}

impl PendingGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let removed = shared.lock().pending.remove(self.id);
        if removed {
            tracing::debug!(id = self.id, "Dropped pending entry of abandoned call");
        }
    }
}

enum Launch {
    Ready(Dispatched),
    /// Backoff still running; the request is handed back.
    Wait(Duration, Request),
}

/// Supervises one worker process at a time and multiplexes calls over it.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(launcher: impl WorkerLauncher, config: SupervisorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    next_id: 1,
                    generation: 0,
                    pending: PendingTable::new(),
                    sessions: SessionRegistry::new(),
                    worker: None,
                    consecutive_failures: 0,
                    last_exit: None,
                }),
                launcher: Box::new(launcher),
                config,
            }),
        }
    }

    /// Send `request` and await its correlated response.
    ///
    /// Returns the response together with the generation of the worker
    /// instance that produced it.
    pub async fn call(&self, request: Request, timeout: Option<Duration>) -> Result<(u64, Response)> {
        let mut request = request;
        let dispatched = loop {
            match self.shared.dispatch(request)? {
                Launch::Ready(d) => break d,
                Launch::Wait(delay, returned) => {
                    tracing::debug!(?delay, "Waiting for respawn backoff");
                    tokio::time::sleep(delay).await;
                    request = returned;
                }
            }
        };

        self.shared.complete(dispatched, timeout).await
    }

    /// Launch the worker now instead of on the first call.
    pub async fn ensure_running(&self) -> Result<()> {
        loop {
            let delay = {
                let mut state = self.shared.lock();
                self.shared.start_if_needed(&mut state)?
            };
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Ok(()),
            }
        }
    }

    pub fn is_initialized(&self, session_id: SessionId) -> bool {
        self.shared.lock().sessions.is_initialized(session_id)
    }

    /// Mark a session initialized if `generation` is still the live worker.
    ///
    /// Returns `false` when the worker that acknowledged `init` is gone.
    pub fn mark_initialized(&self, session_id: SessionId, generation: u64) -> bool {
        let mut state = self.shared.lock();
        let live = state
            .worker
            .as_ref()
            .is_some_and(|w| w.generation == generation);
        if live {
            state.sessions.mark_initialized(session_id);
        }
        live
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().worker.is_some()
    }

    /// Number of worker instances launched so far.
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn initialized_sessions(&self) -> usize {
        self.shared.lock().sessions.len()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.lock().consecutive_failures
    }

    /// Clear the failure count so calls may launch the worker again.
    pub fn reset_respawn(&self) {
        let mut state = self.shared.lock();
        state.consecutive_failures = 0;
        state.last_exit = None;
    }

    /// Kill the live worker and wait until its exit has been processed.
    pub async fn shutdown(&self) {
        let exited = {
            let mut state = self.shared.lock();
            let Some(worker) = state.worker.as_mut() else {
                return;
            };
            worker.killed = true;
            if let Some(kill) = worker.kill.take() {
                let _ = kill.send(());
            }
            worker.exited.clone()
        };
        wait_exited(exited).await;
    }
}

async fn wait_exited(mut exited: watch::Receiver<bool>) {
    while !*exited.borrow_and_update() {
        if exited.changed().await.is_err() {
            break;
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch the worker unless one is live.
    ///
    /// Returns the remaining backoff when the launch has to wait.
    fn start_if_needed(self: &Arc<Self>, state: &mut State) -> Result<Option<Duration>> {
        if state.worker.is_some() {
            return Ok(None);
        }
        if let Some(max) = self.config.respawn.max_consecutive_failures {
            if state.consecutive_failures >= max {
                return Err(SimulatorError::Unavailable(state.consecutive_failures));
            }
        }
        if let (Some(backoff), Some(last_exit)) = (self.config.respawn.backoff, state.last_exit) {
            let elapsed = last_exit.elapsed();
            if elapsed < backoff {
                return Ok(Some(backoff - elapsed));
            }
        }
        self.launch(state)?;
        Ok(None)
    }

    /// Make sure a worker is running, then register and encode the call.
    fn dispatch(self: &Arc<Self>, request: Request) -> Result<Launch> {
        let mut state = self.lock();

        if let Some(delay) = self.start_if_needed(&mut state)? {
            return Ok(Launch::Wait(delay, request));
        }

        let Some(worker) = state.worker.as_ref() else {
            return Err(SimulatorError::ProcessExited);
        };
        let generation = worker.generation;
        let writer = worker.writer.clone();

        let id = state.next_id;
        state.next_id += 1;
        let call = Call::new(id, request);
        let line = OutboundLine::new(id, JsonLineCodec::encode(&call)?);
        let rx = state.pending.register(id)?;
        let guard = PendingGuard {
            shared: Arc::downgrade(self),
            id,
            armed: true,
        };

        tracing::debug!(
            id,
            action = %call.request.action(),
            session_id = call.request.session_id(),
            generation,
            "Dispatching simulator call"
        );

        Ok(Launch::Ready(Dispatched {
            id,
            generation,
            rx,
            writer,
            line,
            guard,
        }))
    }

    fn launch(self: &Arc<Self>, state: &mut State) -> Result<()> {
        let io = match self.launcher.launch() {
            Ok(io) => io,
            Err(e) => {
                state.consecutive_failures += 1;
                state.last_exit = Some(Instant::now());
                tracing::error!(error = %e, failures = state.consecutive_failures, "Failed to launch simulator worker");
                return Err(e);
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let weak = Arc::downgrade(self);

        let (writer, _writer_task) = spawn_writer_task(io.stdin, self.config.writer.clone());
        let reader = tokio::spawn(read_loop(
            weak.clone(),
            generation,
            io.stdout,
            self.config.max_line_length,
        ));
        if let Some(stderr) = io.stderr {
            tokio::spawn(forward_stderr(generation, stderr));
        }
        let (exited_tx, exited_rx) = watch::channel(false);
        tokio::spawn(watch_exit(weak, generation, io.exit, reader, exited_tx));

        state.worker = Some(LiveWorker {
            generation,
            writer,
            kill: Some(io.kill),
            exited: exited_rx,
            delivered: false,
            killed: false,
        });
        tracing::info!(generation, "Simulator worker started");
        Ok(())
    }

    /// Write the call and await its outcome. `timeout` bounds both steps.
    async fn complete(&self, dispatched: Dispatched, timeout: Option<Duration>) -> Result<(u64, Response)> {
        let Dispatched {
            id,
            generation,
            mut rx,
            writer,
            line,
            mut guard,
        } = dispatched;

        let exchange = async {
            if let Err(e) = writer.send(line).await {
                // Unless the exit drain got there first, the entry is still ours.
                self.lock().pending.fail(id, e);
            }
            (&mut rx).await
        };

        let outcome = match timeout {
            None => exchange.await,
            Some(limit) => {
                let timed = tokio::time::timeout(limit, exchange).await;
                match timed {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let removed = self.lock().pending.remove(id);
                        if removed {
                            guard.disarm();
                            tracing::warn!(id, ?limit, "Simulator call timed out");
                            return Err(SimulatorError::Timeout(limit));
                        }
                        // Completed concurrently with the timeout.
                        rx.await
                    }
                }
            }
        };
        guard.disarm();

        match outcome {
            Ok(Ok(response)) => Ok((generation, response)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SimulatorError::ProcessExited),
        }
    }

    fn deliver(&self, generation: u64, response: Response) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if response.ok {
            if let Some(worker) = state.worker.as_mut().filter(|w| w.generation == generation) {
                worker.delivered = true;
                state.consecutive_failures = 0;
            }
        }
        state.pending.resolve(response);
    }

    fn on_exit(&self, generation: u64, exit: WorkerExit) {
        let mut state = self.lock();
        let is_current = state
            .worker
            .as_ref()
            .is_some_and(|w| w.generation == generation);
        if !is_current {
            return;
        }

        let Some(worker) = state.worker.take() else {
            return;
        };
        if !worker.delivered && !worker.killed {
            state.consecutive_failures += 1;
        }
        state.last_exit = Some(Instant::now());
        let failed = state
            .pending
            .drain_all_with_error(|| SimulatorError::ProcessExited);
        let forgotten = state.sessions.clear();
        let failures = state.consecutive_failures;
        drop(state);

        tracing::warn!(
            generation,
            %exit,
            failed_calls = failed,
            forgotten_sessions = forgotten,
            consecutive_failures = failures,
            "Simulator process exited"
        );
    }
}

/// Read stdout, reassemble lines, resolve pending calls.
async fn read_loop(shared: Weak<Shared>, generation: u64, mut stdout: WorkerOutput, max_line_length: usize) {
    let mut lines = LineBuffer::with_max_line_length(max_line_length);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(generation, error = %e, "Failed to read simulator stdout");
                break;
            }
        };

        for line in lines.push(&buf[..n]) {
            let Some(response) = JsonLineCodec::decode(&line) else {
                continue;
            };
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.deliver(generation, response);
        }
    }

    if !lines.is_empty() {
        tracing::debug!(generation, bytes = lines.len(), "Dropping truncated line at EOF");
    }
    if lines.discarded() > 0 {
        tracing::warn!(generation, discarded = lines.discarded(), "Oversized worker lines were dropped");
    }
    lines.clear();
}

/// Re-emit worker stderr as log events.
async fn forward_stderr(generation: u64, stderr: WorkerOutput) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if !text.is_empty() {
                    tracing::warn!(target: "simwire::worker", generation, "{}", text);
                }
            }
            Err(e) => {
                tracing::debug!(generation, error = %e, "Stopped reading simulator stderr");
                break;
            }
        }
    }
}

/// Wait for the worker to exit, let stdout drain, then tear down.
async fn watch_exit(
    shared: Weak<Shared>,
    generation: u64,
    exit: BoxFuture<'static, WorkerExit>,
    mut reader: JoinHandle<()>,
    exited: watch::Sender<bool>,
) {
    let status = exit.await;

    if tokio::time::timeout(STDOUT_DRAIN_GRACE, &mut reader).await.is_err() {
        tracing::debug!(generation, "Simulator stdout still open after exit, abandoning reader");
        reader.abort();
    }

    if let Some(shared) = shared.upgrade() {
        shared.on_exit(generation, status);
    }
    let _ = exited.send(true);
}
