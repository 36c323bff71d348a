/// Producer supervision: spawn the producer, give it time to settle, verify it
/// is alive, retry within budget, and hand back its stdout as a non-blocking
/// stream.
///
/// Supervision stops once the producer is running. After that the caller
/// learns about a dead producer from EOF on the stream or from `is_alive()`.
use crate::command::{CommandBuilder, CommandError, ProducerCommand, ProducerRequest};
use crate::health::{self, set_nonblocking, Liveness};
use crate::retry::{RetryDecision, RetryPolicy};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ChildStdout};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a producer gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const TERMINATE_POLL: Duration = Duration::from_millis(50);

/// Lifecycle of one supervision session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Failed,
    GivenUp,
}

impl SessionState {
    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Idle, GivenUp)
                | (Starting, Running)
                | (Starting, Failed)
                | (Failed, Starting)
                | (Failed, GivenUp)
                | (_, Idle)
        )
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("not able to start the producer for {product}, giving up after {attempts} attempts")]
    RetriesExhausted { product: String, attempts: u32 },

    #[error("a producer is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("failed to switch producer output to non-blocking mode: {0}")]
    NonBlocking(#[source] io::Error),
}

/// Outcome of one spawn-settle-check attempt.
#[derive(Debug)]
pub enum StartOutcome {
    Started(Child),
    StartupFailed(String),
}

/// Result of a non-blocking read from the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRead {
    /// `n` bytes were copied into the buffer.
    Data(usize),
    /// Nothing available right now.
    Pending,
    /// The producer closed its stdout.
    Closed,
}

/// The running producer's stdout, in non-blocking mode.
#[derive(Debug)]
pub struct ProducerStream {
    inner: ChildStdout,
}

impl ProducerStream {
    fn new(inner: ChildStdout) -> io::Result<Self> {
        set_nonblocking(inner.as_raw_fd())?;
        Ok(Self { inner })
    }

    /// Read whatever is available without waiting for more.
    pub fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<StreamRead> {
        match self.inner.read(buf) {
            Ok(0) => Ok(StreamRead::Closed),
            Ok(n) => Ok(StreamRead::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(StreamRead::Pending),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(StreamRead::Pending),
            Err(e) => Err(e),
        }
    }
}

impl Read for ProducerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl AsRawFd for ProducerStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

/// Mutable state of the current supervision: at most one live child.
#[derive(Debug)]
struct Session {
    state: SessionState,
    child: Option<Child>,
    stream: Option<ProducerStream>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            child: None,
            stream: None,
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SupervisorError> {
        if !self.state.can_become(next) {
            tracing::error!(from = ?self.state, to = ?next, "refusing session transition");
            return Err(SupervisorError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
        Ok(())
    }

    /// Adopt a freshly verified producer as the current one.
    fn install(&mut self, mut child: Child) -> Result<(), SupervisorError> {
        self.retire();

        let stream = match child.stdout.take().map(ProducerStream::new) {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                terminate(&mut child);
                return Err(SupervisorError::NonBlocking(e));
            }
            None => {
                terminate(&mut child);
                return Err(SupervisorError::NonBlocking(io::Error::new(
                    io::ErrorKind::NotFound,
                    "producer stdout was not captured",
                )));
            }
        };
        discard_stderr(&mut child);

        self.child = Some(child);
        self.stream = Some(stream);
        Ok(())
    }

    /// Terminate and release the current producer, if any.
    fn retire(&mut self) {
        self.stream = None;
        if let Some(mut child) = self.child.take() {
            terminate(&mut child);
        }
    }
}

/// Keep draining stderr in the background so a chatty producer never blocks
/// on a full pipe and never sees EPIPE.
fn discard_stderr(child: &mut Child) {
    let Some(mut stderr) = child.stderr.take() else {
        return;
    };
    let spawned = thread::Builder::new()
        .name("producer-stderr".to_string())
        .spawn(move || {
            let _ = io::copy(&mut stderr, &mut io::sink());
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to start stderr drain");
    }
}

/// SIGTERM, wait up to the grace period, then SIGKILL. Always reaps.
fn terminate(child: &mut Child) {
    let pid = child.id();
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => {
            let deadline = Instant::now() + TERMINATE_GRACE;
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!(pid, exit_code = ?status.code(), "producer terminated");
                        return;
                    }
                    Ok(None) => thread::sleep(TERMINATE_POLL),
                    Err(_) => break,
                }
            }
            tracing::warn!(pid, "producer ignored SIGTERM, killing");
        }
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "failed to signal producer"),
    }

    if let Err(e) = child.kill() {
        tracing::debug!(pid, error = %e, "kill failed");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid, error = %e, "failed to reap producer");
    }
}

/// Owns the producer process and drives it from `Idle` to `Running` or `GivenUp`.
#[derive(Debug)]
pub struct ProducerSupervisor {
    builder: CommandBuilder,
    policy: RetryPolicy,
    session: Session,
}

impl ProducerSupervisor {
    pub fn new(builder: CommandBuilder, policy: RetryPolicy) -> Self {
        Self {
            builder,
            policy,
            session: Session::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// 1-based number of the current (or last) startup attempt.
    pub fn attempt(&self) -> u32 {
        self.policy.current_attempt()
    }

    /// PID of the current producer, if one is held.
    pub fn pid(&self) -> Option<u32> {
        self.session.child.as_ref().map(Child::id)
    }

    /// Start the producer described by `request` and return its output stream.
    ///
    /// Blocks for the settle delay on every attempt and the retry delay after
    /// every failure. Invalid requests fail immediately; startup failures are
    /// retried until the budget runs out.
    pub fn create(
        &mut self,
        request: &ProducerRequest,
    ) -> Result<&mut ProducerStream, SupervisorError> {
        if self.session.state == SessionState::Running {
            if let Some(pid) = self.pid() {
                return Err(SupervisorError::AlreadyRunning { pid });
            }
        }
        self.shutdown();
        self.policy.reset();

        loop {
            if !self.policy.has_budget() {
                self.session.transition(SessionState::GivenUp)?;
                return Err(self.given_up(request, self.policy.max_attempts()));
            }
            self.session.transition(SessionState::Starting)?;

            let command = match self.builder.build(request) {
                Ok(command) => command,
                Err(e) => {
                    tracing::error!(error = %e, "invalid producer request");
                    self.session.transition(SessionState::Idle)?;
                    return Err(e.into());
                }
            };

            match self.start(&command) {
                StartOutcome::Started(child) => {
                    let pid = child.id();
                    if let Err(e) = self.session.install(child) {
                        self.session.transition(SessionState::Failed)?;
                        return Err(e);
                    }
                    self.session.transition(SessionState::Running)?;
                    tracing::info!(pid, attempt = self.attempt(), "producer running");
                    return self
                        .session
                        .stream
                        .as_mut()
                        .ok_or(SupervisorError::InvalidTransition {
                            from: SessionState::Running,
                            to: SessionState::Running,
                        });
                }
                StartOutcome::StartupFailed(reason) => {
                    self.session.transition(SessionState::Failed)?;
                    thread::sleep(self.policy.retry_delay());
                    tracing::error!(
                        attempt = self.attempt(),
                        product = %request.product,
                        %reason,
                        "producer failed to start"
                    );
                    match self.policy.record_failure() {
                        RetryDecision::Retry { attempt } => {
                            tracing::debug!(attempt, "respawning producer");
                        }
                        RetryDecision::GiveUp { attempts } => {
                            self.session.transition(SessionState::GivenUp)?;
                            return Err(self.given_up(request, attempts));
                        }
                    }
                }
            }
        }
    }

    /// One spawn-settle-check cycle. A dead child is reaped before returning.
    fn start(&self, command: &ProducerCommand) -> StartOutcome {
        tracing::debug!(argv = ?command.argv(), "producer command");
        let mut child = match command.to_process().spawn() {
            Ok(child) => child,
            Err(e) => {
                return StartOutcome::StartupFailed(format!(
                    "failed to spawn {}: {e}",
                    command.program()
                ))
            }
        };
        let pid = child.id();
        tracing::debug!(pid, attempt = self.attempt(), "producer started, settling");

        thread::sleep(self.policy.settle_delay());

        match health::check(&mut child) {
            Liveness::Alive => StartOutcome::Started(child),
            dead => {
                if let Err(e) = child.wait() {
                    tracing::debug!(pid, error = %e, "failed to reap producer");
                }
                StartOutcome::StartupFailed(format!("process [{pid}] {}", dead.reason()))
            }
        }
    }

    fn given_up(&self, request: &ProducerRequest, attempts: u32) -> SupervisorError {
        tracing::error!(
            product = %request.product,
            attempts,
            "not able to start the producer, giving up"
        );
        SupervisorError::RetriesExhausted {
            product: request.product.clone(),
            attempts,
        }
    }

    /// The running producer's output, if there is one.
    pub fn stream_mut(&mut self) -> Option<&mut ProducerStream> {
        self.session.stream.as_mut()
    }

    /// Whether the held producer is still running. `false` when none is held.
    pub fn is_alive(&mut self) -> bool {
        match self.session.child.as_mut() {
            Some(child) => health::is_alive(child),
            None => false,
        }
    }

    /// End the session: terminate the producer and return to `Idle`.
    pub fn shutdown(&mut self) {
        self.session.retire();
        if self.session.state != SessionState::Idle {
            // (_, Idle) is always allowed.
            let _ = self.session.transition(SessionState::Idle);
        }
    }
}

impl Drop for ProducerSupervisor {
    fn drop(&mut self) {
        self.session.retire();
    }
}
