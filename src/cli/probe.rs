//! Streaming wrapper around ping / traceroute / nslookup.
//!
//! Each [`DiagnosticSession`] owns one subprocess. Stdout is forwarded line by
//! line over a bounded channel; the producer waits for room instead of
//! dropping lines, but gives up as soon as the session is canceled. The line
//! channel closes exactly once, whichever way the session ends.

use std::fmt;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use crate::cli::PROBE_CHANNEL_CAPACITY;

/// Line emitted instead of running anything when the target is unsafe.
pub const INVALID_TARGET: &str = "Invalid target address.";

const UNSAFE_CHARS: [char; 4] = [';', '|', '&', '`'];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Ping,
    Traceroute,
    Lookup,
}

impl DiagnosticKind {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::Ping => "ping",
            DiagnosticKind::Traceroute => "traceroute",
            DiagnosticKind::Lookup => "lookup",
        }
    }

    pub fn title(&self, target: &str) -> String {
        match self {
            DiagnosticKind::Ping => format!("Pinging {target}"),
            DiagnosticKind::Traceroute => format!("Tracing route to {target}"),
            DiagnosticKind::Lookup => format!("Looking up {target}"),
        }
    }

    /// Program and arguments for this host OS.
    pub fn invocation(&self, target: &str) -> Invocation {
        match self {
            DiagnosticKind::Ping if cfg!(windows) => Invocation::new("ping", ["-n", "4", target]),
            DiagnosticKind::Ping => Invocation::new("ping", ["-c", "4", target]),
            DiagnosticKind::Traceroute if cfg!(windows) => Invocation::new("tracert", ["-d", target]),
            DiagnosticKind::Traceroute => Invocation::new("traceroute", [target]),
            DiagnosticKind::Lookup => Invocation::new("nslookup", [target]),
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Validating,
    Rejected,
    Launching,
    Streaming,
    CompletedNormally,
    CompletedWithError,
    Canceled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Rejected
                | SessionState::CompletedNormally
                | SessionState::CompletedWithError
                | SessionState::Canceled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Created | SessionState::Validating | SessionState::Launching => "starting",
            SessionState::Streaming => "running",
            SessionState::Rejected => "rejected",
            SessionState::CompletedNormally => "finished",
            SessionState::CompletedWithError => "failed",
            SessionState::Canceled => "canceled",
        }
    }
}

/// Rejects empty targets, option-like targets and shell metacharacters.
pub fn validate_target(target: &str) -> bool {
    let target = target.trim();
    !target.is_empty() && !target.starts_with('-') && !target.contains(UNSAFE_CHARS)
}

/// One in-flight diagnostic command. Dropping it cancels the subprocess.
#[derive(Debug)]
pub struct DiagnosticSession {
    kind: DiagnosticKind,
    target: String,
    lines: mpsc::Receiver<String>,
    cancel: watch::Sender<bool>,
    state: watch::Receiver<SessionState>,
}

impl DiagnosticSession {
    pub fn kind(&self) -> DiagnosticKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Next output line; `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Stops the subprocess. Buffered lines are discarded and no further
    /// lines are delivered.
    pub fn cancel(&mut self) {
        self.cancel.send_replace(true);
        self.lines.close();
        while self.lines.try_recv().is_ok() {}
    }

    /// Waits for the session to reach a terminal state.
    pub async fn finished(&mut self) -> SessionState {
        let done = self.state.wait_for(SessionState::is_terminal).await.map(|s| *s);
        done.unwrap_or_else(|_| *self.state.borrow())
    }
}

/// Starts `kind` against `target` with the host's diagnostic command.
pub fn run(kind: DiagnosticKind, target: &str) -> DiagnosticSession {
    let invocation = kind.invocation(target.trim());
    start(kind, target, invocation)
}

/// Like [`run`], with an explicit program and arguments.
pub fn run_invocation(kind: DiagnosticKind, target: &str, invocation: Invocation) -> DiagnosticSession {
    start(kind, target, invocation)
}

fn start(kind: DiagnosticKind, target: &str, invocation: Invocation) -> DiagnosticSession {
    let (line_tx, lines) = mpsc::channel(PROBE_CHANNEL_CAPACITY.max(1));
    let (cancel, cancel_rx) = watch::channel(false);
    let (state_tx, state) = watch::channel(SessionState::Created);

    let session = DiagnosticSession {
        kind,
        target: target.to_string(),
        lines,
        cancel,
        state,
    };

    advance(&state_tx, SessionState::Validating);
    if !validate_target(target) {
        log::warn!("rejected {kind} target {target:?}");
        // Fresh channel with spare capacity, so this cannot fail.
        let _ = line_tx.try_send(INVALID_TARGET.to_string());
        advance(&state_tx, SessionState::Rejected);
        return session;
    }

    log::info!("starting {kind} session: {} {}", invocation.program, invocation.args.join(" "));
    tokio::spawn(async move {
        let mut cancel_rx = cancel_rx;
        let outcome = drive(invocation, &line_tx, &mut cancel_rx, &state_tx).await;
        advance(&state_tx, outcome);
        log::debug!("{kind} session ended: {}", outcome.label());
        // line_tx drops here, closing the stream.
    });
    session
}

/// Moves the session forward unless it already reached a terminal state.
fn advance(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Resolves when cancellation is requested or the session handle is dropped.
async fn canceled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|c| *c).await;
}

/// Sends one line, waiting for room. Returns false if canceled or the consumer is gone.
async fn emit(tx: &mpsc::Sender<String>, cancel_rx: &mut watch::Receiver<bool>, line: String) -> bool {
    tokio::select! {
        biased;
        _ = canceled(cancel_rx) => false,
        sent = tx.send(line) => sent.is_ok(),
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::debug!("failed to kill probe subprocess: {e}");
    }
}

async fn drive(
    invocation: Invocation,
    tx: &mpsc::Sender<String>,
    cancel_rx: &mut watch::Receiver<bool>,
    state: &watch::Sender<SessionState>,
) -> SessionState {
    advance(state, SessionState::Launching);

    let spawned = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            emit(tx, cancel_rx, format!("Error starting {} command: {e}", invocation.program)).await;
            return SessionState::CompletedWithError;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        terminate(&mut child).await;
        emit(tx, cancel_rx, "Error creating stdout pipe".to_string()).await;
        return SessionState::CompletedWithError;
    };

    advance(state, SessionState::Streaming);
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            biased;
            _ = canceled(cancel_rx) => {
                terminate(&mut child).await;
                return SessionState::Canceled;
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    let line = line.trim_end_matches('\r').to_string();
                    if !emit(tx, cancel_rx, line).await {
                        terminate(&mut child).await;
                        return SessionState::Canceled;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    terminate(&mut child).await;
                    emit(tx, cancel_rx, format!("Error reading {} output: {e}", invocation.program)).await;
                    return SessionState::CompletedWithError;
                }
            }
        }
    }

    let status = tokio::select! {
        biased;
        _ = canceled(cancel_rx) => {
            terminate(&mut child).await;
            return SessionState::Canceled;
        }
        status = child.wait() => status,
    };

    match status {
        Ok(status) => match abnormal_exit(&status) {
            None => SessionState::CompletedNormally,
            Some(reason) => {
                emit(tx, cancel_rx, format!("{} command {reason}", invocation.program)).await;
                SessionState::CompletedWithError
            }
        },
        Err(e) => {
            emit(tx, cancel_rx, format!("{} command finished with error: {e}", invocation.program)).await;
            SessionState::CompletedWithError
        }
    }
}

/// A non-zero exit code is the tool's own verdict; only signal deaths are abnormal.
fn abnormal_exit(status: &ExitStatus) -> Option<String> {
    if status.code().is_some() {
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(format!("terminated by signal {signal}"));
        }
    }
    Some(format!("terminated abnormally ({status})"))
}
