//! External checker processes.
//!
//! A checker receives the hook payload on stdin and answers with an exit code
//! (0 allow, 1 warn, 2 deny) and optionally one JSON object on stdout. Async
//! checkers are started before any gate or sync checker runs and collected
//! afterwards. Every checker has its own timeout; a checker that times out,
//! crashes, or answers with anything but JSON becomes a WARN contribution.

use crate::config::RouterConfig;
use crate::core::event::{CanonicalEvent, canonicalize};
use crate::error::{Error, Result};
use crate::hooks::output::{CanonicalOutput, Verdict};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use wait_timeout::ChildExt;

/// Bytes of checker output kept in memory. The rest is drained and discarded.
pub const OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Environment variable telling a checker which canonical event it serves.
pub const HOOK_EVENT_ENV: &str = "CUSTOS_HOOK_EVENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerMode {
    Sync,
    Async,
}

/// One configured checker.
#[derive(Debug, Clone)]
pub struct CheckerSpec {
    pub name: String,
    pub event: CanonicalEvent,
    pub command: Vec<String>,
    pub mode: CheckerMode,
    pub timeout: Duration,
}

/// Static event → checkers table.
#[derive(Debug, Clone, Default)]
pub struct CheckerTable {
    checkers: Vec<CheckerSpec>,
}

impl CheckerTable {
    #[must_use]
    pub fn new(checkers: Vec<CheckerSpec>) -> Self {
        Self { checkers }
    }

    /// Build from `[[router.checkers]]`. Entries without a command are skipped.
    #[must_use]
    pub fn from_config(router: &RouterConfig) -> Self {
        let mut checkers = Vec::new();
        for entry in &router.checkers {
            let Some(program) = entry.command.first() else {
                error!(event = %entry.event, "checker has an empty command, skipping");
                continue;
            };
            let name = entry.name.clone().unwrap_or_else(|| {
                Path::new(program)
                    .file_name()
                    .map_or_else(|| program.clone(), |n| n.to_string_lossy().into_owned())
            });
            checkers.push(CheckerSpec {
                name,
                event: canonicalize(&entry.event),
                command: entry.command.clone(),
                mode: if entry.run_async {
                    CheckerMode::Async
                } else {
                    CheckerMode::Sync
                },
                timeout: Duration::from_secs(
                    entry.timeout_secs.unwrap_or(router.default_timeout_secs),
                ),
            });
        }
        Self { checkers }
    }

    /// Checkers for `event` with the given mode, in configured order.
    pub fn for_event<'a>(
        &'a self,
        event: &'a CanonicalEvent,
        mode: CheckerMode,
    ) -> impl Iterator<Item = &'a CheckerSpec> + 'a {
        self.checkers
            .iter()
            .filter(move |c| c.event == *event && c.mode == mode)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

/// Outcome of one checker.
#[derive(Debug, Clone)]
pub struct CheckerResult {
    pub name: String,
    /// Exit code counted in the aggregate.
    pub exit_code: i32,
    pub output: CanonicalOutput,
}

impl CheckerResult {
    /// WARN contribution for a checker that failed to produce a usable answer.
    fn downgraded(name: &str, reason: &str) -> Self {
        warn!(checker = %name, reason, "checker failed, downgrading to warn");
        let mut output = CanonicalOutput::with_verdict(Verdict::Warn);
        output.system_message = Some(format!("Checker '{name}' {reason}; treated as a warning."));
        output
            .metadata
            .insert("checker_error".to_string(), name.into());
        Self {
            name: name.to_string(),
            exit_code: Verdict::Warn.exit_code(),
            output,
        }
    }
}

type OutputReader = mpsc::Receiver<io::Result<Vec<u8>>>;

enum Running {
    Spawned {
        child: Child,
        stdout: OutputReader,
        stderr: OutputReader,
    },
    Failed(String),
}

/// A started checker, not yet collected.
pub struct RunningChecker {
    name: String,
    timeout: Duration,
    started: Instant,
    state: Running,
}

impl RunningChecker {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the checker within what is left of its timeout.
    ///
    /// A checker still running at its deadline is killed. Output still open
    /// at the deadline (a descendant holding the pipe) counts as a timeout.
    #[must_use]
    pub fn collect(self) -> CheckerResult {
        let (mut child, stdout, stderr) = match self.state {
            Running::Failed(reason) => return CheckerResult::downgraded(&self.name, &reason),
            Running::Spawned {
                child,
                stdout,
                stderr,
            } => (child, stdout, stderr),
        };

        let deadline = self.started + self.timeout;
        let status = match child.wait_timeout(remaining(deadline)) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(
                    checker = %self.name,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "checker timed out, killing"
                );
                kill(&mut child, &self.name);
                // Reader threads are left to finish on their own once the pipes close
                return CheckerResult::downgraded(
                    &self.name,
                    &format!("timed out after {:.1}s", self.timeout.as_secs_f64()),
                );
            }
            Err(e) => {
                kill(&mut child, &self.name);
                return CheckerResult::downgraded(&self.name, &format!("could not be waited on: {e}"));
            }
        };

        let stdout = match stdout.recv_timeout(remaining(deadline)) {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                return CheckerResult::downgraded(&self.name, &format!("output unreadable: {e}"));
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(checker = %self.name, "checker exited but its output stayed open");
                return CheckerResult::downgraded(
                    &self.name,
                    &format!(
                        "left its output open past the {:.1}s timeout",
                        self.timeout.as_secs_f64()
                    ),
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                return CheckerResult::downgraded(&self.name, "lost its output reader");
            }
        };
        if let Ok(Ok(stderr)) = stderr.recv_timeout(remaining(deadline)) {
            if !stderr.is_empty() {
                debug!(checker = %self.name, stderr = %String::from_utf8_lossy(&stderr).trim(), "checker stderr");
            }
        }

        interpret(&self.name, status.code(), &stdout)
    }

    /// Give up on the checker without waiting for an answer.
    pub fn cancel(self) {
        if let Running::Spawned { mut child, .. } = self.state {
            debug!(checker = %self.name, "cancelling checker");
            kill(&mut child, &self.name);
        }
    }
}

/// Spawn a checker and hand it the payload.
///
/// Never fails: a checker that cannot be started is collected as a WARN.
#[must_use]
pub fn start(spec: &CheckerSpec, payload: &[u8]) -> RunningChecker {
    let state = match spawn(spec, payload) {
        Ok(state) => state,
        Err(e) => {
            error!(checker = %spec.name, error = %e, "failed to start checker");
            Running::Failed(format!("could not be started: {e}"))
        }
    };
    RunningChecker {
        name: spec.name.clone(),
        timeout: spec.timeout,
        started: Instant::now(),
        state,
    }
}

/// Run a checker to completion.
#[must_use]
pub fn run_sync(spec: &CheckerSpec, payload: &[u8]) -> CheckerResult {
    start(spec, payload).collect()
}

fn spawn(spec: &CheckerSpec, payload: &[u8]) -> Result<Running> {
    let (program, args) = spec
        .command
        .split_first()
        .ok_or_else(|| Error::Checker("empty command".to_string()))?;

    debug!(checker = %spec.name, program = %program, "spawning checker");
    let mut child = Command::new(program)
        .args(args)
        .env(HOOK_EVENT_ENV, spec.event.as_str())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Checker("stdout was not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Checker("stderr was not piped".to_string()))?;
    let stdout = spawn_reader(stdout);
    let stderr = spawn_reader(stderr);

    // Written from a thread so a checker that never reads cannot block us
    // past its timeout. Dropping stdin afterwards closes it.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = payload.to_vec();
        let name = spec.name.clone();
        thread::spawn(move || {
            if let Err(e) = stdin.write_all(&payload) {
                debug!(checker = %name, error = %e, "checker did not read its payload");
            }
        });
    }

    Ok(Running::Spawned {
        child,
        stdout,
        stderr,
    })
}

fn kill(child: &mut Child, name: &str) {
    if let Err(e) = child.kill() {
        warn!(checker = %name, error = %e, "failed to kill checker");
    }
    if let Err(e) = child.wait() {
        warn!(checker = %name, error = %e, "failed to reap checker");
    }
}

fn interpret(name: &str, code: Option<i32>, stdout: &[u8]) -> CheckerResult {
    let Some(code) = code else {
        return CheckerResult::downgraded(name, "was terminated by a signal");
    };
    let Some(code_verdict) = Verdict::from_exit_code(code) else {
        return CheckerResult::downgraded(name, &format!("exited with unexpected code {code}"));
    };

    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    let output = if text.is_empty() {
        CanonicalOutput::with_verdict(code_verdict)
    } else {
        let parsed = serde_json::from_str::<serde_json::Value>(text)
            .map_err(Error::from)
            .and_then(|reply| CanonicalOutput::from_reply(&reply));
        match parsed {
            Ok(mut output) => {
                output.verdict = output.verdict.max(code_verdict);
                output
            }
            Err(e) => {
                return CheckerResult::downgraded(name, &format!("produced invalid output ({e})"));
            }
        }
    };

    debug!(checker = %name, exit_code = code, verdict = %output.verdict, "checker finished");
    CheckerResult {
        name: name.to_string(),
        exit_code: code,
        output,
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Read a stream to its end on a thread, delivering the bytes over a channel.
fn spawn_reader<R: Read + Send + 'static>(stream: R) -> OutputReader {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone once the checker has been given up on
        let _ = tx.send(read_limited(stream, OUTPUT_LIMIT_BYTES));
    });
    rx
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
    }

    Ok(buf)
}
