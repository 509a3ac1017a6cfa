//! External diagnostic process runner.
//!
//! Spawns one tool per invocation, forwards its stdout as raw chunks while it
//! runs, and reports a terminal outcome once the process has exited, hit its
//! deadline, or been cancelled. Output is never buffered until exit.

pub mod lines;

use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;

pub use self::lines::LineAssembler;

const READ_BUF_SIZE: usize = 4096;
const CHUNK_QUEUE_DEPTH: usize = 64;
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Executable plus any wrapper arguments placed before the engine's own
/// arguments (e.g. `taskset -c 2,3 iperf3`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub leading_args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// One request to run a tool.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Name used in logs and errors (`iperf3`, `ping`, `traceroute`).
    pub name: &'static str,
    pub tool: ToolCommand,
    pub args: Vec<String>,
    pub deadline: Duration,
}

/// Bookkeeping for one live process. Owned by the runner task; never shared
/// between invocations.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub command: String,
    pub args: Vec<String>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub deadline: Instant,
    pub alive: bool,
}

/// How a process ended when it was not stopped by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub command: String,
    pub code: Option<i32>,
    pub stderr: String,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into `EngineError::ProcessExit`.
    pub fn into_result(self) -> Result<Self, EngineError> {
        if self.success() {
            Ok(self)
        } else {
            Err(EngineError::ProcessExit {
                command: self.command,
                code: self.code,
                stderr: self.stderr,
            })
        }
    }
}

enum Outcome {
    Exited(ProcessExit),
    TimedOut,
    Cancelled,
    WaitFailed(std::io::Error),
}

impl Outcome {
    fn into_exit(self, command: String, deadline: Duration) -> Result<ProcessExit, EngineError> {
        match self {
            Outcome::Exited(exit) => Ok(exit),
            Outcome::TimedOut => Err(EngineError::Timeout {
                command,
                after_secs: deadline.as_secs(),
            }),
            Outcome::Cancelled => Err(EngineError::Cancelled { command }),
            Outcome::WaitFailed(source) => Err(EngineError::Wait { command, source }),
        }
    }
}

/// A spawned process: output chunks now, terminal outcome later.
pub struct RunningProcess {
    handle: ProcessHandle,
    chunks: mpsc::Receiver<Bytes>,
    outcome: JoinHandle<Outcome>,
    deadline: Duration,
}

impl RunningProcess {
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Next raw stdout chunk, or `None` once the stream has closed.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.chunks.recv().await
    }

    /// Wait for the process to end. Any chunks not yet consumed are dropped,
    /// so callers drain `next_chunk` first.
    pub async fn wait(mut self) -> Result<ProcessExit, EngineError> {
        self.chunks.close();
        let command = self.handle.command.clone();
        let outcome = match (&mut self.outcome).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::WaitFailed(std::io::Error::other(e)),
        };
        self.handle.alive = false;
        outcome.into_exit(command, self.deadline)
    }
}

/// Spawns diagnostic tools and supervises them until exit.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cancel: CancellationToken,
}

impl ProcessRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Start `invocation` immediately. A spawn failure is returned here and is
    /// never retried.
    pub fn spawn(&self, invocation: Invocation) -> Result<RunningProcess, EngineError> {
        let Invocation {
            name,
            tool,
            args,
            deadline,
        } = invocation;

        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                command: name.to_string(),
            });
        }

        let mut child = Command::new(&tool.program)
            .args(&tool.leading_args)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                command: name.to_string(),
                source,
            })?;

        let handle = ProcessHandle {
            command: name.to_string(),
            args: args.clone(),
            pid: child.id(),
            started_at: Utc::now(),
            deadline: Instant::now() + deadline,
            alive: true,
        };

        info!(
            command = name,
            program = tool.program.as_str(),
            pid = handle.pid,
            args = ?args,
            deadline_sec = deadline.as_secs(),
            "spawned diagnostic process"
        );

        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let outcome = tokio::spawn(supervise(
            name,
            child_io(&mut child),
            child,
            tx,
            handle.deadline,
            self.cancel.clone(),
        ));

        Ok(RunningProcess {
            handle,
            chunks: rx,
            outcome,
            deadline,
        })
    }
}

type ChildIo = (
    Option<tokio::process::ChildStdout>,
    Option<tokio::process::ChildStderr>,
);

fn child_io(child: &mut Child) -> ChildIo {
    (child.stdout.take(), child.stderr.take())
}

async fn supervise(
    name: &'static str,
    (stdout, stderr): ChildIo,
    mut child: Child,
    tx: mpsc::Sender<Bytes>,
    deadline: Instant,
    cancel: CancellationToken,
) -> Outcome {
    let pid = child.id();
    let started = Instant::now();

    let run = async {
        let pump_stdout = async move {
            if let Some(stdout) = stdout {
                pump(stdout, tx).await;
            }
        };
        let collect_stderr = async move {
            let mut captured = Vec::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_end(&mut captured).await {
                    debug!(command = name, error = %e, "stderr read failed");
                }
            }
            String::from_utf8_lossy(&captured).into_owned()
        };
        // stdout must be fully forwarded before the exit is reported.
        let (_, stderr, status) = tokio::join!(pump_stdout, collect_stderr, child.wait());
        (stderr, status)
    };

    let outcome = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            warn!(command = name, pid, "test cancelled, terminating process");
            Outcome::Cancelled
        }

        _ = tokio::time::sleep_until(deadline) => {
            warn!(command = name, pid, "process exceeded deadline, terminating");
            Outcome::TimedOut
        }

        (stderr, status) = run => match status {
            Ok(status) => {
                info!(
                    command = name,
                    pid,
                    exit_code = status.code(),
                    duration_sec = started.elapsed().as_secs_f64(),
                    "diagnostic process exited"
                );
                Outcome::Exited(ProcessExit {
                    command: name.to_string(),
                    code: status.code(),
                    stderr,
                })
            }
            Err(e) => Outcome::WaitFailed(e),
        },
    };

    if matches!(outcome, Outcome::TimedOut | Outcome::Cancelled) {
        terminate_child(name, &mut child).await;
    }
    outcome
}

/// Forward everything `reader` produces until EOF or until the receiving
/// side goes away.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    debug!("output receiver dropped, discarding remaining output");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed reading process output");
                break;
            }
        }
    }
}

/// Stop a child that outlived its test: SIGTERM, then SIGKILL if it is
/// still around after [`TERM_GRACE`].
async fn terminate_child(name: &'static str, child: &mut Child) {
    let pid = child.id();
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            // SAFETY: signal delivery to a pid we spawned and have not reaped.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    let reaped = tokio::time::timeout(TERM_GRACE, child.wait()).await;
    match reaped {
        Ok(Ok(status)) => debug!(command = name, pid, exit_code = status.code(), "terminated"),
        Ok(Err(e)) => warn!(command = name, pid, error = %e, "wait after SIGTERM failed"),
        Err(_) => {
            warn!(command = name, pid, grace_sec = TERM_GRACE.as_secs(), "ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(command = name, pid, error = %e, "SIGKILL failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_forwards_chunks_in_order() {
        let reader = tokio_test::io::Builder::new()
            .read(b"[  5]   0.00-1.00 ")
            .read(b"  sec  1.10 GBytes  9.42 Gbits/sec\n")
            .read(b"iperf Done.\n")
            .build();
        let (tx, mut rx) = mpsc::channel(8);
        pump(reader, tx).await;

        let mut got = Vec::new();
        while let Some(chunk) = rx.recv().await {
            got.extend_from_slice(&chunk);
        }
        assert_eq!(
            got,
            b"[  5]   0.00-1.00   sec  1.10 GBytes  9.42 Gbits/sec\niperf Done.\n"
        );
    }

    #[test]
    fn test_nonzero_exit_becomes_error() {
        let exit = ProcessExit {
            command: "ping".into(),
            code: Some(2),
            stderr: "ping: unknown host".into(),
        };
        match exit.into_result() {
            Err(EngineError::ProcessExit { code, stderr, .. }) => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "ping: unknown host");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_wait_failure_is_distinct_from_spawn_failure() {
        let outcome = Outcome::WaitFailed(std::io::Error::other("join failed"));
        let err = outcome
            .into_exit("iperf3".into(), Duration::from_secs(40))
            .unwrap_err();
        assert!(matches!(err, EngineError::Wait { ref command, .. } if command == "iperf3"));

        let err = Outcome::TimedOut
            .into_exit("iperf3".into(), Duration::from_secs(40))
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { after_secs: 40, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_binary_fails_fast() {
        let runner = ProcessRunner::default();
        let result = runner.spawn(Invocation {
            name: "iperf3",
            tool: ToolCommand::new("/nonexistent/netgauge-iperf3"),
            args: vec![],
            deadline: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_arrives_before_exit() {
        let runner = ProcessRunner::default();
        let mut run = runner
            .spawn(Invocation {
                name: "sh",
                tool: ToolCommand::new("sh"),
                args: vec![
                    "-c".into(),
                    "echo first; sleep 0.2; echo second; echo oops >&2; exit 3".into(),
                ],
                deadline: Duration::from_secs(10),
            })
            .unwrap();

        let first = run.next_chunk().await.unwrap();
        assert!(first.starts_with(b"first"));

        let mut asm = LineAssembler::new();
        let mut lines = asm.feed(&first);
        while let Some(chunk) = run.next_chunk().await {
            lines.extend(asm.feed(&chunk));
        }
        assert_eq!(lines, vec!["first", "second"]);

        let exit = run.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_terminates_process() {
        let runner = ProcessRunner::default();
        let mut run = runner
            .spawn(Invocation {
                name: "sleep",
                tool: ToolCommand::new("sleep"),
                args: vec!["30".into()],
                deadline: Duration::from_millis(200),
            })
            .unwrap();
        while run.next_chunk().await.is_some() {}
        assert!(matches!(run.wait().await, Err(EngineError::Timeout { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_terminates_process() {
        let token = CancellationToken::new();
        let runner = ProcessRunner::new(token.clone());
        let mut run = runner
            .spawn(Invocation {
                name: "sleep",
                tool: ToolCommand::new("sleep"),
                args: vec!["30".into()],
                deadline: Duration::from_secs(60),
            })
            .unwrap();
        token.cancel();
        while run.next_chunk().await.is_some() {}
        assert!(matches!(run.wait().await, Err(EngineError::Cancelled { .. })));
    }
}
