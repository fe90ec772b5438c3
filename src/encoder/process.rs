//! Encoder subprocess lifecycle
//!
//! [`EncoderLauncher`] and [`EncoderSink`] are the capability seam between
//! the streaming loop and the operating system. [`ProcessLauncher`] is the
//! real implementation; tests substitute an in-memory one.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::DEFAULT_SHUTDOWN_GRACE_MS;
use crate::encoder::invocation::EncoderInvocation;
use crate::error::EncoderError;

/// How the encoder process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderExit {
    /// Exit code, `None` when terminated by a signal or not reaped
    pub code: Option<i32>,
    pub success: bool,
    /// A forced kill was needed because no clean exit was confirmed
    pub killed: bool,
}

impl EncoderExit {
    fn from_status(status: ExitStatus, killed: bool) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
            killed,
        }
    }
}

/// Writable side of a running encoder
pub trait EncoderSink {
    /// Write serialized samples; blocks while the pipe is full.
    ///
    /// An error means the encoder stopped reading and ends the session.
    fn write_samples(&mut self, bytes: &[u8]) -> Result<(), EncoderError>;

    /// Non-blocking check for an exit the encoder took on its own
    fn try_exit(&mut self) -> Result<Option<EncoderExit>, EncoderError>;

    /// Close the input, wait for exit, kill if the wait does not confirm it.
    ///
    /// Teardown failures are logged, never returned.
    fn shutdown(self) -> EncoderExit
    where
        Self: Sized;
}

/// Starts encoder sessions
pub trait EncoderLauncher {
    type Session: EncoderSink;

    fn spawn(&self, invocation: &EncoderInvocation) -> Result<Self::Session, EncoderError>;
}

/// Launches the encoder as an OS process
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    grace: Duration,
}

impl ProcessLauncher {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Start `program` directly; `pipe_stdin` selects a piped or null stdin
    pub fn spawn_command(
        &self,
        program: &str,
        args: &[String],
        pipe_stdin: bool,
    ) -> Result<ProcessEncoder, EncoderError> {
        let mut command = Command::new(program);
        command.args(args);
        command.stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() });
        command.stdout(Stdio::null());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| EncoderError::SpawnFailed {
            program: program.to_string(),
            source,
        })?;

        let stdin = if pipe_stdin {
            match child.stdin.take() {
                Some(stdin) => Some(stdin),
                None => {
                    reap(&mut child);
                    return Err(EncoderError::MissingPipe("stdin"));
                }
            }
        } else {
            None
        };

        let stderr_thread = match child.stderr.take() {
            Some(stderr) => Some(forward_stderr(stderr, child.id())?),
            None => {
                reap(&mut child);
                return Err(EncoderError::MissingPipe("stderr"));
            }
        };

        tracing::info!("Encoder started (pid {})", child.id());

        Ok(ProcessEncoder {
            child,
            stdin,
            stderr_thread,
            grace: self.grace,
            reaped: false,
        })
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS))
    }
}

impl EncoderLauncher for ProcessLauncher {
    type Session = ProcessEncoder;

    fn spawn(&self, invocation: &EncoderInvocation) -> Result<ProcessEncoder, EncoderError> {
        tracing::debug!("Spawning encoder: {}", invocation.command_line());
        self.spawn_command(
            &invocation.program,
            &invocation.args(),
            invocation.input.uses_stdin(),
        )
    }
}

/// A running encoder process and its input pipe
pub struct ProcessEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_thread: Option<JoinHandle<()>>,
    grace: Duration,
    reaped: bool,
}

impl ProcessEncoder {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Poll for exit until the grace period runs out
    fn wait_with_grace(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + self.grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn kill_and_reap(&mut self) -> EncoderExit {
        if let Err(e) = self.child.kill() {
            // Already exited between the last poll and the kill
            if e.kind() != ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill encoder: {}", e);
            }
        }
        match self.child.wait() {
            Ok(status) => EncoderExit::from_status(status, true),
            Err(e) => {
                tracing::warn!("Failed to reap encoder: {}", e);
                EncoderExit {
                    code: None,
                    success: false,
                    killed: true,
                }
            }
        }
    }

    fn join_stderr(&mut self) {
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

impl EncoderSink for ProcessEncoder {
    fn write_samples(&mut self, bytes: &[u8]) -> Result<(), EncoderError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncoderError::WriteFailed(ErrorKind::BrokenPipe.into()))?;
        stdin.write_all(bytes).map_err(EncoderError::WriteFailed)
    }

    fn try_exit(&mut self) -> Result<Option<EncoderExit>, EncoderError> {
        let status = self.child.try_wait().map_err(EncoderError::Wait)?;
        Ok(status.map(|s| EncoderExit::from_status(s, false)))
    }

    fn shutdown(mut self) -> EncoderExit {
        // Closing stdin is the encoder's end-of-input signal
        drop(self.stdin.take());

        let exit = match self.wait_with_grace() {
            Ok(Some(status)) => EncoderExit::from_status(status, false),
            Ok(None) => {
                tracing::warn!(
                    "Encoder did not exit within {:?}, killing it",
                    self.grace
                );
                self.kill_and_reap()
            }
            Err(e) => {
                tracing::warn!("Waiting for encoder failed: {}", e);
                self.kill_and_reap()
            }
        };
        self.reaped = true;
        self.join_stderr();

        match exit.code {
            Some(0) => tracing::info!("Encoder exited cleanly"),
            Some(code) => tracing::warn!("Encoder exited with status {}", code),
            None => tracing::info!("Encoder terminated (killed: {})", exit.killed),
        }
        exit
    }
}

impl Drop for ProcessEncoder {
    fn drop(&mut self) {
        if !self.reaped {
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.reaped = true;
        }
        self.join_stderr();
    }
}

/// Relay the encoder's diagnostic stream into our own logs
fn forward_stderr(stderr: ChildStderr, pid: u32) -> Result<JoinHandle<()>, EncoderError> {
    thread::Builder::new()
        .name(format!("encoder-stderr-{pid}"))
        .spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => tracing::info!(target: "encoder", pid, "{}", line),
                    Err(_) => break,
                }
            }
        })
        .map_err(|source| EncoderError::SpawnFailed {
            program: "stderr forwarder".to_string(),
            source,
        })
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
