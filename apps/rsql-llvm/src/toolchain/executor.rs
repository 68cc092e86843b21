//! External command execution with bounded retries.
//!
//! [`CommandExecutor`] wraps a [`CommandRunner`] and owns the retry loop and
//! logging. [`SystemRunner`] is the only runner that spawns real processes;
//! tests substitute their own.

use std::collections::VecDeque;
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::errors::InstallError;

/// How a command's output is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Collect stdout and stderr.
    Capture,
    /// Forward output to the terminal as it is produced, keeping its tail.
    Stream,
}

/// A command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra variables added to the child's inherited environment.
    pub env: Vec<(String, String)>,
    pub mode: OutputMode,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            mode: OutputMode::Capture,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.mode = OutputMode::Stream;
        self
    }
}

impl fmt::Display for CommandSpec {
    /// Renders the expanded command line, environment assignments first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of one finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Only the last lines in [`OutputMode::Stream`].
    pub stdout: String,
    /// Only the last lines in [`OutputMode::Stream`].
    pub stderr: String,
}

impl CommandOutput {
    /// Stderr followed by stdout, used for retry matching and error reports.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stderr.trim(), self.stdout.trim()) {
            ("", out) => out.to_string(),
            (err, "") => err.to_string(),
            (err, out) => format!("{err}\n{out}"),
        }
    }
}

/// Retry behaviour for a command.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    /// Extra attempts after the first; `0` disables retrying.
    pub max_retries: u32,
    /// When set, only failures whose output matches are retried.
    pub pattern: Option<Regex>,
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            pattern: None,
        }
    }

    #[must_use]
    pub fn matching(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub(crate) fn should_retry(&self, attempts: u32, output: &str) -> bool {
        attempts <= self.max_retries
            && self
                .pattern
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(output))
    }
}

/// Runs a single process to completion.
pub trait CommandRunner {
    /// Runs `spec` once.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the process could not be spawned.
    fn run(&self, spec: &CommandSpec, working_dir: Option<&Path>) -> std::io::Result<CommandOutput>;
}

/// Spawns real processes with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, working_dir: Option<&Path>) -> std::io::Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        match spec.mode {
            OutputMode::Capture => {
                let output = command.stdin(Stdio::null()).output()?;
                Ok(CommandOutput {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            OutputMode::Stream => {
                let mut child = command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;
                let stdout = child.stdout.take().map(|out| forward(out, std::io::stdout));
                let stderr = child.stderr.take().map(|err| forward(err, std::io::stderr));
                let status = child.wait()?;
                Ok(CommandOutput {
                    success: status.success(),
                    stdout: stdout.map(join_tail).unwrap_or_default(),
                    stderr: stderr.map(join_tail).unwrap_or_default(),
                })
            }
        }
    }
}

/// Lines of streamed output kept for retry matching and error reports.
const STREAM_TAIL_LINES: usize = 200;

/// Copies `source` line by line to `sink` on a separate thread, returning
/// the last [`STREAM_TAIL_LINES`] lines.
fn forward<S, W>(source: S, sink: fn() -> W) -> JoinHandle<String>
where
    S: Read + Send + 'static,
    W: Write + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut tail = VecDeque::with_capacity(STREAM_TAIL_LINES);
        let mut buf = Vec::new();
        while matches!(reader.read_until(b'\n', &mut buf), Ok(n) if n > 0) {
            let _ = sink().write_all(&buf);
            let line = String::from_utf8_lossy(&buf).trim_end().to_string();
            buf.clear();
            if tail.len() == STREAM_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect::<Vec<_>>().join("\n")
    })
}

fn join_tail(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Executes commands through a runner, retrying according to a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor<R = SystemRunner> {
    runner: R,
}

impl CommandExecutor<SystemRunner> {
    #[must_use]
    pub fn system() -> Self {
        Self::new(SystemRunner)
    }
}

impl<R: CommandRunner> CommandExecutor<R> {
    #[must_use]
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs `spec` until it succeeds or the policy gives up.
    ///
    /// At most `policy.max_retries + 1` attempts are made. A process that
    /// cannot be spawned fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::CommandFailed`] with the attempt count and the
    /// last captured output.
    pub fn run(
        &self,
        spec: &CommandSpec,
        policy: &RetryPolicy,
        working_dir: Option<&Path>,
    ) -> Result<CommandOutput> {
        let command = spec.to_string();
        let mut attempts = 0;

        loop {
            attempts += 1;
            info!(attempt = attempts, "Running `{command}`");

            let output = match self.runner.run(spec, working_dir) {
                Ok(output) => output,
                Err(err) => {
                    warn!(error = %err, "Failed to start `{}`", spec.program);
                    return Err(
                        InstallError::command_failed(&command, attempts, err.to_string()).into(),
                    );
                }
            };

            if output.success {
                debug!(attempts, "`{command}` succeeded");
                return Ok(output);
            }

            let combined = output.combined();
            if !policy.should_retry(attempts, &combined) {
                return Err(InstallError::command_failed(&command, attempts, combined).into());
            }
            warn!(
                attempt = attempts,
                max_retries = policy.max_retries,
                "`{command}` failed, retrying"
            );
        }
    }
}
