//! Execution of the scheduler query commands.

use core::error::Error;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use derive_more::Display;
use error_stack::Report;
use tokio::process::Command;
use tracing::debug;

pub const SINFO_FORMAT: &str = "%n %G";
pub const SQUEUE_FORMAT: &str = "%j|%u|%R|%b";

/// Errors raised while running a scheduler command.
#[derive(Debug, Display)]
pub enum CommandError {
    #[display("Failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[display("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[display("`{command}` exited with {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: String,
        stderr: String,
    },
    #[display("Failed to read output of `{command}`: {message}")]
    Io { command: String, message: String },
}

impl Error for CommandError {}

/// A scheduler command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmCommand {
    /// Short name used in logs and metric labels.
    pub name: &'static str,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SlurmCommand {
    pub fn new(name: &'static str, program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            name,
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Node GPU inventory: `sinfo -h -o "%n %G"`.
    pub fn inventory(program: impl Into<PathBuf>) -> Self {
        Self::new("sinfo", program, &["-h", "-o", SINFO_FORMAT])
    }

    /// Running job GPU bindings: `squeue -a -r -h -o "%j|%u|%R|%b"`.
    pub fn allocations(program: impl Into<PathBuf>) -> Self {
        Self::new("squeue", program, &["-a", "-r", "-h", "-o", SQUEUE_FORMAT])
    }
}

impl fmt::Display for SlurmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The pair of commands queried on every scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmCommands {
    pub inventory: SlurmCommand,
    pub allocations: SlurmCommand,
}

impl Default for SlurmCommands {
    fn default() -> Self {
        Self {
            inventory: SlurmCommand::inventory("sinfo"),
            allocations: SlurmCommand::allocations("squeue"),
        }
    }
}

/// Runs a command and returns its standard output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &SlurmCommand) -> Result<String, Report<CommandError>>;
}

/// Spawns real subprocesses, killing them once `timeout` elapses.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &SlurmCommand) -> Result<String, Report<CommandError>> {
        debug!(command = %command, "Running scheduler command");

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Report::new(CommandError::Spawn {
                    command: command.to_string(),
                    message: e.to_string(),
                })
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Report::new(CommandError::Timeout {
                    command: command.to_string(),
                    timeout: self.timeout,
                })
            })?
            .map_err(|e| {
                Report::new(CommandError::Io {
                    command: command.to_string(),
                    message: e.to_string(),
                })
            })?;

        if !output.status.success() {
            return Err(Report::new(CommandError::ExitStatus {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Serves previously captured output for some commands, delegating the rest.
///
/// Used by the `dump` command to replay `sinfo`/`squeue` output saved from a cluster.
pub struct RecordedOutputRunner<R> {
    recorded: HashMap<&'static str, PathBuf>,
    fallback: R,
}

impl<R: CommandRunner> RecordedOutputRunner<R> {
    pub fn new(fallback: R) -> Self {
        Self {
            recorded: HashMap::new(),
            fallback,
        }
    }

    /// Replays the contents of `path` whenever the command named `name` is run.
    pub fn with_recording(mut self, name: &'static str, path: impl Into<PathBuf>) -> Self {
        self.recorded.insert(name, path.into());
        self
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for RecordedOutputRunner<R> {
    async fn run(&self, command: &SlurmCommand) -> Result<String, Report<CommandError>> {
        let Some(path) = self.recorded.get(command.name) else {
            return self.fallback.run(command).await;
        };

        debug!(command = command.name, path = %path.display(), "Replaying recorded output");
        tokio::fs::read_to_string(path).await.map_err(|e| {
            Report::new(CommandError::Io {
                command: format!("{} (recorded at {})", command.name, path.display()),
                message: e.to_string(),
            })
        })
    }
}
