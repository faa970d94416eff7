//! One scrape's worth of scheduler state.

use std::time::Duration;
use std::time::Instant;

use tracing::warn;

use super::allocation::parse_allocations;
use super::allocation::JobAllocation;
use super::command::CommandRunner;
use super::command::SlurmCommand;
use super::command::SlurmCommands;
use super::inventory::GpuInventory;

/// Outcome of one scheduler command within a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStatus {
    pub command: &'static str,
    pub success: bool,
    pub duration: Duration,
}

/// Parsed output of both scheduler commands for a single scrape.
///
/// A `None` field means the command failed; the views depending on it are left empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterSnapshot {
    pub inventory: Option<GpuInventory>,
    pub jobs: Option<Vec<JobAllocation>>,
    pub statuses: Vec<CommandStatus>,
}

impl ClusterSnapshot {
    /// Runs both commands concurrently and parses each output once.
    pub async fn fetch(runner: &dyn CommandRunner, commands: &SlurmCommands) -> Self {
        let (inventory, allocations) = tokio::join!(
            run_timed(runner, &commands.inventory),
            run_timed(runner, &commands.allocations),
        );
        let (inventory_output, inventory_status) = inventory;
        let (allocation_output, allocation_status) = allocations;

        Self {
            inventory: inventory_output.as_deref().map(GpuInventory::parse),
            jobs: allocation_output.as_deref().map(parse_allocations),
            statuses: vec![inventory_status, allocation_status],
        }
    }

    /// Builds a snapshot from already captured `sinfo` and `squeue` output.
    pub fn from_outputs(sinfo: &str, squeue: &str) -> Self {
        Self {
            inventory: Some(GpuInventory::parse(sinfo)),
            jobs: Some(parse_allocations(squeue)),
            statuses: Vec::new(),
        }
    }
}

async fn run_timed(
    runner: &dyn CommandRunner,
    command: &SlurmCommand,
) -> (Option<String>, CommandStatus) {
    let started = Instant::now();
    let result = runner.run(command).await;
    let duration = started.elapsed();

    let output = match result {
        Ok(output) => Some(output),
        Err(report) => {
            warn!(command = command.name, "Scheduler command failed: {report:#}");
            None
        }
    };
    let status = CommandStatus {
        command: command.name,
        success: output.is_some(),
        duration,
    };
    (output, status)
}
