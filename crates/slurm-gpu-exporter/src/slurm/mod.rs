//! Slurm CLI integration: running `sinfo`/`squeue` and parsing their output.

use core::error::Error;

use derive_more::Display;

pub mod allocation;
pub mod command;
pub mod descriptor;
pub mod hostlist;
pub mod inventory;
pub mod snapshot;

pub use allocation::JobAllocation;
pub use command::CommandRunner;
pub use command::ProcessRunner;
pub use command::SlurmCommand;
pub use command::SlurmCommands;
pub use inventory::GpuInventory;
pub use inventory::GpuKey;
pub use snapshot::ClusterSnapshot;

/// Errors for a single line of scheduler output.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[display("Missing {field} field in line `{line}`")]
    MissingField { field: &'static str, line: String },
    #[display("Invalid GPU descriptor in line `{line}`")]
    InvalidDescriptor { line: String },
    #[display("Invalid node list in line `{line}`")]
    InvalidNodeList { line: String },
}

impl Error for ParseError {}
