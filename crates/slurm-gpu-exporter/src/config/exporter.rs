use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::ValueEnum;

use crate::slurm::SlurmCommand;
use crate::slurm::SlurmCommands;

/// Which per-user family is exposed under `slurm_gpus_alloc_user`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum UserView {
    /// One series per user, plus `slurm_gpus_node{user,node}`
    #[default]
    User,
    /// One series per (user, node) pair
    UserNode,
}

/// Scheduler commands and collector selection shared by `serve` and `dump`.
#[derive(Args, Clone, Debug)]
pub struct CollectorArgs {
    #[arg(
        long,
        env = "SLURM_SINFO_PATH",
        default_value = "sinfo",
        value_hint = clap::ValueHint::CommandName,
        help = "Path to the sinfo binary"
    )]
    pub sinfo_path: PathBuf,

    #[arg(
        long,
        env = "SLURM_SQUEUE_PATH",
        default_value = "squeue",
        value_hint = clap::ValueHint::CommandName,
        help = "Path to the squeue binary"
    )]
    pub squeue_path: PathBuf,

    #[arg(
        long,
        default_value = "10",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds to wait for each scheduler command before killing it"
    )]
    pub command_timeout_secs: u64,

    #[arg(
        long,
        value_enum,
        default_value_t = UserView::User,
        help = "Per-user metric layout exposed as slurm_gpus_alloc_user"
    )]
    pub user_view: UserView,
}

impl CollectorArgs {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl From<&CollectorArgs> for SlurmCommands {
    fn from(args: &CollectorArgs) -> Self {
        Self {
            inventory: SlurmCommand::inventory(&args.sinfo_path),
            allocations: SlurmCommand::allocations(&args.squeue_path),
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    #[arg(
        long,
        env = "SLURM_GPU_EXPORTER_LISTEN_ADDR",
        default_value = "0.0.0.0:8080",
        help = "HTTP listen address"
    )]
    pub listen_addr: String,

    #[arg(
        long,
        default_value = "/metrics",
        value_parser = parse_metrics_path,
        help = "Path under which metrics are served"
    )]
    pub metrics_path: String,

    #[command(flatten)]
    pub collector: CollectorArgs,
}

#[derive(Args, Clone, Debug)]
pub struct DumpArgs {
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Read recorded sinfo output from this file instead of running sinfo"
    )]
    pub sinfo_output: Option<PathBuf>,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Read recorded squeue output from this file instead of running squeue"
    )]
    pub squeue_output: Option<PathBuf>,

    #[command(flatten)]
    pub collector: CollectorArgs,
}

/// Accepts absolute paths that do not collide with the built-in routes.
pub fn parse_metrics_path(path: &str) -> Result<String, String> {
    if !path.starts_with('/') {
        return Err(format!("metrics path `{path}` must start with `/`"));
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "/health" {
        return Err(format!("metrics path `{path}` is reserved"));
    }
    Ok(trimmed.to_string())
}
