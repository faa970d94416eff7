use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use utils::logging::LOG_PATH_ENV_VAR;
use utils::version;

use crate::config::exporter::DumpArgs;
use crate::config::exporter::ServeArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = LOG_PATH_ENV_VAR,
        value_hint = clap::ValueHint::FilePath,
        help = "Write logs to a daily rolling file at this path instead of stderr"
    )]
    pub log_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve GPU metrics over HTTP
    Serve(ServeArgs),
    /// Run a single scrape and print the metrics to stdout
    Dump(DumpArgs),
}
