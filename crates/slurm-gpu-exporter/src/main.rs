use anyhow::Result;
use clap::Parser;
use slurm_gpu_exporter::app;
use slurm_gpu_exporter::config::Cli;
use slurm_gpu_exporter::config::Commands;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init(cli.log_path.as_deref())?;

    match cli.command {
        Commands::Serve(serve_args) => {
            tracing::info!("Starting slurm GPU exporter {}", &**version::VERSION);
            app::serve(serve_args).await
        }
        Commands::Dump(dump_args) => app::dump(dump_args, std::io::stdout()).await,
    }
}
