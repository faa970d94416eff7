//! Wiring of the subcommands.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::api::ApiServer;
use crate::config::CollectorArgs;
use crate::config::DumpArgs;
use crate::config::ServeArgs;
use crate::metrics::Exporter;
use crate::slurm::command::RecordedOutputRunner;
use crate::slurm::CommandRunner;
use crate::slurm::ProcessRunner;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn exporter(args: &CollectorArgs, runner: Arc<dyn CommandRunner>) -> Exporter {
    Exporter::new(runner, args.into(), args.user_view)
}

/// Serve metrics until SIGTERM or SIGINT.
pub async fn serve(args: ServeArgs) -> Result<()> {
    let runner = Arc::new(ProcessRunner::new(args.collector.command_timeout()));
    let server = ApiServer::new(
        exporter(&args.collector, runner),
        args.listen_addr,
        args.metrics_path,
    );

    let token = CancellationToken::new();
    let mut server_task = {
        let token = token.clone();
        tokio::spawn(async move { server.run(token).await })
    };

    tokio::select! {
        result = wait_for_shutdown_signal() => result?,
        joined = &mut server_task => {
            joined?.map_err(|report| anyhow::anyhow!("{report:?}"))?;
            warn!("API server completed unexpectedly");
            return Ok(());
        }
    }

    info!("Shutdown signal received, stopping API server");
    token.cancel();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
        Ok(joined) => joined?.map_err(|report| anyhow::anyhow!("{report:?}"))?,
        Err(_) => warn!("API server shutdown timed out after {SHUTDOWN_TIMEOUT:?}"),
    }

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
    Ok(())
}

/// Run one scrape and write the exposition to `out`.
pub async fn dump(args: DumpArgs, mut out: impl Write) -> Result<()> {
    let mut runner =
        RecordedOutputRunner::new(ProcessRunner::new(args.collector.command_timeout()));
    if let Some(path) = &args.sinfo_output {
        runner = runner.with_recording("sinfo", path);
    }
    if let Some(path) = &args.squeue_output {
        runner = runner.with_recording("squeue", path);
    }

    let body = exporter(&args.collector, Arc::new(runner))
        .scrape()
        .await
        .map_err(|report| anyhow::anyhow!("{report:?}"))?;

    out.write_all(body.as_bytes()).context("write metrics failed")?;
    out.flush().context("flush metrics output failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;
    use test_log::test;

    use super::*;
    use crate::config::Cli;
    use crate::config::Commands;

    #[test(tokio::test)]
    async fn dump_replays_recorded_output() {
        let mut sinfo = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(sinfo, "node01 gpu:v100:4").expect("write sinfo");
        let mut squeue = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(squeue, "j1|alice|node01|gpu:v100:3").expect("write squeue");

        let argv: Vec<OsString> = vec![
            "slurm-gpu-exporter".into(),
            "dump".into(),
            "--sinfo-output".into(),
            sinfo.path().into(),
            "--squeue-output".into(),
            squeue.path().into(),
        ];
        let cli = Cli::try_parse_from(argv).expect("should parse");
        let Commands::Dump(args) = cli.command else {
            panic!("expected dump");
        };

        let mut out = Vec::new();
        dump(args, &mut out).await.expect("dump should succeed");

        let text = String::from_utf8(out).expect("utf-8 exposition");
        for line in [
            "slurm_gpus_alloc{model=\"v100\",node=\"node01\"} 3",
            "slurm_gpus_idle{model=\"v100\",node=\"node01\"} 1",
            "slurm_gpus_alloc_user{user=\"alice\"} 3",
            "slurm_gpus_exporter_command_success{command=\"sinfo\"} 1",
            "slurm_gpus_exporter_command_success{command=\"squeue\"} 1",
        ] {
            assert!(text.contains(line), "missing `{line}` in:\n{text}");
        }
    }

    #[test(tokio::test)]
    async fn dump_reports_missing_recording_as_failed_command() {
        let argv = [
            "slurm-gpu-exporter",
            "dump",
            "--sinfo-output",
            "/nonexistent/sinfo.txt",
            "--squeue-output",
            "/nonexistent/squeue.txt",
        ];
        let cli = Cli::try_parse_from(argv).expect("should parse");
        let Commands::Dump(args) = cli.command else {
            panic!("expected dump");
        };

        let mut out = Vec::new();
        dump(args, &mut out).await.expect("dump should succeed");

        let text = String::from_utf8(out).expect("utf-8 exposition");
        assert!(!text.contains("slurm_gpus_alloc{"));
        assert!(text.contains("slurm_gpus_exporter_command_success{command=\"sinfo\"} 0"));
    }
}
