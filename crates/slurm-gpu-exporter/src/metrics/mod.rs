//! Scrape-time rendering of the scheduler state into the Prometheus text format.

use core::error::Error;
use std::sync::Arc;

use derive_more::Display;
use error_stack::Report;
use prometheus::core::Collector;
use prometheus::Encoder;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::debug;

use crate::config::UserView;
use crate::slurm::ClusterSnapshot;
use crate::slurm::CommandRunner;
use crate::slurm::SlurmCommands;

pub mod collectors;

pub use collectors::CommandStatusCollector;
pub use collectors::NodeGpuCollector;
pub use collectors::UserGpuCollector;
pub use collectors::UserNodeGpuCollector;

/// Errors raised while turning a snapshot into exposition text.
#[derive(Debug, Display)]
pub enum ScrapeError {
    #[display("Failed to register collector: {message}")]
    Registry { message: String },
    #[display("Failed to encode metrics: {message}")]
    Encode { message: String },
}

impl Error for ScrapeError {}

/// Queries the scheduler and renders the metrics for one scrape.
#[derive(Clone)]
pub struct Exporter {
    runner: Arc<dyn CommandRunner>,
    commands: SlurmCommands,
    user_view: UserView,
}

impl Exporter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        commands: SlurmCommands,
        user_view: UserView,
    ) -> Self {
        Self {
            runner,
            commands,
            user_view,
        }
    }

    /// Runs the scheduler commands and renders their output.
    ///
    /// Command failures do not fail the scrape: the affected families are simply absent.
    pub async fn scrape(&self) -> Result<String, Report<ScrapeError>> {
        let snapshot = ClusterSnapshot::fetch(self.runner.as_ref(), &self.commands).await;
        render(Arc::new(snapshot), self.user_view)
    }
}

/// Renders a snapshot through a registry built for this call alone.
pub fn render(
    snapshot: Arc<ClusterSnapshot>,
    user_view: UserView,
) -> Result<String, Report<ScrapeError>> {
    let registry = Registry::new();

    register(&registry, NodeGpuCollector::new(snapshot.clone()))?;
    match user_view {
        UserView::User => register(&registry, UserGpuCollector::new(snapshot.clone()))?,
        UserView::UserNode => register(&registry, UserNodeGpuCollector::new(snapshot.clone()))?,
    }
    register(&registry, CommandStatusCollector::new(snapshot))?;

    let families = registry.gather();
    debug!(families = families.len(), "Gathered metric families");

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer).map_err(|e| {
        Report::new(ScrapeError::Encode {
            message: e.to_string(),
        })
    })?;
    String::from_utf8(buffer).map_err(|e| {
        Report::new(ScrapeError::Encode {
            message: e.to_string(),
        })
    })
}

fn register<C>(
    registry: &Registry,
    collector: prometheus::Result<C>,
) -> Result<(), Report<ScrapeError>>
where
    C: Collector + 'static,
{
    collector
        .and_then(|collector| registry.register(Box::new(collector)))
        .map_err(|e| {
            Report::new(ScrapeError::Registry {
                message: e.to_string(),
            })
        })
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    const SINFO: &str = "node01 gpu:v100:4\nnode02 gpu:a100:8\n";
    const SQUEUE: &str = "j1|alice|node01|gpu:v100:3\nj2|bob|node02|gres/gpu:a100:2\n";

    fn rendered(user_view: UserView) -> String {
        render(
            Arc::new(ClusterSnapshot::from_outputs(SINFO, SQUEUE)),
            user_view,
        )
        .expect("should render")
    }

    #[test]
    fn renders_node_and_user_families() {
        let text = rendered(UserView::User);

        assert!(text.contains("# HELP slurm_gpus_alloc Allocated GPUs"));
        assert!(text.contains("# TYPE slurm_gpus_total gauge"));
        assert!(text.contains("slurm_gpus_alloc{model=\"v100\",node=\"node01\"} 3"));
        assert!(text.contains("slurm_gpus_idle{model=\"a100\",node=\"node02\"} 6"));
        assert!(text.contains("slurm_gpus_utilization{model=\"v100\",node=\"node01\"} 0.75"));
        assert!(text.contains("slurm_gpus_alloc_user{user=\"bob\"} 2"));
        assert!(text.contains("slurm_gpus_node{node=\"node01\",user=\"alice\"} 1"));
    }

    #[test]
    fn user_node_view_replaces_user_view() {
        let text = rendered(UserView::UserNode);

        assert!(text.contains("slurm_gpus_alloc_user{node=\"node01\",user=\"alice\"} 3"));
        assert!(!text.contains("slurm_gpus_alloc_user{user=\"alice\"}"));
        assert!(!text.contains("slurm_gpus_node{"));
    }

    #[test]
    fn consecutive_renders_are_identical() {
        assert_eq!(rendered(UserView::User), rendered(UserView::User));
    }

    #[test]
    fn empty_snapshot_renders_without_error() {
        let text = render(Arc::new(ClusterSnapshot::default()), UserView::User)
            .expect("should render");

        assert_eq!(text, "");
    }
}
